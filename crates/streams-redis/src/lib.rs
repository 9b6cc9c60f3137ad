//! Implementation of consumer-group streams on a Redis server.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use proven_streams::{
    AckBatch, AppendRequest, BlockMode, EntryId, Fields, GroupStart, MaxLen, ReadGroupReply,
    ReadGroupRequest, StreamClient, StreamEntries,
};
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamKey, StreamReadReply};
use redis::{Client, Cmd};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Options for configuring a `RedisStreamClient`.
#[derive(Clone, Debug)]
pub struct RedisStreamClientOptions {
    /// Connection URL, e.g. `redis://127.0.0.1:6379`.
    pub url: String,
}

/// Stream client backed by a Redis server.
///
/// Non-blocking commands share one multiplexed connection. Reads that may
/// block run on a second connection that is opened on first use and kept for
/// later rounds. Each clone gets its own blocking connection, so hand every
/// consumer a clone of its own.
pub struct RedisStreamClient {
    blocking: Mutex<Option<MultiplexedConnection>>,
    client: Client,
    connection: MultiplexedConnection,
}

impl Clone for RedisStreamClient {
    fn clone(&self) -> Self {
        Self {
            blocking: Mutex::default(),
            client: self.client.clone(),
            connection: self.connection.clone(),
        }
    }
}

impl Debug for RedisStreamClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("RedisStreamClient").finish_non_exhaustive()
    }
}

impl RedisStreamClient {
    /// Connects to the server described by the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Redis`] if the URL is invalid or the server cannot be
    /// reached.
    pub async fn new(
        RedisStreamClientOptions { url }: RedisStreamClientOptions,
    ) -> Result<Self, Error> {
        let client = Client::open(url.as_str())?;
        let connection = client.get_multiplexed_async_connection().await?;

        debug!("connected to redis");

        Ok(Self {
            blocking: Mutex::default(),
            client,
            connection,
        })
    }

    /// Creates a consumer group on a stream (`XGROUP CREATE`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Redis`] if the group already exists or the stream is
    /// missing and `mkstream` is not set.
    pub async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
        mkstream: bool,
    ) -> Result<(), Error> {
        let from = match start {
            GroupStart::Beginning => "0".to_string(),
            GroupStart::End => "$".to_string(),
            GroupStart::After(id) => id.to_string(),
        };

        let mut command = redis::cmd("XGROUP");
        command.arg("CREATE").arg(stream).arg(group).arg(from);
        if mkstream {
            command.arg("MKSTREAM");
        }
        command.query_async::<()>(&mut self.connection.clone()).await?;

        debug!("created group {group} on {stream} starting at {start:?}");

        Ok(())
    }

    /// Removes a consumer group. Returns whether the group existed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Redis`] if the stream does not exist.
    pub async fn destroy_group(&self, stream: &str, group: &str) -> Result<bool, Error> {
        let destroyed: u64 = redis::cmd("XGROUP")
            .arg("DESTROY")
            .arg(stream)
            .arg(group)
            .query_async(&mut self.connection.clone())
            .await?;

        Ok(destroyed > 0)
    }

    // The connection is not put back when the query fails or the future is
    // dropped, as the server may still be blocked on it.
    async fn query_blocking(&self, command: &Cmd) -> Result<Option<StreamReadReply>, Error> {
        let cached = self.blocking.lock().await.take();
        let mut connection = match cached {
            Some(connection) => connection,
            None => {
                debug!("opening connection for blocking reads");
                self.client.get_multiplexed_async_connection().await?
            }
        };

        let reply = command.query_async(&mut connection).await?;
        *self.blocking.lock().await = Some(connection);

        Ok(reply)
    }

    /// Removes a stream with all of its groups. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Redis`] if the command fails.
    pub async fn delete_stream(&self, stream: &str) -> Result<bool, Error> {
        let deleted: u64 = redis::cmd("DEL")
            .arg(stream)
            .query_async(&mut self.connection.clone())
            .await?;

        Ok(deleted > 0)
    }

    /// Number of entries currently held by a stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Redis`] if the key holds something other than a
    /// stream.
    pub async fn len(&self, stream: &str) -> Result<u64, Error> {
        Ok(redis::cmd("XLEN")
            .arg(stream)
            .query_async(&mut self.connection.clone())
            .await?)
    }
}

#[async_trait]
impl StreamClient for RedisStreamClient {
    type Error = Error;

    async fn read_group(&self, request: ReadGroupRequest) -> Result<ReadGroupReply, Self::Error> {
        let command = read_group_command(&request);

        // a parked XREADGROUP would hold up every reply queued behind it
        let reply: Option<StreamReadReply> = if may_block(&request) {
            self.query_blocking(&command).await?
        } else {
            command.query_async(&mut self.connection.clone()).await?
        };

        let Some(reply) = reply else {
            trace!(consumer = %request.consumer, "group read timed out");
            return Ok(ReadGroupReply::TimedOut);
        };

        let streams = reply
            .keys
            .into_iter()
            .map(stream_entries)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ReadGroupReply::Streams(streams))
    }

    async fn ack(&self, group: &str, batches: Vec<AckBatch>) -> Result<u64, Self::Error> {
        if batches.is_empty() {
            return Ok(0);
        }

        let mut pipeline = redis::pipe();
        for AckBatch { stream, ids } in &batches {
            let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
            pipeline.cmd("XACK").arg(stream).arg(group).arg(ids);
        }

        let acked: Vec<u64> = pipeline.query_async(&mut self.connection.clone()).await?;

        Ok(acked.into_iter().sum())
    }

    async fn append(&self, request: AppendRequest) -> Result<EntryId, Self::Error> {
        let mut command = redis::cmd("XADD");
        command.arg(&request.stream);

        match request.max_len {
            Some(MaxLen::Exact(limit)) => {
                command.arg("MAXLEN").arg(limit);
            }
            Some(MaxLen::Approximate(limit)) => {
                command.arg("MAXLEN").arg("~").arg(limit);
            }
            None => {}
        }

        command.arg(request.id.map_or_else(|| "*".to_string(), |id| id.to_string()));
        for (field, value) in &request.fields {
            command.arg(field).arg(&value[..]);
        }

        let id: String = command.query_async(&mut self.connection.clone()).await?;
        let id: EntryId = id.parse()?;

        trace!("appended {id} to {}", request.stream);

        Ok(id)
    }
}

fn read_group_command(request: &ReadGroupRequest) -> Cmd {
    let mut command = redis::cmd("XREADGROUP");
    command
        .arg("GROUP")
        .arg(&request.group)
        .arg(&request.consumer);

    if let Some(count) = request.count {
        command.arg("COUNT").arg(count);
    }

    match request.block {
        BlockMode::NoWait => {}
        BlockMode::Forever => {
            command.arg("BLOCK").arg(0);
        }
        BlockMode::Timeout(timeout) => {
            command.arg("BLOCK").arg(block_millis(timeout));
        }
    }

    if request.no_ack {
        command.arg("NOACK");
    }

    command.arg("STREAMS");
    for (stream, _) in &request.streams {
        command.arg(stream);
    }
    for (_, cursor) in &request.streams {
        command.arg(cursor.token());
    }

    command
}

// the server only parks a group read when every id is `>`
fn may_block(request: &ReadGroupRequest) -> bool {
    request.block.waits() && request.streams.iter().all(|(_, cursor)| cursor.is_live())
}

// BLOCK 0 means forever, so a sub-millisecond timeout rounds up
fn block_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis())
        .unwrap_or(u64::MAX)
        .max(1)
}

fn stream_entries(StreamKey { key, ids, .. }: StreamKey) -> Result<StreamEntries, Error> {
    let entries = ids
        .into_iter()
        .map(|StreamId { id, map, .. }| {
            let fields = map
                .iter()
                .map(|(field, value)| {
                    let value: Vec<u8> = redis::from_redis_value(value)?;
                    Ok((field.clone(), Bytes::from(value)))
                })
                .collect::<Result<Fields, Error>>()?;

            Ok((id.parse::<EntryId>()?, fields))
        })
        .collect::<Result<Vec<(EntryId, Fields)>, Error>>()?;

    Ok(StreamEntries::new(key, entries))
}
