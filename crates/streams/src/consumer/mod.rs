mod error;

pub use error::Error;

use crate::client::{
    AckBatch, BlockMode, ReadGroupReply, ReadGroupRequest, StreamClient, StreamEntries,
};
use crate::cursor::Cursor;
use crate::entry::{Entry, EntryId};

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Options for a consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// Consumer group name.
    pub group: String,

    /// Identity of this consumer within the group.
    pub consumer: String,

    /// Streams to read, in request order.
    pub streams: Vec<String>,

    /// Maximum number of entries returned per stream on each read.
    pub count: Option<usize>,

    /// How long each read may wait for entries.
    pub block: BlockMode,

    /// Skip adding delivered entries to the group's pending list.
    pub no_ack: bool,
}

impl ConsumerOptions {
    /// Creates options for the given group and consumer with no streams,
    /// no count cap, indefinite blocking and acknowledgment tracking.
    #[must_use]
    pub fn new(group: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            consumer: consumer.into(),
            streams: Vec::new(),
            count: None,
            block: BlockMode::default(),
            no_ack: false,
        }
    }

    /// Subscribes to a stream.
    #[must_use]
    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.streams.push(stream.into());
        self
    }

    /// Caps the number of entries returned per stream on each read.
    #[must_use]
    pub const fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Sets the block mode.
    #[must_use]
    pub const fn with_block(mut self, block: BlockMode) -> Self {
        self.block = block;
        self
    }

    /// Sets whether delivered entries skip the pending list.
    #[must_use]
    pub const fn with_no_ack(mut self, no_ack: bool) -> Self {
        self.no_ack = no_ack;
        self
    }
}

/// Reads a set of streams as one member of a consumer group.
///
/// Each subscribed stream has a [`Cursor`]. Reads first replay this
/// consumer's unacknowledged backlog and then follow the live tail, one stream
/// at a time as each backlog runs dry. Because the store remembers what was
/// delivered, a new consumer with the same group and identity picks up exactly
/// where a crashed one left off.
///
/// A consumer is a single flow of control: [`Consumer::read`] takes `&mut self`
/// and the cursors are not shared. Run one consumer per worker to read in
/// parallel; the group hands each of them different entries.
#[derive(Debug)]
pub struct Consumer<C>
where
    C: StreamClient,
{
    client: C,
    cursors: IndexMap<String, Cursor>,
    options: ConsumerOptions,
}

impl<C> Consumer<C>
where
    C: StreamClient,
{
    /// Creates a new consumer with every cursor replaying from the start.
    ///
    /// # Errors
    ///
    /// Returns an error if no stream is subscribed, if the group or consumer
    /// name is empty, or if the count cap is zero.
    pub fn new(client: C, options: ConsumerOptions) -> Result<Self, Error<C::Error>> {
        if options.streams.is_empty() {
            return Err(Error::NoStreams);
        }

        if options.group.is_empty() {
            return Err(Error::InvalidOptions("group name is empty".to_string()));
        }

        if options.consumer.is_empty() {
            return Err(Error::InvalidOptions("consumer name is empty".to_string()));
        }

        if options.count == Some(0) {
            return Err(Error::InvalidOptions("count must be positive".to_string()));
        }

        let mut cursors = IndexMap::with_capacity(options.streams.len());
        for stream in &options.streams {
            if cursors.insert(stream.clone(), Cursor::default()).is_some() {
                warn!("stream {stream} subscribed more than once");
            }
        }

        Ok(Self {
            client,
            cursors,
            options,
        })
    }

    /// Reads the next batch of entries.
    ///
    /// Each round asks the store for every subscribed stream at once. Timed-out
    /// rounds are repeated unless the consumer never blocks, in which case an
    /// empty batch is returned. A round that only finished draining some
    /// backlogs is repeated too, so an empty batch always means every stream
    /// is on its live tail with nothing new.
    ///
    /// Entries of a stream appear in identifier order. Unless the consumer was
    /// configured with `no_ack`, they stay pending until [`Consumer::ack`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the token fires before a round
    /// completes and [`Error::Client`] if the store fails. Neither moves any
    /// cursor.
    pub async fn read(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Entry>, Error<C::Error>> {
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let all_live = self.is_live();
            let request = self.request();

            trace!(
                group = %self.options.group,
                consumer = %self.options.consumer,
                "reading {:?}",
                request.streams
            );

            let reply = tokio::select! {
                biased;

                reply = self.client.read_group(request) => reply.map_err(Error::Client)?,
                () = cancel.cancelled() => {
                    debug!(consumer = %self.options.consumer, "read cancelled");
                    return Err(Error::Cancelled);
                }
            };

            let streams = match reply {
                ReadGroupReply::TimedOut if self.options.block.waits() => {
                    trace!("nothing within the wait window, reading again");
                    continue;
                }
                ReadGroupReply::TimedOut => return Ok(Vec::new()),
                ReadGroupReply::Streams(streams) => streams,
            };

            let batch = self.apply(streams);
            if !batch.is_empty() || all_live {
                debug!(
                    consumer = %self.options.consumer,
                    "read {} entries",
                    batch.len()
                );
                return Ok(batch);
            }

            trace!("backlog round returned nothing, reading again");
        }
    }

    /// Acknowledges entries so the group stops tracking them as pending.
    ///
    /// Entries are grouped per stream and sent in one round-trip. Returns how
    /// many identifiers the store removed from the pending list; entries that
    /// were already acknowledged do not count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Client`] if the store fails. Acknowledging is
    /// idempotent, so the whole call can be retried.
    pub async fn ack(&self, entries: &[Entry]) -> Result<u64, Error<C::Error>> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut ids: IndexMap<&str, Vec<EntryId>> = IndexMap::new();
        for entry in entries {
            ids.entry(entry.stream.as_str()).or_default().push(entry.id);
        }

        let batches = ids
            .into_iter()
            .map(|(stream, ids)| AckBatch {
                stream: stream.to_string(),
                ids,
            })
            .collect();

        let acked = self
            .client
            .ack(&self.options.group, batches)
            .await
            .map_err(Error::Client)?;

        debug!(
            consumer = %self.options.consumer,
            "acknowledged {acked} of {} entries",
            entries.len()
        );

        Ok(acked)
    }

    /// Returns the cursor of a subscribed stream.
    #[must_use]
    pub fn cursor(&self, stream: &str) -> Option<&Cursor> {
        self.cursors.get(stream)
    }

    /// Returns every stream with its cursor, in request order.
    pub fn cursors(&self) -> impl Iterator<Item = (&str, &Cursor)> {
        self.cursors
            .iter()
            .map(|(stream, cursor)| (stream.as_str(), cursor))
    }

    /// Whether every stream has finished replaying its backlog.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.cursors.values().all(Cursor::is_live)
    }

    /// Returns the subscribed streams, in request order.
    pub fn streams(&self) -> impl Iterator<Item = &str> {
        self.cursors.keys().map(String::as_str)
    }

    /// Returns the consumer group name.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.options.group
    }

    /// Returns this consumer's identity within the group.
    #[must_use]
    pub fn consumer_name(&self) -> &str {
        &self.options.consumer
    }

    /// Returns the options the consumer was created with.
    #[must_use]
    pub const fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    fn request(&self) -> ReadGroupRequest {
        ReadGroupRequest {
            group: self.options.group.clone(),
            consumer: self.options.consumer.clone(),
            streams: self
                .cursors
                .iter()
                .map(|(stream, cursor)| (stream.clone(), *cursor))
                .collect(),
            count: self.options.count,
            block: self.options.block,
            no_ack: self.options.no_ack,
        }
    }

    fn apply(&mut self, replies: Vec<StreamEntries>) -> Vec<Entry> {
        let mut batch = Vec::new();

        for StreamEntries { stream, entries } in replies {
            let Some(cursor) = self.cursors.get_mut(&stream) else {
                warn!("ignoring entries for unsubscribed stream {stream}");
                continue;
            };

            match entries.last() {
                None if !cursor.is_live() => {
                    debug!(
                        consumer = %self.options.consumer,
                        "backlog of {stream} exhausted, following live tail"
                    );
                    cursor.go_live();
                }
                None => {}
                Some((last, _)) => cursor.advance(*last),
            }

            batch.extend(
                entries
                    .into_iter()
                    .map(|(id, fields)| Entry::new(stream.clone(), id, fields)),
            );
        }

        batch
    }
}
