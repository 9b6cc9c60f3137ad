//! In-memory (single node) implementation of consumer-group streams for local
//! development and tests.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod state;

pub use error::Error;
pub use state::PendingEntry;

use std::sync::Arc;

use async_trait::async_trait;
use proven_streams::{
    AckBatch, AppendRequest, BlockMode, EntryId, GroupStart, ReadGroupReply, ReadGroupRequest,
    StreamClient,
};
use state::State;
use tokio::sync::{Mutex, Notify};
use tokio::time::{self, Instant};
use tracing::{debug, trace};

/// In-memory stream store with consumer groups.
///
/// Clones share the same streams, so a producer and any number of consumers
/// can be handed clones of one client.
#[derive(Clone, Debug, Default)]
pub struct MemoryStreamClient {
    appended: Arc<Notify>,
    state: Arc<Mutex<State>>,
}

impl MemoryStreamClient {
    /// Creates a new, empty `MemoryStreamClient`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a consumer group on a stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BusyGroup`] if the group exists and
    /// [`Error::NoSuchStream`] if the stream is missing and `mkstream` is not
    /// set.
    pub async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
        mkstream: bool,
    ) -> Result<(), Error> {
        self.state
            .lock()
            .await
            .create_group(stream, group, start, mkstream)?;

        debug!("created group {group} on {stream} starting at {start:?}");

        Ok(())
    }

    /// Removes a consumer group and its pending entries. Returns whether the
    /// group existed.
    pub async fn destroy_group(&self, stream: &str, group: &str) -> bool {
        self.state.lock().await.destroy_group(stream, group)
    }

    /// Removes a stream with all of its groups. Returns whether it existed.
    pub async fn delete_stream(&self, stream: &str) -> bool {
        self.state.lock().await.delete_stream(stream)
    }

    /// Number of entries currently held by a stream.
    pub async fn len(&self, stream: &str) -> usize {
        self.state.lock().await.len(stream)
    }

    /// Entries delivered to members of a group and not yet acknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoGroup`] if the stream or group does not exist.
    pub async fn pending(&self, stream: &str, group: &str) -> Result<Vec<PendingEntry>, Error> {
        self.state.lock().await.pending(stream, group)
    }
}

#[async_trait]
impl StreamClient for MemoryStreamClient {
    type Error = Error;

    async fn read_group(&self, request: ReadGroupRequest) -> Result<ReadGroupReply, Self::Error> {
        // a timeout too large to represent waits like Forever
        let deadline = match request.block {
            BlockMode::Timeout(timeout) => Instant::now().checked_add(timeout),
            BlockMode::NoWait | BlockMode::Forever => None,
        };

        loop {
            // registered before looking so an append in between still wakes us
            let appended = self.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            let streams = self.state.lock().await.read_group(&request)?;
            if !streams.is_empty() {
                return Ok(ReadGroupReply::Streams(streams));
            }

            match (request.block, deadline) {
                (BlockMode::NoWait, _) => return Ok(ReadGroupReply::TimedOut),
                (_, Some(deadline)) => {
                    if time::timeout_at(deadline, appended).await.is_err() {
                        trace!(consumer = %request.consumer, "group read timed out");
                        return Ok(ReadGroupReply::TimedOut);
                    }
                }
                (_, None) => appended.await,
            }
        }
    }

    async fn ack(&self, group: &str, batches: Vec<AckBatch>) -> Result<u64, Self::Error> {
        Ok(self.state.lock().await.ack(group, batches))
    }

    async fn append(&self, request: AppendRequest) -> Result<EntryId, Self::Error> {
        let stream = request.stream.clone();
        let id = self.state.lock().await.append(request)?;

        trace!("appended {id} to {stream}");
        self.appended.notify_waiters();

        Ok(id)
    }
}
