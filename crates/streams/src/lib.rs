//! Consumer-group reads and writes over append-only streams.
//!
//! The [`Consumer`] keeps one [`Cursor`] per subscribed stream and turns a
//! store's group-read primitive into a resumable sequence of batches: it first
//! replays entries this consumer was handed but never acknowledged, then
//! follows the live tail. The [`Producer`] appends single entries.
//!
//! Both are generic over a [`StreamClient`], which owns the connection and the
//! wire protocol to the store.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// The store collaborator and its request/reply types.
pub mod client;

/// Consumers read streams as members of a consumer group.
pub mod consumer;

/// Per-stream read positions.
pub mod cursor;

/// Entries and entry identifiers.
pub mod entry;

/// Producers append entries to a stream.
pub mod producer;

#[cfg(test)]
mod scripted;

pub use client::{
    AckBatch, AppendRequest, BlockMode, GroupStart, MaxLen, ReadGroupReply, ReadGroupRequest,
    StreamClient, StreamClientError, StreamEntries,
};
pub use consumer::{Consumer, ConsumerOptions};
pub use cursor::Cursor;
pub use entry::{Entry, EntryId, Fields, ParseEntryIdError};
pub use producer::{Producer, ProducerOptions};
