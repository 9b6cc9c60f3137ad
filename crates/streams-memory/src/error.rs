use proven_streams::{EntryId, StreamClientError};
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A consumer group with this name already exists on the stream.
    #[error("consumer group {group} already exists on {stream}")]
    BusyGroup {
        /// Stream name.
        stream: String,

        /// Group name.
        group: String,
    },

    /// Appends must carry at least one field.
    #[error("entry has no fields")]
    EmptyEntry,

    /// An explicit identifier was not greater than the stream's last one.
    #[error("entry id {id} is not greater than the last id {last} of {stream}")]
    IdTooSmall {
        /// Stream name.
        stream: String,

        /// Identifier requested.
        id: EntryId,

        /// Last identifier in the stream.
        last: EntryId,
    },

    /// The stream or the consumer group does not exist.
    #[error("no consumer group {group} on {stream}")]
    NoGroup {
        /// Stream name.
        stream: String,

        /// Group name.
        group: String,
    },

    /// The stream does not exist.
    #[error("no such stream: {0}")]
    NoSuchStream(String),
}

impl StreamClientError for Error {}
