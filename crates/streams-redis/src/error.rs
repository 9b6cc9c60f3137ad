use proven_streams::{ParseEntryIdError, StreamClientError};
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The server returned an entry identifier that could not be parsed.
    #[error(transparent)]
    InvalidId(#[from] ParseEntryIdError),

    /// Connection, protocol or command error from Redis.
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

impl StreamClientError for Error {}
