use thiserror::Error;

use crate::client::StreamClientError;

/// Errors that can occur in a consumer.
#[derive(Debug, Error)]
pub enum Error<E>
where
    E: StreamClientError,
{
    /// The caller cancelled the read.
    #[error("read cancelled")]
    Cancelled,

    /// The store client failed.
    #[error(transparent)]
    Client(E),

    /// The consumer options are unusable.
    #[error("invalid consumer options: {0}")]
    InvalidOptions(String),

    /// No streams were subscribed.
    #[error("consumer must subscribe to at least one stream")]
    NoStreams,
}
