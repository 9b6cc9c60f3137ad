use thiserror::Error;

use crate::client::StreamClientError;

/// Errors that can occur in a producer.
#[derive(Debug, Error)]
pub enum Error<E>
where
    E: StreamClientError,
{
    /// The store client failed.
    #[error(transparent)]
    Client(E),

    /// Entries must carry at least one field.
    #[error("entry has no fields")]
    EmptyEntry,
}
