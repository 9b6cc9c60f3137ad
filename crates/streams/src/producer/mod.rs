mod error;

pub use error::Error;

use crate::client::{AppendRequest, MaxLen, StreamClient};
use crate::entry::{EntryId, Fields};

use bytes::Bytes;
use tracing::trace;

/// Options for a producer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProducerOptions {
    /// Stream to append to.
    pub stream: String,

    /// Length cap applied on every append.
    pub max_len: Option<MaxLen>,
}

/// Appends entries to a single stream.
#[derive(Clone, Debug)]
pub struct Producer<C>
where
    C: StreamClient,
{
    client: C,
    max_len: Option<MaxLen>,
    stream: String,
}

impl<C> Producer<C>
where
    C: StreamClient,
{
    /// Creates a new producer.
    #[must_use]
    pub fn new(client: C, ProducerOptions { stream, max_len }: ProducerOptions) -> Self {
        Self {
            client,
            max_len,
            stream,
        }
    }

    /// Returns the name of the stream.
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Appends an entry with a store-assigned identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyEntry`] if there are no fields and
    /// [`Error::Client`] if the store rejects the append.
    pub async fn write<I, K, V>(&self, fields: I) -> Result<EntryId, Error<C::Error>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Bytes>,
    {
        self.append(collect_fields(fields), None).await
    }

    /// Appends an entry with an explicit identifier, which must be greater
    /// than every identifier already in the stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyEntry`] if there are no fields and
    /// [`Error::Client`] if the store rejects the append.
    pub async fn write_with_id<I, K, V>(
        &self,
        fields: I,
        id: EntryId,
    ) -> Result<EntryId, Error<C::Error>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Bytes>,
    {
        self.append(collect_fields(fields), Some(id)).await
    }

    async fn append(
        &self,
        fields: Fields,
        id: Option<EntryId>,
    ) -> Result<EntryId, Error<C::Error>> {
        if fields.is_empty() {
            return Err(Error::EmptyEntry);
        }

        let id = self
            .client
            .append(AppendRequest {
                stream: self.stream.clone(),
                id,
                max_len: self.max_len,
                fields,
            })
            .await
            .map_err(Error::Client)?;

        trace!("appended {id} to {}", self.stream);

        Ok(id)
    }
}

fn collect_fields<I, K, V>(fields: I) -> Fields
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Bytes>,
{
    fields
        .into_iter()
        .map(|(field, value)| (field.into(), value.into()))
        .collect()
}
