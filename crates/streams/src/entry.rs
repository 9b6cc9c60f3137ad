use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use bytes::Bytes;
use thiserror::Error;

/// Field name to opaque value mapping carried by an entry.
pub type Fields = BTreeMap<String, Bytes>;

/// Identifier of an entry within a stream.
///
/// Rendered as `<milliseconds>-<sequence>`. Identifiers are ordered by
/// milliseconds first, then sequence, which matches the order the store
/// assigns them in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId {
    millis: u64,
    sequence: u64,
}

impl EntryId {
    /// The lowest possible identifier (`0-0`).
    pub const MIN: Self = Self::new(0, 0);

    /// The highest possible identifier.
    pub const MAX: Self = Self::new(u64::MAX, u64::MAX);

    /// Creates an identifier from its two parts.
    #[must_use]
    pub const fn new(millis: u64, sequence: u64) -> Self {
        Self { millis, sequence }
    }

    /// The millisecond part.
    #[must_use]
    pub const fn millis(&self) -> u64 {
        self.millis
    }

    /// The sequence part.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The smallest identifier greater than this one, if any.
    #[must_use]
    pub const fn successor(&self) -> Option<Self> {
        if self.sequence < u64::MAX {
            Some(Self::new(self.millis, self.sequence + 1))
        } else if self.millis < u64::MAX {
            Some(Self::new(self.millis + 1, 0))
        } else {
            None
        }
    }
}

impl Display for EntryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}-{}", self.millis, self.sequence)
    }
}

/// Error returned when a string is not a valid entry identifier.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid stream entry id: {0:?}")]
pub struct ParseEntryIdError(String);

impl FromStr for EntryId {
    type Err = ParseEntryIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseEntryIdError(s.to_string());

        let (millis, sequence) = match s.split_once('-') {
            Some((millis, sequence)) => (millis, Some(sequence)),
            None => (s, None),
        };

        let millis = millis.parse::<u64>().map_err(|_| invalid())?;
        let sequence = match sequence {
            Some(sequence) => sequence.parse::<u64>().map_err(|_| invalid())?,
            None => 0,
        };

        Ok(Self::new(millis, sequence))
    }
}

/// An entry read from a stream.
///
/// Entries are snapshots; the consumer keeps nothing once a batch is handed
/// out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    /// Name of the stream the entry was read from.
    pub stream: String,

    /// Store-assigned identifier.
    pub id: EntryId,

    /// Field values.
    pub fields: Fields,
}

impl Entry {
    /// Creates a new entry.
    pub fn new(stream: impl Into<String>, id: EntryId, fields: Fields) -> Self {
        Self {
            stream: stream.into(),
            id,
            fields,
        }
    }

    /// Returns the value of a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Bytes> {
        self.fields.get(field)
    }
}
