use std::error::Error;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

use crate::cursor::Cursor;
use crate::entry::{EntryId, Fields};

/// Marker trait for store client errors.
pub trait StreamClientError: Debug + Error + Send + Sync + 'static {}

/// How long a group read may wait for entries to arrive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlockMode {
    /// Return immediately when nothing is available.
    NoWait,

    /// Wait until something is available.
    #[default]
    Forever,

    /// Wait up to the given duration.
    Timeout(Duration),
}

impl BlockMode {
    /// Maps a signed millisecond duration: negative never blocks, zero blocks
    /// indefinitely, positive blocks up to that many milliseconds.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        match millis {
            i64::MIN..=-1 => Self::NoWait,
            0 => Self::Forever,
            millis => Self::Timeout(Duration::from_millis(millis.unsigned_abs())),
        }
    }

    /// Whether a read that timed out should simply be issued again.
    #[must_use]
    pub const fn waits(&self) -> bool {
        !matches!(self, Self::NoWait)
    }
}

/// A batched read across several streams as one member of a consumer group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadGroupRequest {
    /// Consumer group name.
    pub group: String,

    /// Identity of the reading consumer within the group.
    pub consumer: String,

    /// Streams to read and the cursor for each, in request order.
    pub streams: Vec<(String, Cursor)>,

    /// Maximum number of entries per stream.
    pub count: Option<usize>,

    /// How long to wait when nothing is available.
    pub block: BlockMode,

    /// Skip adding delivered entries to the pending list.
    pub no_ack: bool,
}

/// Entries returned for one stream, in identifier order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamEntries {
    /// Stream name.
    pub stream: String,

    /// Entries read, oldest first. Empty when a replay read found no backlog.
    pub entries: Vec<(EntryId, Fields)>,
}

impl StreamEntries {
    /// Creates a new set of entries for a stream.
    pub fn new(stream: impl Into<String>, entries: Vec<(EntryId, Fields)>) -> Self {
        Self {
            stream: stream.into(),
            entries,
        }
    }
}

/// Outcome of a group read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadGroupReply {
    /// Nothing arrived within the wait window.
    TimedOut,

    /// Entries per stream. Streams with nothing new on the live tail may be
    /// absent.
    Streams(Vec<StreamEntries>),
}

/// Identifiers to acknowledge on one stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckBatch {
    /// Stream name.
    pub stream: String,

    /// Identifiers to acknowledge.
    pub ids: Vec<EntryId>,
}

/// Length cap applied to a stream on every append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaxLen {
    /// Trim to exactly this many entries.
    Exact(u64),

    /// Trim to roughly this many entries, letting the store trim lazily.
    Approximate(u64),
}

impl MaxLen {
    /// The configured length.
    #[must_use]
    pub const fn limit(&self) -> u64 {
        match self {
            Self::Exact(limit) | Self::Approximate(limit) => *limit,
        }
    }
}

/// A single append to a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppendRequest {
    /// Stream name.
    pub stream: String,

    /// Explicit identifier, or `None` to let the store assign one.
    pub id: Option<EntryId>,

    /// Optional length cap.
    pub max_len: Option<MaxLen>,

    /// Field values.
    pub fields: Fields,
}

/// Where a newly created consumer group starts delivering from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GroupStart {
    /// Deliver every entry in the stream.
    Beginning,

    /// Deliver only entries appended after the group is created.
    #[default]
    End,

    /// Deliver entries after the given identifier.
    After(EntryId),
}

/// A connection to a store holding consumer-group streams.
///
/// Implementations own connection management, the wire protocol and any retry
/// policy. They must report an empty wait window as
/// [`ReadGroupReply::TimedOut`] rather than as an error.
#[async_trait]
pub trait StreamClient: Clone + Debug + Send + Sync + 'static {
    /// The error type for the client.
    type Error: StreamClientError;

    /// Reads the next entries for each requested stream.
    async fn read_group(&self, request: ReadGroupRequest) -> Result<ReadGroupReply, Self::Error>;

    /// Acknowledges entries on one or more streams in a single round-trip.
    ///
    /// Returns how many identifiers were removed from the pending list.
    async fn ack(&self, group: &str, batches: Vec<AckBatch>) -> Result<u64, Self::Error>;

    /// Appends an entry and returns its identifier.
    async fn append(&self, request: AppendRequest) -> Result<EntryId, Self::Error>;
}
