use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::entry::EntryId;

/// Wire token asking the store for entries never delivered to the group.
pub const LIVE_TOKEN: &str = ">";

/// Read position for one subscribed stream.
///
/// A cursor starts in [`Cursor::Replay`] at [`EntryId::MIN`] and moves to
/// [`Cursor::Live`] once a replay read comes back empty. There is no way back.
///
/// The store owns the authoritative delivery state. The cursor only selects
/// which kind of read to ask for next, so a fresh consumer rebuilds it simply
/// by replaying from the start.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Cursor {
    /// Re-reading entries already delivered to this consumer but not yet
    /// acknowledged, strictly after the given identifier.
    Replay(EntryId),

    /// Reading entries not yet delivered to any consumer in the group.
    Live,
}

impl Cursor {
    /// Whether the cursor follows the live tail.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    /// The token sent to the store for this cursor.
    #[must_use]
    pub fn token(&self) -> String {
        self.to_string()
    }

    /// Marks the replay backlog as exhausted.
    pub const fn go_live(&mut self) {
        *self = Self::Live;
    }

    /// Records the last entry delivered while replaying.
    ///
    /// Live cursors stay live.
    pub const fn advance(&mut self, id: EntryId) {
        if let Self::Replay(last) = self {
            *last = id;
        }
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::Replay(EntryId::MIN)
    }
}

impl Display for Cursor {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Replay(id) => Display::fmt(id, f),
            Self::Live => f.write_str(LIVE_TOKEN),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_replaying_from_the_beginning() {
        let cursor = Cursor::default();
        assert_eq!(cursor, Cursor::Replay(EntryId::MIN));
        assert_eq!(cursor.token(), "0-0");
        assert!(!cursor.is_live());
    }

    #[test]
    fn test_advance_while_replaying() {
        let mut cursor = Cursor::default();
        cursor.advance(EntryId::new(7, 3));
        assert_eq!(cursor, Cursor::Replay(EntryId::new(7, 3)));
        assert_eq!(cursor.token(), "7-3");
    }

    #[test]
    fn test_live_is_terminal() {
        let mut cursor = Cursor::default();
        cursor.go_live();
        assert!(cursor.is_live());
        assert_eq!(cursor.token(), LIVE_TOKEN);

        cursor.advance(EntryId::new(9, 0));
        assert_eq!(cursor, Cursor::Live);
    }
}
