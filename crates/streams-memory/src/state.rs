use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Excluded, Unbounded};
use std::time::{SystemTime, UNIX_EPOCH};

use proven_streams::{
    AckBatch, AppendRequest, Cursor, EntryId, Fields, GroupStart, ReadGroupRequest, StreamEntries,
};

use crate::Error;

/// An entry delivered to a consumer and not yet acknowledged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingEntry {
    /// Entry identifier.
    pub id: EntryId,

    /// Consumer the entry was delivered to.
    pub consumer: String,

    /// How many times the entry has been delivered.
    pub deliveries: u64,
}

/// Every stream and group held by a client.
#[derive(Debug, Default)]
pub struct State {
    streams: HashMap<String, Stream>,
}

#[derive(Debug, Default)]
struct Stream {
    entries: BTreeMap<EntryId, Fields>,
    groups: HashMap<String, Group>,
    last_id: EntryId,
}

#[derive(Debug)]
struct Group {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingEntry>,
}

impl Stream {
    /// Re-delivers the consumer's pending entries after `after`.
    fn replay(
        &mut self,
        group: &str,
        consumer: &str,
        after: EntryId,
        count: Option<usize>,
    ) -> Vec<(EntryId, Fields)> {
        let Self {
            entries, groups, ..
        } = self;

        let Some(group) = groups.get_mut(group) else {
            return Vec::new();
        };

        group
            .pending
            .range_mut((Excluded(after), Unbounded))
            .filter(|(_, pending)| pending.consumer == consumer)
            .take(count.unwrap_or(usize::MAX))
            .map(|(id, pending)| {
                pending.deliveries += 1;
                // trimmed entries come back without fields
                (*id, entries.get(id).cloned().unwrap_or_default())
            })
            .collect()
    }

    /// Delivers entries the group has never seen.
    fn deliver(
        &mut self,
        group: &str,
        consumer: &str,
        count: Option<usize>,
        no_ack: bool,
    ) -> Vec<(EntryId, Fields)> {
        let Self {
            entries, groups, ..
        } = self;

        let Some(group) = groups.get_mut(group) else {
            return Vec::new();
        };

        let delivered: Vec<_> = entries
            .range((Excluded(group.last_delivered), Unbounded))
            .take(count.unwrap_or(usize::MAX))
            .map(|(id, fields)| (*id, fields.clone()))
            .collect();

        if let Some((last, _)) = delivered.last() {
            group.last_delivered = *last;
        }

        if !no_ack {
            for (id, _) in &delivered {
                group.pending.insert(
                    *id,
                    PendingEntry {
                        id: *id,
                        consumer: consumer.to_string(),
                        deliveries: 1,
                    },
                );
            }
        }

        delivered
    }

    fn trim(&mut self, max_len: u64) {
        let max_len = usize::try_from(max_len).unwrap_or(usize::MAX);
        while self.entries.len() > max_len {
            self.entries.pop_first();
        }
    }
}

impl State {
    pub fn append(
        &mut self,
        AppendRequest {
            stream: name,
            id,
            max_len,
            fields,
        }: AppendRequest,
    ) -> Result<EntryId, Error> {
        if fields.is_empty() {
            return Err(Error::EmptyEntry);
        }

        let last = self
            .streams
            .get(&name)
            .map_or(EntryId::MIN, |stream| stream.last_id);

        let id = match id {
            Some(id) if id > last => id,
            Some(id) => {
                return Err(Error::IdTooSmall {
                    stream: name,
                    id,
                    last,
                });
            }
            None => next_id(last).ok_or_else(|| Error::IdTooSmall {
                stream: name.clone(),
                id: EntryId::MAX,
                last,
            })?,
        };

        let stream = self.streams.entry(name).or_default();
        stream.entries.insert(id, fields);
        stream.last_id = id;

        if let Some(max_len) = max_len {
            stream.trim(max_len.limit());
        }

        Ok(id)
    }

    pub fn read_group(&mut self, request: &ReadGroupRequest) -> Result<Vec<StreamEntries>, Error> {
        for (name, _) in &request.streams {
            let known = self
                .streams
                .get(name)
                .is_some_and(|stream| stream.groups.contains_key(&request.group));

            if !known {
                return Err(Error::NoGroup {
                    stream: name.clone(),
                    group: request.group.clone(),
                });
            }
        }

        let mut replies = Vec::new();

        for (name, cursor) in &request.streams {
            let Some(stream) = self.streams.get_mut(name) else {
                continue;
            };

            match cursor {
                Cursor::Replay(after) => {
                    let entries =
                        stream.replay(&request.group, &request.consumer, *after, request.count);
                    replies.push(StreamEntries::new(name.clone(), entries));
                }
                Cursor::Live => {
                    let entries = stream.deliver(
                        &request.group,
                        &request.consumer,
                        request.count,
                        request.no_ack,
                    );
                    if !entries.is_empty() {
                        replies.push(StreamEntries::new(name.clone(), entries));
                    }
                }
            }
        }

        Ok(replies)
    }

    pub fn ack(&mut self, group: &str, batches: Vec<AckBatch>) -> u64 {
        let mut acked = 0;

        for AckBatch { stream, ids } in batches {
            let Some(pending) = self
                .streams
                .get_mut(&stream)
                .and_then(|stream| stream.groups.get_mut(group))
                .map(|group| &mut group.pending)
            else {
                continue;
            };

            for id in ids {
                if pending.remove(&id).is_some() {
                    acked += 1;
                }
            }
        }

        acked
    }

    pub fn create_group(
        &mut self,
        name: &str,
        group: &str,
        start: GroupStart,
        mkstream: bool,
    ) -> Result<(), Error> {
        if !mkstream && !self.streams.contains_key(name) {
            return Err(Error::NoSuchStream(name.to_string()));
        }

        let stream = self.streams.entry(name.to_string()).or_default();
        if stream.groups.contains_key(group) {
            return Err(Error::BusyGroup {
                stream: name.to_string(),
                group: group.to_string(),
            });
        }

        let last_delivered = match start {
            GroupStart::Beginning => EntryId::MIN,
            GroupStart::End => stream.last_id,
            GroupStart::After(id) => id,
        };

        stream.groups.insert(
            group.to_string(),
            Group {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );

        Ok(())
    }

    pub fn destroy_group(&mut self, name: &str, group: &str) -> bool {
        self.streams
            .get_mut(name)
            .is_some_and(|stream| stream.groups.remove(group).is_some())
    }

    pub fn delete_stream(&mut self, name: &str) -> bool {
        self.streams.remove(name).is_some()
    }

    pub fn len(&self, name: &str) -> usize {
        self.streams
            .get(name)
            .map_or(0, |stream| stream.entries.len())
    }

    pub fn pending(&self, name: &str, group: &str) -> Result<Vec<PendingEntry>, Error> {
        self.streams
            .get(name)
            .and_then(|stream| stream.groups.get(group))
            .map(|group| group.pending.values().cloned().collect())
            .ok_or_else(|| Error::NoGroup {
                stream: name.to_string(),
                group: group.to_string(),
            })
    }
}

fn next_id(last: EntryId) -> Option<EntryId> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        });

    if now > last.millis() {
        Some(EntryId::new(now, 0))
    } else {
        last.successor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proven_streams::{BlockMode, MaxLen};

    fn fields(value: &'static str) -> Fields {
        Fields::from([("key".to_string(), value.into())])
    }

    fn append(state: &mut State, stream: &str, value: &'static str) -> EntryId {
        state
            .append(AppendRequest {
                stream: stream.to_string(),
                id: None,
                max_len: None,
                fields: fields(value),
            })
            .unwrap()
    }

    fn request(cursor: Cursor) -> ReadGroupRequest {
        ReadGroupRequest {
            group: "group".to_string(),
            consumer: "consumer".to_string(),
            streams: vec![("stream".to_string(), cursor)],
            count: None,
            block: BlockMode::NoWait,
            no_ack: false,
        }
    }

    #[test]
    fn test_auto_ids_increase() {
        let mut state = State::default();
        let first = append(&mut state, "stream", "a");
        let second = append(&mut state, "stream", "b");
        let third = append(&mut state, "stream", "c");

        assert!(first < second);
        assert!(second < third);
        assert_eq!(state.len("stream"), 3);
    }

    #[test]
    fn test_explicit_id_must_grow() {
        let mut state = State::default();
        let request = |id| AppendRequest {
            stream: "stream".to_string(),
            id: Some(id),
            max_len: None,
            fields: fields("a"),
        };

        assert!(matches!(
            state.append(request(EntryId::MIN)),
            Err(Error::IdTooSmall { .. })
        ));
        assert_eq!(
            state.append(request(EntryId::new(5, 1))),
            Ok(EntryId::new(5, 1))
        );
        assert!(matches!(
            state.append(request(EntryId::new(5, 1))),
            Err(Error::IdTooSmall { .. })
        ));
        assert_eq!(state.len("stream"), 1);
    }

    #[test]
    fn test_empty_entry_is_rejected() {
        let mut state = State::default();
        let result = state.append(AppendRequest {
            stream: "stream".to_string(),
            id: None,
            max_len: None,
            fields: Fields::new(),
        });

        assert_eq!(result, Err(Error::EmptyEntry));
        assert!(!state.delete_stream("stream"));
    }

    #[test]
    fn test_max_len_trims_oldest() {
        let mut state = State::default();
        for _ in 0..5 {
            state
                .append(AppendRequest {
                    stream: "stream".to_string(),
                    id: None,
                    max_len: Some(MaxLen::Exact(2)),
                    fields: fields("a"),
                })
                .unwrap();
        }

        assert_eq!(state.len("stream"), 2);
    }

    #[test]
    fn test_create_group() {
        let mut state = State::default();

        assert!(matches!(
            state.create_group("stream", "group", GroupStart::End, false),
            Err(Error::NoSuchStream(_))
        ));
        state
            .create_group("stream", "group", GroupStart::End, true)
            .unwrap();
        assert!(matches!(
            state.create_group("stream", "group", GroupStart::End, true),
            Err(Error::BusyGroup { .. })
        ));
        assert!(state.destroy_group("stream", "group"));
        assert!(!state.destroy_group("stream", "group"));
    }

    #[test]
    fn test_group_start_end_skips_existing_entries() {
        let mut state = State::default();
        append(&mut state, "stream", "old");
        state
            .create_group("stream", "group", GroupStart::End, false)
            .unwrap();
        let new = append(&mut state, "stream", "new");

        let replies = state.read_group(&request(Cursor::Live)).unwrap();
        assert_eq!(replies, vec![StreamEntries::new("stream", vec![(new, fields("new"))])]);
    }

    #[test]
    fn test_live_read_tracks_pending_and_replay_returns_it() {
        let mut state = State::default();
        state
            .create_group("stream", "group", GroupStart::Beginning, true)
            .unwrap();
        let id = append(&mut state, "stream", "a");

        let live = state.read_group(&request(Cursor::Live)).unwrap();
        assert_eq!(live[0].entries, vec![(id, fields("a"))]);

        // nothing new for the group now
        assert!(state.read_group(&request(Cursor::Live)).unwrap().is_empty());

        let replay = state.read_group(&request(Cursor::default())).unwrap();
        assert_eq!(replay[0].entries, vec![(id, fields("a"))]);

        let pending = state.pending("stream", "group").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].deliveries, 2);

        let after = state.read_group(&request(Cursor::Replay(id))).unwrap();
        assert_eq!(after, vec![StreamEntries::new("stream", Vec::new())]);
    }

    #[test]
    fn test_replay_only_returns_own_entries() {
        let mut state = State::default();
        state
            .create_group("stream", "group", GroupStart::Beginning, true)
            .unwrap();
        append(&mut state, "stream", "a");

        let mut other = request(Cursor::Live);
        other.consumer = "other".to_string();
        state.read_group(&other).unwrap();

        let replay = state.read_group(&request(Cursor::default())).unwrap();
        assert!(replay[0].entries.is_empty());
    }

    #[test]
    fn test_no_ack_skips_pending() {
        let mut state = State::default();
        state
            .create_group("stream", "group", GroupStart::Beginning, true)
            .unwrap();
        append(&mut state, "stream", "a");

        let mut request = request(Cursor::Live);
        request.no_ack = true;
        assert_eq!(state.read_group(&request).unwrap().len(), 1);
        assert!(state.pending("stream", "group").unwrap().is_empty());
    }

    #[test]
    fn test_count_limits_delivery() {
        let mut state = State::default();
        state
            .create_group("stream", "group", GroupStart::Beginning, true)
            .unwrap();
        for value in ["a", "b", "c"] {
            append(&mut state, "stream", value);
        }

        let mut request = request(Cursor::Live);
        request.count = Some(2);
        assert_eq!(state.read_group(&request).unwrap()[0].entries.len(), 2);
        assert_eq!(state.read_group(&request).unwrap()[0].entries.len(), 1);
    }

    #[test]
    fn test_ack_removes_pending() {
        let mut state = State::default();
        state
            .create_group("stream", "group", GroupStart::Beginning, true)
            .unwrap();
        let id = append(&mut state, "stream", "a");
        state.read_group(&request(Cursor::Live)).unwrap();

        let batch = || AckBatch {
            stream: "stream".to_string(),
            ids: vec![id],
        };
        assert_eq!(state.ack("group", vec![batch()]), 1);
        assert_eq!(state.ack("group", vec![batch()]), 0);
        assert!(state.pending("stream", "group").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_group_fails_without_side_effects() {
        let mut state = State::default();
        state
            .create_group("stream", "group", GroupStart::Beginning, true)
            .unwrap();
        append(&mut state, "stream", "a");

        let mut request = request(Cursor::Live);
        request.streams.push(("missing".to_string(), Cursor::Live));

        assert!(matches!(
            state.read_group(&request),
            Err(Error::NoGroup { .. })
        ));
        assert!(state.pending("stream", "group").unwrap().is_empty());
    }
}
