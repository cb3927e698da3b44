use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use shared_proto::{Message, Profile, SnapshotMessage};
use uuid::Uuid;

use super::domain::{ConversationRoom, MessageEvent};

/// Per-counterparty index of the current user's conversations.
///
/// Built from a full snapshot and then patched one event at a time, so a
/// realtime change never requires a rescan of the message log.
#[derive(Debug, Clone)]
pub struct ConversationAggregator {
    me: Uuid,
    rooms: HashMap<Uuid, RoomEntry>,
}

#[derive(Debug, Clone)]
struct RoomEntry {
    room: ConversationRoom,
    unread: HashSet<Uuid>,
}

impl RoomEntry {
    fn new(counterparty_id: Uuid, profile: Option<Profile>, message: Message) -> Self {
        Self {
            room: ConversationRoom {
                counterparty_id,
                profile,
                last_message: message,
                unread_count: 0,
            },
            unread: HashSet::new(),
        }
    }

    fn track_unread(&mut self, message: &Message, me: Uuid) {
        if message.sender_id == self.room.counterparty_id && message.is_unread_for(me) {
            self.unread.insert(message.id);
        } else {
            self.unread.remove(&message.id);
        }
        self.room.unread_count = self.unread.len();
    }
}

impl ConversationAggregator {
    pub fn new(me: Uuid) -> Self {
        Self {
            me,
            rooms: HashMap::new(),
        }
    }

    pub fn from_snapshot<I>(me: Uuid, snapshot: I) -> Self
    where
        I: IntoIterator<Item = SnapshotMessage>,
    {
        let mut aggregator = Self::new(me);
        aggregator.rebuild(snapshot);
        aggregator
    }

    pub fn me(&self) -> Uuid {
        self.me
    }

    /// Replaces the index with one derived from `snapshot`. Rooms keep
    /// their first-seen message on timestamp ties, so a newest-first
    /// snapshot is authoritative for its head rows.
    pub fn rebuild<I>(&mut self, snapshot: I)
    where
        I: IntoIterator<Item = SnapshotMessage>,
    {
        self.rooms.clear();
        for row in snapshot {
            let profile = row.counterparty_profile(self.me).cloned();
            self.absorb(row.message, profile, false);
        }
    }

    /// Patches the index with one realtime event. Returns the counterparty
    /// whose room changed, if any.
    pub fn apply(&mut self, event: &MessageEvent) -> Option<Uuid> {
        let message = event.message();
        if !message.involves(self.me) {
            return None;
        }

        match event {
            MessageEvent::Insert(message) => Some(self.absorb(message.clone(), None, true)),
            MessageEvent::Update(message) => {
                let counterparty = message.counterparty(self.me);
                let entry = self.rooms.get_mut(&counterparty)?;
                entry.track_unread(message, self.me);
                if entry.room.last_message.id == message.id {
                    entry.room.last_message = message.clone();
                }
                Some(counterparty)
            }
        }
    }

    /// Marks `ids` as read in every room. The identity of each room's last
    /// message is left untouched.
    pub fn mark_read(&mut self, ids: &[Uuid]) -> Vec<Uuid> {
        let ids: HashSet<Uuid> = ids.iter().copied().collect();
        let mut touched = Vec::new();

        for (counterparty, entry) in self.rooms.iter_mut() {
            let before = entry.unread.len();
            entry.unread.retain(|id| !ids.contains(id));
            entry.room.unread_count = entry.unread.len();

            let last = &mut entry.room.last_message;
            let last_hit = ids.contains(&last.id) && !last.is_read;
            if last_hit {
                last.is_read = true;
            }

            if last_hit || before != entry.unread.len() {
                touched.push(*counterparty);
            }
        }

        touched
    }

    pub fn attach_profile(&mut self, profile: Profile) -> bool {
        match self.rooms.get_mut(&profile.id) {
            Some(entry) => {
                entry.room.profile = Some(profile);
                true
            }
            None => false,
        }
    }

    pub fn missing_profiles(&self) -> Vec<Uuid> {
        self.rooms
            .values()
            .filter(|entry| entry.room.profile.is_none())
            .map(|entry| entry.room.counterparty_id)
            .collect()
    }

    pub fn get(&self, counterparty: &Uuid) -> Option<&ConversationRoom> {
        self.rooms.get(counterparty).map(|entry| &entry.room)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Rooms in no particular order.
    pub fn rooms(&self) -> impl Iterator<Item = &ConversationRoom> {
        self.rooms.values().map(|entry| &entry.room)
    }

    /// Rooms ordered by last message, most recent first.
    pub fn rooms_by_recency(&self) -> Vec<&ConversationRoom> {
        let mut rooms: Vec<&ConversationRoom> = self.rooms().collect();
        rooms.sort_by(|a, b| {
            b.last_message
                .created_at
                .cmp(&a.last_message.created_at)
                .then_with(|| a.counterparty_id.cmp(&b.counterparty_id))
        });
        rooms
    }

    /// Case-insensitive match on the counterparty's display name.
    pub fn search(&self, query: &str) -> Vec<&ConversationRoom> {
        let needle = query.trim().to_lowercase();
        self.rooms_by_recency()
            .into_iter()
            .filter(|room| {
                needle.is_empty()
                    || room
                        .profile
                        .as_ref()
                        .map(|p| p.full_name.to_lowercase().contains(&needle))
                        .unwrap_or(false)
            })
            .collect()
    }

    pub fn total_unread(&self) -> usize {
        self.rooms.values().map(|entry| entry.unread.len()).sum()
    }

    fn absorb(&mut self, message: Message, profile: Option<Profile>, newest_wins_ties: bool) -> Uuid {
        let me = self.me;
        let counterparty = message.counterparty(me);

        match self.rooms.entry(counterparty) {
            Entry::Vacant(slot) => {
                let mut entry = RoomEntry::new(counterparty, profile, message.clone());
                entry.track_unread(&message, me);
                slot.insert(entry);
            }
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                if entry.room.profile.is_none() {
                    entry.room.profile = profile;
                }
                entry.track_unread(&message, me);

                let last = &entry.room.last_message;
                let replaces = if last.id == message.id {
                    true
                } else if newest_wins_ties {
                    message.created_at >= last.created_at
                } else {
                    message.created_at > last.created_at
                };
                if replaces {
                    entry.room.last_message = message;
                }
            }
        }

        counterparty
    }
}
