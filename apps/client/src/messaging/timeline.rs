use std::collections::{HashSet, VecDeque};

use shared_proto::{Message, Reactions};
use uuid::Uuid;

use super::domain::MessageEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Updated,
    /// Insert for an id already present.
    Duplicate,
    /// Held until the snapshot lands.
    Buffered,
    /// Unknown id on update, or a message from another conversation.
    Ignored,
}

impl Applied {
    pub fn changed(self) -> bool {
        matches!(self, Applied::Inserted | Applied::Updated)
    }
}

/// Newest-first message list of the open conversation.
///
/// A timeline starts out pending: events that race ahead of the snapshot
/// fetch are buffered and replayed on top of it, deduplicated by id.
#[derive(Debug, Clone)]
pub struct ConversationTimeline {
    me: Uuid,
    counterparty: Uuid,
    messages: VecDeque<Message>,
    ids: HashSet<Uuid>,
    pending: Option<Vec<MessageEvent>>,
}

impl ConversationTimeline {
    pub fn new(me: Uuid, counterparty: Uuid) -> Self {
        Self {
            me,
            counterparty,
            messages: VecDeque::new(),
            ids: HashSet::new(),
            pending: Some(Vec::new()),
        }
    }

    pub fn counterparty(&self) -> Uuid {
        self.counterparty
    }

    pub fn is_loaded(&self) -> bool {
        self.pending.is_none()
    }

    /// Installs the fetched history (expected newest first) and replays
    /// whatever arrived while it was in flight.
    pub fn load_snapshot<I>(&mut self, snapshot: I)
    where
        I: IntoIterator<Item = Message>,
    {
        self.messages.clear();
        self.ids.clear();
        for message in snapshot {
            if !message.is_between(self.me, self.counterparty) {
                continue;
            }
            if self.ids.insert(message.id) {
                self.messages.push_back(message);
            }
        }

        let buffered = self.pending.take().unwrap_or_default();
        for event in &buffered {
            self.apply(event);
        }
    }

    pub fn apply(&mut self, event: &MessageEvent) -> Applied {
        if !event.message().is_between(self.me, self.counterparty) {
            return Applied::Ignored;
        }

        if let Some(buffer) = self.pending.as_mut() {
            buffer.push(event.clone());
            return Applied::Buffered;
        }

        match event {
            MessageEvent::Insert(message) => {
                if !self.ids.insert(message.id) {
                    return Applied::Duplicate;
                }
                // No re-sort: inserts are assumed to arrive in creation order.
                self.messages.push_front(message.clone());
                Applied::Inserted
            }
            MessageEvent::Update(message) => match self.find_mut(message.id) {
                Some(slot) => {
                    *slot = message.clone();
                    Applied::Updated
                }
                None => Applied::Ignored,
            },
        }
    }

    /// Ids of messages received from the counterparty that are still unread.
    pub fn unread_ids(&self) -> Vec<Uuid> {
        self.messages
            .iter()
            .filter(|m| m.sender_id == self.counterparty && m.is_unread_for(self.me))
            .map(|m| m.id)
            .collect()
    }

    pub fn mark_read(&mut self, ids: &[Uuid]) -> usize {
        let ids: HashSet<Uuid> = ids.iter().copied().collect();
        let mut changed = 0;
        for message in self.messages.iter_mut() {
            if ids.contains(&message.id) && !message.is_read {
                message.is_read = true;
                changed += 1;
            }
        }
        changed
    }

    /// Full reaction map to persist after bumping `symbol` on the message.
    /// The timeline itself only changes once the backend echoes the row.
    /// Concurrent reactions resolve as last write wins.
    pub fn reactions_with(&self, id: Uuid, symbol: &str) -> Option<Reactions> {
        let mut reactions = self.get(id)?.reactions.clone();
        reactions.increment(symbol);
        Some(reactions)
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn head(&self) -> Option<&Message> {
        self.messages.front()
    }

    pub fn get(&self, id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn position(&self, id: Uuid) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn find_mut(&mut self, id: Uuid) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }
}
