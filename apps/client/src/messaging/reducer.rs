use std::collections::HashSet;
use std::time::{Duration, Instant};

use shared_proto::realtime::TypingSignal;
use shared_proto::{Message, Profile, Reactions, SnapshotMessage};
use uuid::Uuid;

use super::aggregator::ConversationAggregator;
use super::domain::{ConversationRoom, MessageEvent};
use super::timeline::{Applied, ConversationTimeline};
use super::typing::TypingState;

/// What one realtime event changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Counterparty whose chat-list room was patched.
    pub room: Option<Uuid>,
    /// Effect on the open conversation, if one is open.
    pub timeline: Option<Applied>,
    /// Unread incoming ids of the open conversation, when the event changed
    /// it. They are reported once and stay in flight until confirmed or
    /// released.
    pub read_receipts_due: Vec<Uuid>,
}

impl MergeOutcome {
    pub fn timeline_changed(&self) -> bool {
        self.timeline.map(Applied::changed).unwrap_or(false)
    }
}

/// Keeps the chat list and the open conversation consistent while
/// realtime events, confirmed sends and read receipts stream in.
///
/// Single writer: callers serialize access, and nothing here blocks or fails.
#[derive(Debug, Clone)]
pub struct RealtimeMergeReducer {
    me: Uuid,
    rooms: ConversationAggregator,
    open: Option<ConversationTimeline>,
    generation: u64,
    typing: Option<TypingState>,
    typing_timeout: Duration,
    receipts_in_flight: HashSet<Uuid>,
}

impl RealtimeMergeReducer {
    pub fn new(me: Uuid, typing_timeout: Duration) -> Self {
        Self {
            me,
            rooms: ConversationAggregator::new(me),
            open: None,
            generation: 0,
            typing: None,
            typing_timeout,
            receipts_in_flight: HashSet::new(),
        }
    }

    pub fn me(&self) -> Uuid {
        self.me
    }

    pub fn load_rooms<I>(&mut self, snapshot: I)
    where
        I: IntoIterator<Item = SnapshotMessage>,
    {
        self.rooms.rebuild(snapshot);
    }

    pub fn rooms(&self) -> &ConversationAggregator {
        &self.rooms
    }

    pub fn room(&self, counterparty: Uuid) -> Option<&ConversationRoom> {
        self.rooms.get(&counterparty)
    }

    pub fn attach_profile(&mut self, profile: Profile) -> bool {
        self.rooms.attach_profile(profile)
    }

    /// Opens `counterparty`'s conversation in pending state, replacing any
    /// conversation that was open before. The returned generation
    /// identifies this particular opening for [`close_if`](Self::close_if).
    pub fn open(&mut self, counterparty: Uuid) -> u64 {
        self.generation += 1;
        self.open = Some(ConversationTimeline::new(self.me, counterparty));
        self.typing = Some(TypingState::new(counterparty, self.typing_timeout));
        self.receipts_in_flight.clear();
        self.generation
    }

    pub fn close(&mut self) -> Option<Uuid> {
        self.typing = None;
        self.open.take().map(|timeline| timeline.counterparty())
    }

    /// Closes the conversation only if it is still the one opened as
    /// `generation`. A re-open of the same counterparty gets a new
    /// generation, so a stale handle never closes it.
    pub fn close_if(&mut self, generation: u64) -> bool {
        if self.open.is_some() && self.generation == generation {
            self.close();
            true
        } else {
            false
        }
    }

    pub fn is_open(&self, counterparty: Uuid) -> bool {
        self.open
            .as_ref()
            .map(|timeline| timeline.counterparty() == counterparty)
            .unwrap_or(false)
    }

    pub fn open_timeline(&self) -> Option<&ConversationTimeline> {
        self.open.as_ref()
    }

    /// Installs a fetched conversation history. A fetch that completes after
    /// the user navigated elsewhere is dropped and `false` is returned.
    pub fn load_conversation<I>(&mut self, counterparty: Uuid, snapshot: I) -> bool
    where
        I: IntoIterator<Item = Message>,
    {
        match self.open.as_mut() {
            Some(timeline) if timeline.counterparty() == counterparty => {
                timeline.load_snapshot(snapshot);
                true
            }
            _ => false,
        }
    }

    pub fn apply(&mut self, event: &MessageEvent) -> MergeOutcome {
        let room = self.rooms.apply(event);
        let timeline = self.open.as_mut().map(|timeline| timeline.apply(event));

        let unread = match (&self.open, timeline) {
            (Some(open), Some(applied)) if applied.changed() => open.unread_ids(),
            _ => Vec::new(),
        };
        let read_receipts_due = self.claim(unread);

        MergeOutcome {
            room,
            timeline,
            read_receipts_due,
        }
    }

    /// Unread incoming ids of the open conversation, once its history is
    /// loaded, minus those already being marked.
    pub fn pending_read_receipts(&self) -> Vec<Uuid> {
        match &self.open {
            Some(timeline) if timeline.is_loaded() => timeline
                .unread_ids()
                .into_iter()
                .filter(|id| !self.receipts_in_flight.contains(id))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Like [`pending_read_receipts`](Self::pending_read_receipts), but
    /// marks the returned ids as in flight.
    pub fn claim_read_receipts(&mut self) -> Vec<Uuid> {
        let pending = self.pending_read_receipts();
        self.claim(pending)
    }

    /// Returns ids whose mark-as-read request failed to the pending set.
    pub fn release_read_receipts(&mut self, ids: &[Uuid]) {
        for id in ids {
            self.receipts_in_flight.remove(id);
        }
    }

    /// Applies a confirmed mark-as-read to both views.
    pub fn confirm_read(&mut self, ids: &[Uuid]) {
        if ids.is_empty() {
            return;
        }
        self.release_read_receipts(ids);
        self.rooms.mark_read(ids);
        if let Some(timeline) = self.open.as_mut() {
            timeline.mark_read(ids);
        }
    }

    pub fn reactions_with(&self, message_id: Uuid, symbol: &str) -> Option<Reactions> {
        self.open.as_ref()?.reactions_with(message_id, symbol)
    }

    pub fn on_typing(&mut self, user_id: Uuid, signal: TypingSignal, now: Instant) -> bool {
        match self.typing.as_mut() {
            Some(typing) => typing.on_signal(user_id, signal, now),
            None => false,
        }
    }

    pub fn is_counterparty_typing(&self, now: Instant) -> bool {
        self.typing
            .as_ref()
            .map(|typing| typing.is_typing(now))
            .unwrap_or(false)
    }

    /// When the current typing flag lapses without a new signal.
    pub fn typing_deadline(&self, now: Instant) -> Option<Instant> {
        self.typing.as_ref()?.expires_at(now)
    }

    fn claim(&mut self, ids: Vec<Uuid>) -> Vec<Uuid> {
        ids.into_iter()
            .filter(|id| self.receipts_in_flight.insert(*id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::test_support::{message, snapshot, user};

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    /// The reference scenario: chat list loaded, conversation with A open.
    fn scenario() -> (Uuid, Uuid, Uuid, RealtimeMergeReducer) {
        let me = user(1);
        let a = user(0xA);
        let b = user(0xB);
        let all = vec![
            message(2, me, a, true, 20),
            message(1, a, me, false, 10),
            message(3, b, me, false, 5),
        ];

        let mut reducer = RealtimeMergeReducer::new(me, Duration::from_secs(3));
        reducer.load_rooms(snapshot(all.clone()));
        reducer.open(a);
        let with_a: Vec<Message> = all.into_iter().filter(|m| m.is_between(me, a)).collect();
        assert!(reducer.load_conversation(a, with_a));
        (me, a, b, reducer)
    }

    fn timeline_ids(reducer: &RealtimeMergeReducer) -> Vec<Uuid> {
        reducer
            .open_timeline()
            .expect("open conversation")
            .messages()
            .map(|m| m.id)
            .collect()
    }

    #[test]
    fn insert_updates_head_and_room() {
        let (me, a, _, mut reducer) = scenario();

        let outcome = reducer.apply(&MessageEvent::Insert(message(4, a, me, false, 30)));

        assert_eq!(outcome.room, Some(a));
        assert_eq!(outcome.timeline, Some(Applied::Inserted));
        assert_eq!(timeline_ids(&reducer)[0], id(4));

        let room = reducer.room(a).expect("room A");
        assert_eq!(room.last_message.id, id(4));
        assert_eq!(room.unread_count, 2);

        let mut due = outcome.read_receipts_due;
        due.sort();
        assert_eq!(due, vec![id(1), id(4)]);
    }

    #[test]
    fn read_update_decrements_room_and_keeps_position() {
        let (me, a, _, mut reducer) = scenario();
        reducer.apply(&MessageEvent::Insert(message(4, a, me, false, 30)));
        let position = reducer
            .open_timeline()
            .and_then(|t| t.position(id(1)))
            .expect("message 1 present");

        let outcome = reducer.apply(&MessageEvent::Update(message(1, a, me, true, 10)));

        assert_eq!(outcome.timeline, Some(Applied::Updated));
        assert_eq!(reducer.room(a).expect("room A").unread_count, 1);
        assert_eq!(
            reducer.open_timeline().and_then(|t| t.position(id(1))),
            Some(position)
        );
    }

    #[test]
    fn duplicate_delivery_does_not_duplicate_entries() {
        let (me, a, _, mut reducer) = scenario();
        let event = MessageEvent::Insert(message(4, a, me, false, 30));

        reducer.apply(&event);
        let second = reducer.apply(&event);

        assert_eq!(second.timeline, Some(Applied::Duplicate));
        assert!(second.read_receipts_due.is_empty());
        assert_eq!(timeline_ids(&reducer), vec![id(4), id(2), id(1)]);
        assert_eq!(reducer.room(a).expect("room A").unread_count, 2);
    }

    #[test]
    fn update_for_absent_id_is_a_no_op() {
        let (me, a, b, mut reducer) = scenario();

        let outcome = reducer.apply(&MessageEvent::Update(message(99, a, me, true, 1)));
        assert_eq!(outcome.timeline, Some(Applied::Ignored));
        assert_eq!(timeline_ids(&reducer).len(), 2);

        // Belongs to a conversation that is not open: only the chat list moves.
        let outcome = reducer.apply(&MessageEvent::Update(message(3, b, me, true, 5)));
        assert_eq!(outcome.room, Some(b));
        assert_eq!(outcome.timeline, Some(Applied::Ignored));
        assert_eq!(reducer.room(b).expect("room B").unread_count, 0);
    }

    #[test]
    fn confirmed_read_zeroes_both_rooms() {
        let (_, a, b, mut reducer) = scenario();
        assert_eq!(reducer.pending_read_receipts(), vec![id(1)]);

        reducer.confirm_read(&[id(1), id(3)]);

        let room_a = reducer.room(a).expect("room A");
        let room_b = reducer.room(b).expect("room B");
        assert_eq!(room_a.unread_count, 0);
        assert_eq!(room_b.unread_count, 0);
        assert_eq!(room_a.last_message.id, id(2));
        assert_eq!(room_b.last_message.id, id(3));
        assert!(reducer.pending_read_receipts().is_empty());
    }

    #[test]
    fn closing_stops_timeline_mutation_but_keeps_chat_list_live() {
        let (me, a, _, mut reducer) = scenario();
        assert_eq!(reducer.close(), Some(a));

        let outcome = reducer.apply(&MessageEvent::Insert(message(4, a, me, false, 30)));
        assert_eq!(outcome.timeline, None);
        assert!(reducer.open_timeline().is_none());
        assert_eq!(reducer.room(a).expect("room A").last_message.id, id(4));
    }

    #[test]
    fn late_snapshot_for_closed_conversation_is_dropped() {
        let me = user(1);
        let a = user(0xA);
        let b = user(0xB);
        let mut reducer = RealtimeMergeReducer::new(me, Duration::from_secs(3));

        reducer.open(a);
        reducer.open(b);
        assert!(!reducer.load_conversation(a, vec![message(1, a, me, false, 1)]));
        assert!(reducer.is_open(b));
        assert!(reducer.open_timeline().map(|t| t.is_empty()).unwrap_or(false));
    }

    #[test]
    fn pending_receipts_wait_for_history() {
        let me = user(1);
        let a = user(0xA);
        let mut reducer = RealtimeMergeReducer::new(me, Duration::from_secs(3));
        reducer.open(a);

        let outcome = reducer.apply(&MessageEvent::Insert(message(5, a, me, false, 50)));
        assert_eq!(outcome.timeline, Some(Applied::Buffered));
        assert!(reducer.pending_read_receipts().is_empty());

        reducer.load_conversation(a, Vec::new());
        assert_eq!(reducer.pending_read_receipts(), vec![id(5)]);
    }

    #[test]
    fn reactions_resolve_in_open_conversation_only() {
        let (_, _, _, mut reducer) = scenario();
        let reactions = reducer.reactions_with(id(2), "😂").expect("message in view");
        assert_eq!(reactions.count("😂"), 1);
        assert!(reducer.reactions_with(id(3), "😂").is_none());

        reducer.close();
        assert!(reducer.reactions_with(id(2), "😂").is_none());
    }

    #[test]
    fn close_if_leaves_a_newer_conversation_open() {
        let me = user(1);
        let a = user(0xA);
        let b = user(0xB);
        let mut reducer = RealtimeMergeReducer::new(me, Duration::from_secs(3));
        let first = reducer.open(a);
        let second = reducer.open(b);

        assert!(!reducer.close_if(first));
        assert!(reducer.is_open(b));
        assert!(reducer.close_if(second));
        assert!(reducer.open_timeline().is_none());
        assert!(!reducer.close_if(second));
    }

    #[test]
    fn stale_handle_for_same_counterparty_keeps_reopened_view() {
        let me = user(1);
        let a = user(0xA);
        let mut reducer = RealtimeMergeReducer::new(me, Duration::from_secs(3));

        let stale = reducer.open(a);
        let current = reducer.open(a);
        assert_ne!(stale, current);
        assert!(reducer.load_conversation(a, vec![message(1, a, me, true, 10)]));

        assert!(!reducer.close_if(stale));
        assert!(reducer.is_open(a));

        let outcome = reducer.apply(&MessageEvent::Insert(message(2, a, me, true, 20)));
        assert_eq!(outcome.timeline, Some(Applied::Inserted));
        assert_eq!(timeline_ids(&reducer), vec![id(2), id(1)]);
    }

    #[test]
    fn receipts_in_flight_are_not_reported_twice() {
        let (me, a, _, mut reducer) = scenario();
        assert_eq!(reducer.claim_read_receipts(), vec![id(1)]);
        assert!(reducer.pending_read_receipts().is_empty());

        // A reaction echo on another message changes the view while the
        // first mark-as-read is still outstanding.
        let outcome = reducer.apply(&MessageEvent::Update(message(2, me, a, true, 20)));
        assert_eq!(outcome.timeline, Some(Applied::Updated));
        assert!(outcome.read_receipts_due.is_empty());

        let outcome = reducer.apply(&MessageEvent::Insert(message(4, a, me, false, 30)));
        assert_eq!(outcome.read_receipts_due, vec![id(4)]);

        reducer.confirm_read(&[id(1)]);
        assert_eq!(reducer.room(a).expect("room A").unread_count, 1);
        assert!(reducer.pending_read_receipts().is_empty());
    }

    #[test]
    fn released_receipts_become_pending_again() {
        let (_, a, _, mut reducer) = scenario();
        let claimed = reducer.claim_read_receipts();
        assert_eq!(claimed, vec![id(1)]);

        reducer.release_read_receipts(&claimed);

        assert_eq!(reducer.pending_read_receipts(), vec![id(1)]);
        assert_eq!(reducer.room(a).expect("room A").unread_count, 1);
    }

    #[test]
    fn typing_flag_tracks_open_counterparty() {
        let (_, a, b, mut reducer) = scenario();
        let t0 = Instant::now();

        assert!(!reducer.on_typing(b, TypingSignal::Typing, t0));
        assert!(reducer.on_typing(a, TypingSignal::Typing, t0));
        assert!(reducer.is_counterparty_typing(t0 + Duration::from_secs(1)));
        assert!(!reducer.is_counterparty_typing(t0 + Duration::from_secs(3)));

        reducer.close();
        assert!(!reducer.is_counterparty_typing(t0));
    }

    #[test]
    fn typing_deadline_follows_latest_signal() {
        let (_, a, _, mut reducer) = scenario();
        let t0 = Instant::now();
        assert_eq!(reducer.typing_deadline(t0), None);

        reducer.on_typing(a, TypingSignal::Typing, t0);
        assert_eq!(reducer.typing_deadline(t0), Some(t0 + Duration::from_secs(3)));

        let t1 = t0 + Duration::from_secs(1);
        reducer.on_typing(a, TypingSignal::Typing, t1);
        assert_eq!(reducer.typing_deadline(t1), Some(t1 + Duration::from_secs(3)));
        assert_eq!(reducer.typing_deadline(t1 + Duration::from_secs(3)), None);
    }
}
