use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use shared_proto::realtime::{
    BroadcastConfig, ChannelConfig, PostgresChangeFilter, TypingPayload, TypingSignal,
};
use shared_proto::{ContentType, Message, NewMessage, Profile};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span};
use uuid::Uuid;
use validator::Validate;

use crate::api::{refresh_delay, Backend};
use crate::contacts::{ContactDirectory, ContactResolution, ContactSource, DeviceContact};
use crate::error::{AppError, AppErrorCode, AppResult};
use crate::messaging::{Applied, ConversationRoom, MessageEvent, RealtimeMergeReducer};
use crate::observability;
use crate::protocol::{MESSAGES_CHANNEL, MESSAGES_TABLE, PUBLIC_SCHEMA, TYPING_CHANNEL};
use crate::realtime::{
    decode_message_event, decode_typing_signal, ChannelEvent, ChannelSender, RealtimeClient,
    Subscription,
};
use crate::validation::{OutgoingText, ReactionRequest};

/// Wait before retrying a session refresh that failed on the network.
const REFRESH_RETRY: Duration = Duration::from_secs(15);

/// Notification that a view should re-read state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewChange {
    Room(Uuid),
    /// A message of the open conversation was inserted or replaced.
    Timeline { applied: Applied, message_id: Uuid },
    Typing(bool),
    Disconnected,
}

/// Realtime filters take a single column, so the two directions of
/// `me`'s traffic are two entries of the same channel.
fn messages_config(me: Uuid) -> ChannelConfig {
    ChannelConfig {
        postgres_changes: vec![
            PostgresChangeFilter::all_events(PUBLIC_SCHEMA, MESSAGES_TABLE)
                .with_filter(format!("sender_id=eq.{me}")),
            PostgresChangeFilter::all_events(PUBLIC_SCHEMA, MESSAGES_TABLE)
                .with_filter(format!("receiver_id=eq.{me}")),
        ],
        ..ChannelConfig::default()
    }
}

fn typing_config() -> ChannelConfig {
    ChannelConfig {
        broadcast: BroadcastConfig {
            ack: false,
            echo_self: false,
        },
        ..ChannelConfig::default()
    }
}

/// Signed-in chat session: backend calls, the realtime socket and the
/// merge state they feed.
#[derive(Clone)]
pub struct ChatService {
    backend: Backend,
    realtime: RealtimeClient,
    me: Uuid,
    state: Arc<Mutex<RealtimeMergeReducer>>,
    span: Span,
    _refresh: Arc<TaskGuard>,
}

/// Aborts the task when the last owner goes away.
struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl ChatService {
    /// Starts the session for the signed-in user. The session token is
    /// refreshed ahead of its expiry for as long as the service lives.
    pub async fn connect(backend: Backend) -> AppResult<Self> {
        let user = backend.current_user().await?;
        let span = observability::session_span(user.id);
        let realtime = RealtimeClient::connect(
            backend.config.realtime_url()?,
            backend.config.heartbeat_interval,
        )
        .await?;
        let state = RealtimeMergeReducer::new(user.id, backend.config.typing_timeout);
        let refresh = tokio::spawn(
            keep_session_fresh(backend.clone(), realtime.clone()).instrument(span.clone()),
        );

        span.in_scope(|| tracing::info!(component = "chat", "chat session started"));
        Ok(Self {
            backend,
            realtime,
            me: user.id,
            state: Arc::new(Mutex::new(state)),
            span,
            _refresh: Arc::new(TaskGuard(refresh)),
        })
    }

    pub fn me(&self) -> Uuid {
        self.me
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub async fn set_online(&self, online: bool) -> AppResult<()> {
        self.backend.set_presence(self.me, online).await
    }

    /// Reloads the chat list from a full snapshot.
    pub async fn refresh_rooms(&self) -> AppResult<Vec<ConversationRoom>> {
        let snapshot = self.backend.list_messages(self.me).await?;
        tracing::info!(component = "chat", messages = snapshot.len(), "chat list snapshot loaded");

        self.state.lock().await.load_rooms(snapshot);
        self.resolve_missing_profiles().await;
        Ok(self.rooms().await)
    }

    pub async fn rooms(&self) -> Vec<ConversationRoom> {
        let state = self.state.lock().await;
        state.rooms().rooms_by_recency().into_iter().cloned().collect()
    }

    pub async fn search_rooms(&self, query: &str) -> Vec<ConversationRoom> {
        let state = self.state.lock().await;
        state.rooms().search(query).into_iter().cloned().collect()
    }

    /// Open conversation, newest first.
    pub async fn open_messages(&self) -> Vec<Message> {
        let state = self.state.lock().await;
        state
            .open_timeline()
            .map(|timeline| timeline.messages().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn open_message(&self, id: Uuid) -> Option<Message> {
        let state = self.state.lock().await;
        state.open_timeline()?.get(id).cloned()
    }

    pub async fn is_counterparty_typing(&self) -> bool {
        self.state.lock().await.is_counterparty_typing(Instant::now())
    }

    /// Keeps the chat list live until the returned feed is dropped.
    pub async fn watch_messages(&self) -> AppResult<MessageFeed> {
        let subscription = self
            .realtime
            .subscribe(MESSAGES_CHANNEL, messages_config(self.me), self.backend.access_token().await)
            .await?;
        let (changes_tx, changes) = mpsc::unbounded_channel();
        let task = tokio::spawn(
            self.clone()
                .pump_messages(subscription, changes_tx)
                .instrument(self.span.clone()),
        );
        Ok(MessageFeed { changes, task })
    }

    /// Opens the conversation with `counterparty`. Live events are
    /// subscribed before the history fetch so nothing falls in between.
    pub async fn open_conversation(&self, counterparty: Uuid) -> AppResult<ConversationView> {
        let generation = self.state.lock().await.open(counterparty);
        let span = observability::conversation_span(&self.span, counterparty, generation);

        let (changes_tx, changes) = mpsc::unbounded_channel();
        let mut view = ConversationView {
            counterparty,
            generation,
            profile: None,
            changes,
            tasks: Vec::new(),
            typing: None,
            typing_timer: None,
            service: self.clone(),
        };

        let token = self.backend.access_token().await;
        let messages = self
            .realtime
            .subscribe(
                &format!("{MESSAGES_CHANNEL}:{counterparty}"),
                messages_config(self.me),
                token.clone(),
            )
            .await?;
        let typing = self
            .realtime
            .subscribe(TYPING_CHANNEL, typing_config(), token)
            .await?;
        view.typing = Some(typing.sender());
        view.tasks.push(tokio::spawn(
            self.clone()
                .pump_messages(messages, changes_tx.clone())
                .instrument(span.clone()),
        ));
        view.tasks.push(tokio::spawn(
            self.clone()
                .pump_typing(typing, changes_tx)
                .instrument(span),
        ));

        let (profile, history) = tokio::join!(
            self.backend.fetch_profile(counterparty),
            self.backend.list_conversation(self.me, counterparty)
        );
        match profile {
            Ok(profile) => {
                self.state.lock().await.attach_profile(profile.clone());
                view.profile = Some(profile);
            }
            Err(err) => {
                tracing::warn!(component = "chat", counterparty = %counterparty, error = %err, "profile lookup failed");
            }
        }

        let history = history?;
        if !self
            .state
            .lock()
            .await
            .load_conversation(counterparty, history)
        {
            return Err(AppError::internal("Conversation was closed while loading"));
        }

        if let Err(err) = self.mark_visible_read().await {
            tracing::warn!(component = "chat", counterparty = %counterparty, error = %err, "mark as read failed");
        }
        Ok(view)
    }

    /// Marks every unread incoming message of the open conversation as read.
    pub async fn mark_visible_read(&self) -> AppResult<usize> {
        let ids = self.state.lock().await.claim_read_receipts();
        self.confirm_read(ids).await
    }

    /// Sends claimed receipts. Local state changes only once the backend
    /// accepted them; on failure the ids become pending again.
    async fn confirm_read(&self, ids: Vec<Uuid>) -> AppResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        if let Err(err) = self.backend.mark_read(&ids).await {
            self.state.lock().await.release_read_receipts(&ids);
            return Err(err);
        }
        self.state.lock().await.confirm_read(&ids);
        tracing::debug!(component = "chat", count = ids.len(), "messages marked as read");
        Ok(ids.len())
    }

    pub async fn send_text(&self, to: Uuid, content: &str) -> AppResult<Message> {
        OutgoingText {
            content: content.to_string(),
        }
        .validate()?;

        let row = self
            .backend
            .create_message(&NewMessage::text(self.me, to, content))
            .await?;
        self.apply_confirmed(MessageEvent::Insert(row.clone())).await;
        Ok(row)
    }

    pub async fn send_attachment(
        &self,
        to: Uuid,
        path: &Path,
        kind: ContentType,
        caption: &str,
    ) -> AppResult<Message> {
        let file_url = self.backend.upload_file(path, kind).await?;
        let row = self
            .backend
            .create_message(&NewMessage::attachment(self.me, to, caption, kind, file_url))
            .await?;
        self.apply_confirmed(MessageEvent::Insert(row.clone())).await;
        Ok(row)
    }

    /// Adds one `symbol` reaction to a message of the open conversation.
    pub async fn react(&self, message_id: Uuid, symbol: &str) -> AppResult<Message> {
        ReactionRequest {
            emoji: symbol.to_string(),
        }
        .validate()?;

        let reactions = self
            .state
            .lock()
            .await
            .reactions_with(message_id, symbol)
            .ok_or_else(|| AppError::validation("Message is not in the open conversation"))?;
        let row = self.backend.update_reactions(message_id, &reactions).await?;
        self.apply_confirmed(MessageEvent::Update(row.clone())).await;
        Ok(row)
    }

    pub async fn load_contacts(&self, source: &dyn ContactSource) -> AppResult<ContactDirectory> {
        let mut directory = ContactDirectory::load(source)?;
        let registered = self
            .backend
            .profiles_by_phone(&directory.phone_numbers())
            .await?;
        tracing::info!(
            component = "contacts",
            contacts = directory.len(),
            registered = registered.len(),
            "contacts matched"
        );
        directory.set_registered(registered);
        Ok(directory)
    }

    pub async fn resolve_contact(&self, contact: &DeviceContact) -> AppResult<ContactResolution> {
        let phone = contact
            .primary_phone()
            .ok_or_else(|| AppError::validation("No phone number available for this contact"))?;

        Ok(match self.backend.find_profile_by_phone(phone).await? {
            Some(profile) => ContactResolution::Existing(profile.id),
            None => ContactResolution::Unregistered {
                name: contact.name.clone(),
                phone_number: phone.to_string(),
            },
        })
    }

    /// Counterparty id for a chat with a contact who has no account.
    pub async fn start_guest_chat(&self, phone_number: &str, name: &str) -> AppResult<Uuid> {
        let phone_number = crate::contacts::normalize_phone(phone_number);
        if phone_number.is_empty() {
            return Err(AppError::validation("No phone number available for this contact"));
        }
        self.backend
            .get_or_create_guest_profile(&phone_number, name)
            .await
    }

    async fn apply_confirmed(&self, event: MessageEvent) {
        let outcome = self.state.lock().await.apply(&event);
        tracing::debug!(
            component = "chat",
            message_id = %event.message().id,
            kind = event.kind(),
            timeline = ?outcome.timeline,
            "confirmed write merged"
        );
    }

    async fn resolve_missing_profiles(&self) {
        let missing = self.state.lock().await.rooms().missing_profiles();
        for id in missing {
            self.resolve_profile(id).await;
        }
    }

    async fn resolve_profile(&self, id: Uuid) -> Option<Profile> {
        match self.backend.fetch_profile(id).await {
            Ok(profile) => {
                self.state.lock().await.attach_profile(profile.clone());
                Some(profile)
            }
            Err(err) => {
                tracing::warn!(component = "chat", counterparty = %id, error = %err, "profile lookup failed");
                None
            }
        }
    }

    async fn pump_messages(self, mut subscription: Subscription, changes: mpsc::UnboundedSender<ViewChange>) {
        while let Some(event) = subscription.next().await {
            let change = match event {
                ChannelEvent::PostgresChange(change) => change,
                ChannelEvent::Broadcast { .. } => continue,
                ChannelEvent::Closed => {
                    let _ = changes.send(ViewChange::Disconnected);
                    break;
                }
            };

            let event = match decode_message_event(&change) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(
                        component = "chat",
                        topic = subscription.topic(),
                        error = %err,
                        "dropping malformed message event"
                    );
                    continue;
                }
            };
            if !event.message().involves(self.me) {
                tracing::debug!(component = "chat", message_id = %event.message().id, "ignoring foreign message row");
                continue;
            }

            self.handle_event(&event, &changes).await;
        }
    }

    async fn handle_event(&self, event: &MessageEvent, changes: &mpsc::UnboundedSender<ViewChange>) {
        let (outcome, unresolved) = {
            let mut state = self.state.lock().await;
            let outcome = state.apply(event);
            let unresolved = outcome
                .room
                .filter(|id| state.room(*id).map(|r| r.profile.is_none()).unwrap_or(false));
            (outcome, unresolved)
        };

        if let Some(room) = outcome.room {
            let _ = changes.send(ViewChange::Room(room));
        }
        if let Some(applied) = outcome.timeline.filter(|applied| applied.changed()) {
            let _ = changes.send(ViewChange::Timeline {
                applied,
                message_id: event.message().id,
            });
        }
        if let Some(id) = unresolved {
            if self.resolve_profile(id).await.is_some() {
                let _ = changes.send(ViewChange::Room(id));
            }
        }
        if !outcome.read_receipts_due.is_empty() {
            if let Err(err) = self.confirm_read(outcome.read_receipts_due).await {
                tracing::warn!(component = "chat", error = %err, "mark as read failed");
            }
        }
    }

    /// Feeds typing broadcasts into the state. A `Typing(false)` change is
    /// also emitted when the flag lapses after the silence timeout.
    async fn pump_typing(self, mut subscription: Subscription, changes: mpsc::UnboundedSender<ViewChange>) {
        let mut shown = false;
        loop {
            let deadline = self.state.lock().await.typing_deadline(Instant::now());
            let event = tokio::select! {
                event = subscription.next() => Some(event),
                _ = lapse(deadline) => None,
            };

            let (event, payload) = match event {
                None => {
                    if shown && !self.is_counterparty_typing().await {
                        shown = false;
                        let _ = changes.send(ViewChange::Typing(false));
                    }
                    continue;
                }
                Some(None) => break,
                Some(Some(ChannelEvent::Broadcast { event, payload })) => (event, payload),
                Some(Some(ChannelEvent::PostgresChange(_))) => continue,
                Some(Some(ChannelEvent::Closed)) => {
                    let _ = changes.send(ViewChange::Disconnected);
                    break;
                }
            };

            let (user_id, signal) = match decode_typing_signal(&event, &payload) {
                Ok(Some(decoded)) => decoded,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(component = "chat", error = %err, "dropping malformed typing signal");
                    continue;
                }
            };

            let typing = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                if !state.on_typing(user_id, signal, now) {
                    continue;
                }
                state.is_counterparty_typing(now)
            };
            shown = typing;
            let _ = changes.send(ViewChange::Typing(typing));
        }
    }
}

/// Resolves at `deadline`, or never.
async fn lapse(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

/// Refreshes the session ahead of each expiry and hands the new token to
/// the joined realtime channels. Stops when the backend rejects the
/// refresh token.
async fn keep_session_fresh(backend: Backend, realtime: RealtimeClient) {
    let mut wait = backend
        .session()
        .await
        .and_then(|session| refresh_delay(session.expires_in));

    while let Some(delay) = wait {
        tokio::time::sleep(delay).await;
        wait = match backend.refresh_session().await {
            Ok(session) => {
                match realtime.set_access_token(&session.access_token) {
                    Ok(channels) => {
                        tracing::info!(component = "auth", channels, "session refreshed");
                    }
                    Err(err) => {
                        tracing::warn!(component = "auth", error = %err, "realtime token not updated");
                    }
                }
                refresh_delay(session.expires_in)
            }
            Err(err) if err.code == AppErrorCode::Auth => {
                tracing::warn!(component = "auth", error = %err, "session refresh rejected");
                None
            }
            Err(err) => {
                tracing::warn!(component = "auth", error = %err, "session refresh failed");
                Some(REFRESH_RETRY)
            }
        };
    }
}

/// Live chat list. Dropping it stops the updates.
pub struct MessageFeed {
    changes: mpsc::UnboundedReceiver<ViewChange>,
    task: JoinHandle<()>,
}

impl MessageFeed {
    pub async fn next_change(&mut self) -> Option<ViewChange> {
        self.changes.recv().await
    }
}

impl Drop for MessageFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// An open conversation. Dropping it leaves its channels and closes the
/// conversation, so late events only reach the chat list.
pub struct ConversationView {
    counterparty: Uuid,
    generation: u64,
    profile: Option<Profile>,
    changes: mpsc::UnboundedReceiver<ViewChange>,
    tasks: Vec<JoinHandle<()>>,
    typing: Option<ChannelSender>,
    typing_timer: Option<JoinHandle<()>>,
    service: ChatService,
}

impl ConversationView {
    pub fn counterparty(&self) -> Uuid {
        self.counterparty
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub async fn next_change(&mut self) -> Option<ViewChange> {
        self.changes.recv().await
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.service.open_messages().await
    }

    pub async fn message(&self, id: Uuid) -> Option<Message> {
        self.service.open_message(id).await
    }

    pub async fn is_counterparty_typing(&self) -> bool {
        self.service.is_counterparty_typing().await
    }

    pub async fn send_text(&self, content: &str) -> AppResult<Message> {
        self.service.send_text(self.counterparty, content).await
    }

    pub async fn send_attachment(&self, path: &Path, kind: ContentType, caption: &str) -> AppResult<Message> {
        self.service
            .send_attachment(self.counterparty, path, kind, caption)
            .await
    }

    pub async fn react(&self, message_id: Uuid, symbol: &str) -> AppResult<Message> {
        self.service.react(message_id, symbol).await
    }

    pub async fn mark_visible_read(&self) -> AppResult<usize> {
        self.service.mark_visible_read().await
    }

    /// Signals a keystroke. `stop_typing` follows after the typing timeout
    /// unless another keystroke restarts the timer.
    pub fn notify_typing(&mut self) -> AppResult<()> {
        let sender = self
            .typing
            .clone()
            .ok_or_else(|| AppError::internal("Typing channel is not joined"))?;
        let payload = serde_json::to_value(TypingPayload {
            user_id: self.service.me,
        })?;
        sender.broadcast(TypingSignal::Typing.event_name(), payload.clone())?;

        if let Some(timer) = self.typing_timer.take() {
            timer.abort();
        }
        let timeout = self.service.backend.config.typing_timeout;
        self.typing_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Err(err) = sender.broadcast(TypingSignal::StopTyping.event_name(), payload) {
                tracing::debug!(component = "chat", error = %err, "stop_typing not sent");
            }
        }));
        Ok(())
    }
}

impl Drop for ConversationView {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(timer) = self.typing_timer.take() {
            timer.abort();
            let payload = serde_json::to_value(TypingPayload {
                user_id: self.service.me,
            });
            if let (Some(sender), Ok(payload)) = (&self.typing, payload) {
                let _ = sender.broadcast(TypingSignal::StopTyping.event_name(), payload);
            }
        }

        let counterparty = self.counterparty;
        let generation = self.generation;
        let closed = match self.service.state.try_lock() {
            Ok(mut guard) => {
                guard.close_if(generation);
                true
            }
            Err(_) => false,
        };
        if !closed {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let state = self.service.state.clone();
                handle.spawn(async move {
                    state.lock().await.close_if(generation);
                });
            }
        }
        tracing::debug!(component = "chat", counterparty = %counterparty, "conversation closed");
    }
}
