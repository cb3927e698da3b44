use serde::Serialize;
use shared_proto::{Message, Profile};
use uuid::Uuid;

/// A change to the message store delivered by the realtime feed (or
/// produced locally once a send is confirmed).
#[derive(Debug, Clone, PartialEq)]
pub enum MessageEvent {
    Insert(Message),
    Update(Message),
}

impl MessageEvent {
    pub fn message(&self) -> &Message {
        match self {
            MessageEvent::Insert(message) | MessageEvent::Update(message) => message,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MessageEvent::Insert(_) => "insert",
            MessageEvent::Update(_) => "update",
        }
    }
}

/// Derived per-counterparty view shown in the chat list.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConversationRoom {
    pub counterparty_id: Uuid,
    /// `None` until the counterparty's profile has been fetched; rooms first
    /// seen through a realtime row carry no embedded profile.
    pub profile: Option<Profile>,
    pub last_message: Message,
    pub unread_count: usize,
}

impl ConversationRoom {
    pub fn display_name(&self) -> String {
        match &self.profile {
            Some(profile) if profile.is_guest => format!("{} (Guest)", profile.full_name),
            Some(profile) => profile.full_name.clone(),
            None => self.counterparty_id.to_string(),
        }
    }

    /// Whether the latest message came from the counterparty and is still
    /// unread.
    pub fn shows_unread_dot(&self) -> bool {
        self.last_message.sender_id == self.counterparty_id && !self.last_message.is_read
    }
}
