use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Image,
    File,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::File => "file",
        }
    }

    pub fn is_attachment(self) -> bool {
        !matches!(self, ContentType::Text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub full_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_guest: bool,
}

impl Profile {
    /// Upper-cased first letter of the display name, used for avatar placeholders.
    pub fn initial(&self) -> Option<char> {
        self.full_name.chars().next().map(|c| c.to_ascii_uppercase())
    }
}

/// Reaction symbol to count. Key order carries no meaning.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Reactions(pub HashMap<String, u32>);

impl Reactions {
    pub fn count(&self, symbol: &str) -> u32 {
        self.0.get(symbol).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, symbol: &str) -> u32 {
        let slot = self.0.entry(symbol.to_string()).or_insert(0);
        *slot = slot.saturating_add(1);
        *slot
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|count| *count == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(symbol, count)| (symbol.as_str(), *count))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub content_type: ContentType,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reactions: Reactions,
}

impl Message {
    /// The other participant relative to `me`. A message `me` sent to
    /// itself is keyed by `me`.
    pub fn counterparty(&self, me: Uuid) -> Uuid {
        if self.sender_id == me {
            self.receiver_id
        } else {
            self.sender_id
        }
    }

    pub fn involves(&self, user: Uuid) -> bool {
        self.sender_id == user || self.receiver_id == user
    }

    pub fn is_between(&self, a: Uuid, b: Uuid) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }

    pub fn is_unread_for(&self, me: Uuid) -> bool {
        self.receiver_id == me && !self.is_read
    }

    pub fn preview(&self) -> &str {
        match self.content_type {
            ContentType::Image => "📷 Photo",
            ContentType::File => "📎 File",
            ContentType::Text => &self.content,
        }
    }

    pub fn time_label(&self) -> String {
        self.created_at.format("%H:%M").to_string()
    }
}

/// A message row with its two participant profiles embedded, as returned
/// by the chat-list query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotMessage {
    #[serde(flatten)]
    pub message: Message,
    #[serde(default)]
    pub sender: Option<Profile>,
    #[serde(default)]
    pub receiver: Option<Profile>,
}

impl SnapshotMessage {
    pub fn counterparty_profile(&self, me: Uuid) -> Option<&Profile> {
        if self.message.sender_id == me {
            self.receiver.as_ref()
        } else {
            self.sender.as_ref()
        }
    }
}

impl From<Message> for SnapshotMessage {
    fn from(message: Message) -> Self {
        Self {
            message,
            sender: None,
            receiver: None,
        }
    }
}

/// Insert payload for a new message row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub content_type: ContentType,
    pub file_url: Option<String>,
    pub is_read: bool,
}

impl NewMessage {
    pub fn text(sender_id: Uuid, receiver_id: Uuid, content: &str) -> Self {
        Self {
            sender_id,
            receiver_id,
            content: content.trim().to_string(),
            content_type: ContentType::Text,
            file_url: None,
            is_read: false,
        }
    }

    pub fn attachment(
        sender_id: Uuid,
        receiver_id: Uuid,
        caption: &str,
        content_type: ContentType,
        file_url: String,
    ) -> Self {
        Self {
            sender_id,
            receiver_id,
            content: caption.trim().to_string(),
            content_type,
            file_url: Some(file_url),
            is_read: false,
        }
    }
}

/// Body of the batch mark-as-read update.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReadPatch {
    pub is_read: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionsPatch {
    pub reactions: Reactions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresencePatch {
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestProfileRequest {
    pub phone_number_param: String,
    pub full_name_param: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
