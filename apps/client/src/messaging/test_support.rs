use chrono::{TimeZone, Utc};
use shared_proto::{ContentType, Message, Profile, Reactions, SnapshotMessage};
use uuid::Uuid;

pub fn user(n: u128) -> Uuid {
    Uuid::from_u128(0xFFFF_0000_0000_0000_0000_0000_0000_0000 | n)
}

/// A text message with id `id`, created `t` seconds after the epoch.
pub fn message(id: u128, from: Uuid, to: Uuid, read: bool, t: i64) -> Message {
    Message {
        id: Uuid::from_u128(id),
        sender_id: from,
        receiver_id: to,
        content: format!("message {id}"),
        content_type: ContentType::Text,
        file_url: None,
        file_type: None,
        is_read: read,
        created_at: Utc.timestamp_opt(t, 0).single().expect("valid timestamp"),
        delivered_at: None,
        read_at: None,
        reactions: Reactions::default(),
    }
}

pub fn profile(id: Uuid, name: &str, guest: bool) -> Profile {
    Profile {
        id,
        email: None,
        full_name: name.to_string(),
        avatar_url: None,
        phone_number: None,
        last_seen: None,
        is_online: false,
        is_guest: guest,
    }
}

pub fn snapshot(messages: Vec<Message>) -> Vec<SnapshotMessage> {
    messages.into_iter().map(SnapshotMessage::from).collect()
}
