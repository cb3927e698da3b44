use serde_json::Value;
use shared_proto::realtime::{ChangeType, PostgresChange, TypingPayload, TypingSignal};
use shared_proto::Message;
use uuid::Uuid;

use super::RealtimeError;
use crate::messaging::MessageEvent;
use crate::protocol::MESSAGES_TABLE;

/// Turns a postgres change on `messages` into a merge event. Deletes and
/// other tables yield `Ok(None)`; a malformed row is an error for the
/// caller to log and drop.
pub fn decode_message_event(change: &PostgresChange) -> Result<Option<MessageEvent>, RealtimeError> {
    if change.table != MESSAGES_TABLE {
        return Ok(None);
    }

    let wrap: fn(Message) -> MessageEvent = match change.change_type {
        ChangeType::Insert => MessageEvent::Insert,
        ChangeType::Update => MessageEvent::Update,
        ChangeType::Delete => return Ok(None),
    };

    let record = match &change.record {
        Some(record) if !record.is_null() => record.clone(),
        _ => {
            return Err(RealtimeError::MissingRecord {
                table: change.table.clone(),
            })
        }
    };

    let message: Message = serde_json::from_value(record)?;
    Ok(Some(wrap(message)))
}

pub fn decode_typing_signal(
    event: &str,
    payload: &Value,
) -> Result<Option<(Uuid, TypingSignal)>, RealtimeError> {
    let Some(signal) = TypingSignal::from_event_name(event) else {
        return Ok(None);
    };
    let payload: TypingPayload = serde_json::from_value(payload.clone())?;
    Ok(Some((payload.user_id, signal)))
}
