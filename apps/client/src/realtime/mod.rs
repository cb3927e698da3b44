mod decode;
mod socket;

pub use decode::{decode_message_event, decode_typing_signal};
pub use socket::{ChannelEvent, ChannelSender, RealtimeClient, Subscription};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("change on {table} carried no record")]
    MissingRecord { table: String },

    #[error("channel {topic} rejected join: {reason}")]
    JoinRejected { topic: String, reason: String },

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("realtime connection closed")]
    Closed,
}
