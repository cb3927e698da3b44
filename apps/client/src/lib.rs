pub mod api;
pub mod config;
pub mod contacts;
pub mod error;
pub mod messaging;
pub mod observability;
pub mod protocol;
pub mod realtime;
pub mod service;
pub mod validation;

pub use api::Backend;
pub use config::ClientConfig;
pub use error::{AppError, AppErrorCode, AppResult};
pub use service::{ChatService, ConversationView, MessageFeed, ViewChange};
