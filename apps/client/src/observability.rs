use std::sync::OnceLock;

use tracing::Span;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

static SESSION_TRACE_ID: OnceLock<String> = OnceLock::new();

/// JSON logs on stderr, so stdout stays free for the chat transcript.
/// `APP_LOG_LEVEL` wins over `RUST_LOG`.
pub fn init_tracing() {
    let env_filter = std::env::var("APP_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());

    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::new(env_filter))
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);

    tracing::info!(
        component = "bootstrap",
        trace_id = %trace_id(),
        client_info = crate::protocol::CLIENT_INFO,
        "structured tracing initialized"
    );
}

/// Span entered by every task of a signed-in chat session, so each log line
/// names the user it was written for.
pub fn session_span(user_id: Uuid) -> Span {
    tracing::info_span!("chat_session", user_id = %user_id, trace_id = %trace_id())
}

/// Span for the tasks serving one open conversation.
pub fn conversation_span(parent: &Span, counterparty: Uuid, generation: u64) -> Span {
    tracing::info_span!(parent: parent, "conversation", counterparty = %counterparty, generation)
}

pub fn trace_id() -> &'static str {
    SESSION_TRACE_ID.get_or_init(|| Uuid::new_v4().to_string())
}

pub fn request_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_is_stable_for_the_process() {
        assert_eq!(trace_id(), trace_id());
        assert!(Uuid::parse_str(trace_id()).is_ok());
        assert_ne!(request_id(), request_id());
    }

    #[test]
    fn session_and_conversation_spans_carry_ids() {
        let subscriber = tracing_subscriber::registry();
        tracing::subscriber::with_default(subscriber, || {
            let session = session_span(Uuid::from_u128(1));
            let conversation = conversation_span(&session, Uuid::from_u128(2), 3);

            let session_meta = session.metadata().expect("session span enabled");
            assert_eq!(session_meta.name(), "chat_session");
            assert!(session_meta.fields().field("user_id").is_some());
            assert!(session_meta.fields().field("trace_id").is_some());

            let conversation_meta = conversation.metadata().expect("conversation span enabled");
            assert_eq!(conversation_meta.name(), "conversation");
            assert!(conversation_meta.fields().field("counterparty").is_some());
            assert!(conversation_meta.fields().field("generation").is_some());
        });
    }
}
