use std::time::{Duration, Instant};

use shared_proto::realtime::TypingSignal;
use uuid::Uuid;

/// "Counterparty is typing" flag for the open conversation. Pure liveness
/// state: never persisted, and it expires on its own after `timeout` of
/// silence when no `stop_typing` arrives.
#[derive(Debug, Clone)]
pub struct TypingState {
    counterparty: Uuid,
    timeout: Duration,
    last_typing: Option<Instant>,
}

impl TypingState {
    pub fn new(counterparty: Uuid, timeout: Duration) -> Self {
        Self {
            counterparty,
            timeout,
            last_typing: None,
        }
    }

    /// Returns whether the signal concerned the watched counterparty.
    pub fn on_signal(&mut self, user_id: Uuid, signal: TypingSignal, now: Instant) -> bool {
        if user_id != self.counterparty {
            return false;
        }
        match signal {
            TypingSignal::Typing => self.last_typing = Some(now),
            TypingSignal::StopTyping => self.last_typing = None,
        }
        true
    }

    pub fn is_typing(&self, now: Instant) -> bool {
        self.last_typing
            .map(|since| now.saturating_duration_since(since) < self.timeout)
            .unwrap_or(false)
    }

    /// Instant the flag lapses, while it is up.
    pub fn expires_at(&self, now: Instant) -> Option<Instant> {
        let since = self.last_typing?;
        self.is_typing(now).then(|| since + self.timeout)
    }

    pub fn counterparty(&self) -> Uuid {
        self.counterparty
    }
}
