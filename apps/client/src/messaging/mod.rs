pub mod aggregator;
pub mod domain;
pub mod reducer;
pub mod timeline;
pub mod typing;

#[cfg(test)]
pub(crate) mod test_support;

pub use aggregator::ConversationAggregator;
pub use domain::{ConversationRoom, MessageEvent};
pub use reducer::{MergeOutcome, RealtimeMergeReducer};
pub use timeline::{Applied, ConversationTimeline};
pub use typing::TypingState;
