pub mod auth;
pub mod realtime;
pub mod records;

pub use records::{
    ContentType, GuestProfileRequest, Message, NewMessage, PresencePatch, Profile, Reactions,
    ReactionsPatch, ReadPatch, SnapshotMessage,
};
