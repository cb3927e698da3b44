pub const CLIENT_INFO: &str = concat!("thundertalk-client/", env!("CARGO_PKG_VERSION"));

pub const HEADER_API_KEY: &str = "apikey";
pub const HEADER_CLIENT_INFO: &str = "X-Client-Info";
pub const HEADER_TRACE_ID: &str = "X-Trace-Id";
pub const HEADER_REQUEST_ID: &str = "X-Request-Id";
pub const HEADER_PREFER: &str = "Prefer";

pub const PREFER_REPRESENTATION: &str = "return=representation";
/// Makes PostgREST answer with a single object instead of an array.
pub const ACCEPT_SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

pub const MESSAGES_TABLE: &str = "messages";
pub const PROFILES_TABLE: &str = "profiles";
pub const PUBLIC_SCHEMA: &str = "public";

pub const MESSAGES_CHANNEL: &str = "messages";
pub const TYPING_CHANNEL: &str = "typing";

pub const GUEST_PROFILE_RPC: &str = "get_or_create_guest_profile";

/// Symbols offered by the reaction picker.
pub const REACTIONS: [&str; 6] = ["❤️", "👍", "😂", "😮", "😢", "🙏"];

/// Comma-joined PostgREST `in.(…)` list.
pub fn in_list<T: std::fmt::Display>(values: &[T]) -> String {
    let joined = values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("in.({joined})")
}
