use std::env;
use std::time::Duration;

use url::Url;

use crate::error::{AppError, AppResult};

pub const DEFAULT_STORAGE_BUCKET: &str = "chat-files";
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_millis(3000);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub project_url: Url,
    pub anon_key: String,
    pub storage_bucket: String,
    pub http_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub typing_timeout: Duration,
}

impl ClientConfig {
    pub fn new(project_url: &str, anon_key: impl Into<String>) -> AppResult<Self> {
        let project_url = Url::parse(project_url)?;
        if !matches!(project_url.scheme(), "http" | "https") {
            return Err(AppError::validation("Project URL must be http(s)")
                .with_details(project_url.to_string()));
        }

        Ok(Self {
            project_url,
            anon_key: anon_key.into(),
            storage_bucket: DEFAULT_STORAGE_BUCKET.to_string(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
        })
    }

    /// Reads the configuration from the process environment, after loading
    /// a `.env` file if one is present.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenv::dotenv();

        let project_url = required_env("SUPABASE_URL")?;
        let anon_key = required_env("SUPABASE_ANON_KEY")?;
        let mut config = Self::new(&project_url, anon_key)?;

        if let Some(bucket) = optional_env("STORAGE_BUCKET") {
            config.storage_bucket = bucket;
        }
        if let Some(secs) = parse_env::<u64>("HTTP_TIMEOUT_SECS") {
            config.http_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>("REALTIME_HEARTBEAT_SECS") {
            config.heartbeat_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(ms) = parse_env::<u64>("TYPING_TIMEOUT_MS") {
            config.typing_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }

    /// Base for REST, auth and storage paths, always ending in `/`.
    fn base(&self) -> String {
        let raw = self.project_url.as_str();
        if raw.ends_with('/') {
            raw.to_string()
        } else {
            format!("{raw}/")
        }
    }

    pub fn rest_url(&self, resource: &str) -> String {
        format!("{}rest/v1/{}", self.base(), resource)
    }

    pub fn auth_url(&self, path: &str) -> String {
        format!("{}auth/v1/{}", self.base(), path)
    }

    pub fn storage_object_url(&self, path: &str) -> String {
        format!("{}storage/v1/object/{}/{}", self.base(), self.storage_bucket, path)
    }

    pub fn storage_public_url(&self, path: &str) -> String {
        format!(
            "{}storage/v1/object/public/{}/{}",
            self.base(),
            self.storage_bucket,
            path
        )
    }

    pub fn realtime_url(&self) -> AppResult<Url> {
        let mut url = Url::parse(&format!("{}realtime/v1/websocket", self.base()))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| AppError::validation("Cannot derive realtime URL"))?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.anon_key)
            .append_pair("vsn", shared_proto::realtime::PROTOCOL_VSN);
        Ok(url)
    }
}

fn required_env(name: &str) -> AppResult<String> {
    optional_env(name).ok_or_else(|| AppError::validation(format!("Missing {name}")))
}

fn optional_env(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    optional_env(name).and_then(|raw| raw.parse().ok())
}
