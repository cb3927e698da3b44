pub mod auth;
pub mod messages;
pub mod profiles;
pub mod storage;

use std::sync::Arc;

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared_proto::auth::{AuthSession, AuthUser};
use tokio::sync::RwLock;

use crate::config::ClientConfig;
use crate::error::{AppError, AppResult};
use crate::observability;
use crate::protocol::{HEADER_API_KEY, HEADER_CLIENT_INFO, HEADER_REQUEST_ID, HEADER_TRACE_ID, CLIENT_INFO};

pub use auth::{refresh_delay, SignUpOutcome};

/// Shared HTTP state for the auth, table and storage endpoints.
#[derive(Clone)]
pub struct Backend {
    pub client: Client,
    pub config: ClientConfig,
    session: Arc<RwLock<Option<AuthSession>>>,
}

impl Backend {
    pub fn new(config: ClientConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| AppError::internal("Failed to create HTTP client").with_details(e.to_string()))?;

        Ok(Self {
            client,
            config,
            session: Arc::new(RwLock::new(None)),
        })
    }

    pub async fn set_session(&self, session: Option<AuthSession>) {
        let mut write_guard = self.session.write().await;
        *write_guard = session;
    }

    pub async fn session(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    pub async fn current_user(&self) -> AppResult<AuthUser> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.user.clone())
            .ok_or_else(|| AppError::auth("Not authenticated"))
    }

    /// Request with the project key, the bearer token (the user's session
    /// or the anon key) and correlation headers.
    pub async fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let bearer = self
            .access_token()
            .await
            .unwrap_or_else(|| self.config.anon_key.clone());
        let request_id = observability::request_id();
        tracing::debug!(
            component = "api",
            method = %method,
            url = %url,
            request_id = %request_id,
            "backend request"
        );

        self.client
            .request(method, url)
            .header(HEADER_API_KEY, &self.config.anon_key)
            .bearer_auth(bearer)
            .header(HEADER_CLIENT_INFO, CLIENT_INFO)
            .header(HEADER_TRACE_ID, observability::trace_id())
            .header(HEADER_REQUEST_ID, request_id)
    }
}

async fn check(res: Response, context: &str) -> AppResult<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let text = res.text().await.unwrap_or_default();
    tracing::warn!(component = "api", status = %status, context = context, "backend request failed");
    Err(AppError::from_status(status, context, &text))
}

/// Sends the request and decodes a JSON body.
pub(crate) async fn send_json<T: DeserializeOwned>(request: RequestBuilder, context: &str) -> AppResult<T> {
    let res = request.send().await?;
    let res = check(res, context).await?;
    Ok(res.json::<T>().await?)
}

/// Sends the request and discards the body.
pub(crate) async fn send_empty(request: RequestBuilder, context: &str) -> AppResult<()> {
    let res = request.send().await?;
    check(res, context).await?;
    Ok(())
}

/// First row of a `return=representation` answer.
pub(crate) fn first_row<T>(rows: Vec<T>, context: &str) -> AppResult<T> {
    rows.into_iter()
        .next()
        .ok_or_else(|| AppError::protocol(format!("{context}: backend returned no row")))
}
