use std::time::Duration;

use chrono::Utc;
use reqwest::Method;
use shared_proto::auth::{
    AuthSession, NewProfile, RefreshRequest, SignInRequest, SignUpMetadata, SignUpRequest,
    SignUpResponse,
};

use super::{send_empty, send_json, Backend};
use crate::error::{AppError, AppResult};
use crate::protocol::{HEADER_API_KEY, PROFILES_TABLE};
use crate::validation::Credentials;

/// Longest head start a refresh takes on the token's expiry.
const REFRESH_MARGIN_SECS: i64 = 60;

/// How long to wait before refreshing a session that expires in
/// `expires_in` seconds. Refreshes a minute early, or halfway through
/// very short sessions, and never sooner than a second from now. `None`
/// when the session carries no expiry.
pub fn refresh_delay(expires_in: Option<i64>) -> Option<Duration> {
    let expires_in = expires_in?.max(0);
    let margin = REFRESH_MARGIN_SECS.min(expires_in / 2);
    Some(Duration::from_secs((expires_in - margin).max(1) as u64))
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    /// Account and profile exist and the session is active.
    SignedIn(AuthSession),
    /// The backend mailed a confirmation link; no session yet.
    ConfirmationRequired,
}

impl SignUpOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            SignUpOutcome::SignedIn(_) => "Account created successfully",
            SignUpOutcome::ConfirmationRequired => "Please check your email for confirmation link",
        }
    }
}

impl Backend {
    pub async fn sign_in(&self, email: &str, password: &str) -> AppResult<AuthSession> {
        let credentials = Credentials::new(email, password)?;
        let url = self.config.auth_url("token");

        let request = self
            .client
            .post(&url)
            .query(&[("grant_type", "password")])
            .header(HEADER_API_KEY, &self.config.anon_key)
            .json(&SignInRequest {
                email: credentials.email,
                password: credentials.password,
            });
        let session: AuthSession = send_json(request, "Sign in failed").await?;

        self.set_session(Some(session.clone())).await;
        tracing::info!(component = "auth", user_id = %session.user.id, "signed in");
        Ok(session)
    }

    /// Registers the account, then creates its profile row with the local
    /// part of the e-mail as display name.
    pub async fn sign_up(&self, email: &str, password: &str) -> AppResult<SignUpOutcome> {
        let credentials = Credentials::new(email, password)?;
        let full_name = credentials.display_name();
        let url = self.config.auth_url("signup");

        let request = self
            .client
            .post(&url)
            .header(HEADER_API_KEY, &self.config.anon_key)
            .json(&SignUpRequest {
                email: credentials.email.clone(),
                password: credentials.password,
                data: SignUpMetadata {
                    full_name: full_name.clone(),
                },
            });
        let response: SignUpResponse = send_json(request, "Sign up failed").await?;

        if let Some(session) = response.session() {
            self.set_session(Some(session.clone())).await;
        }

        let now = Utc::now();
        let profile = NewProfile {
            id: response.user().id,
            email: response.user().email.clone().or(Some(credentials.email)),
            full_name,
            created_at: now,
            updated_at: now,
            last_seen: now,
            is_online: true,
        };
        let request = self
            .request(Method::POST, &self.config.rest_url(PROFILES_TABLE))
            .await
            .json(&profile);
        if let Err(err) = send_empty(request, "Failed to create user profile").await {
            tracing::error!(
                component = "auth",
                user_id = %profile.id,
                error = %err,
                "profile creation failed after sign-up"
            );
            return Err(AppError::storage("Failed to create user profile")
                .with_details(err.details.unwrap_or(err.message)));
        }

        tracing::info!(component = "auth", user_id = %profile.id, "account created");
        Ok(match response {
            SignUpResponse::Session(session) => SignUpOutcome::SignedIn(session),
            SignUpResponse::User(_) => SignUpOutcome::ConfirmationRequired,
        })
    }

    /// Exchanges the stored refresh token for a new session.
    pub async fn refresh_session(&self) -> AppResult<AuthSession> {
        let refresh_token = self
            .session()
            .await
            .and_then(|s| s.refresh_token)
            .ok_or_else(|| AppError::auth("No session to refresh"))?;

        let request = self
            .client
            .post(self.config.auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .header(HEADER_API_KEY, &self.config.anon_key)
            .json(&RefreshRequest { refresh_token });
        let session: AuthSession = send_json(request, "Session refresh failed").await?;

        self.set_session(Some(session.clone())).await;
        Ok(session)
    }

    /// Revokes the session server side. The local session is cleared even
    /// when the backend call fails.
    pub async fn sign_out(&self) -> AppResult<()> {
        if self.access_token().await.is_none() {
            return Ok(());
        }
        let request = self
            .request(Method::POST, &self.config.auth_url("logout"))
            .await;
        let result = send_empty(request, "Sign out failed").await;
        self.set_session(None).await;
        tracing::info!(component = "auth", "signed out");
        result
    }
}
