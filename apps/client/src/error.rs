use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppErrorCode {
    Network,
    Protocol,
    Auth,
    Storage,
    Validation,
    Permission,
    Internal,
}

/// Error handed to the UI layer. Every I/O failure is converted into one of
/// these at the call site; the messaging core itself never produces them.
#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub code: AppErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn new(code: AppErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            trace_id: Some(crate::observability::trace_id().to_string()),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(AppErrorCode::Network, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(AppErrorCode::Protocol, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(AppErrorCode::Auth, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(AppErrorCode::Storage, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(AppErrorCode::Validation, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(AppErrorCode::Permission, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorCode::Internal, message)
    }

    /// Maps a non-success HTTP answer from the backend.
    pub fn from_status(status: reqwest::StatusCode, context: &str, body: &str) -> Self {
        let message = format!("{context} ({status})");
        let err = match status.as_u16() {
            401 | 403 => AppError::auth(message),
            400 | 409 | 422 => {
                let lowered = body.to_lowercase();
                if lowered.contains("invalid_grant") || lowered.contains("invalid login") {
                    AppError::auth("Invalid login credentials")
                } else if lowered.contains("already registered") {
                    AppError::validation("This email is already registered")
                } else {
                    AppError::validation(message)
                }
            }
            404 => AppError::storage(message),
            _ => AppError::network(message),
        };
        if body.is_empty() {
            err
        } else {
            err.with_details(body.to_string())
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.code, AppErrorCode::Network)
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl From<&str> for AppError {
    fn from(value: &str) -> Self {
        from_string(value.to_string())
    }
}

impl From<String> for AppError {
    fn from(value: String) -> Self {
        from_string(value)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            return AppError::protocol("Invalid response payload").with_details(value.to_string());
        }
        AppError::network("Network request failed").with_details(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::protocol("Invalid JSON payload").with_details(value.to_string())
    }
}

impl From<url::ParseError> for AppError {
    fn from(value: url::ParseError) -> Self {
        AppError::validation("Invalid URL").with_details(value.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::storage("Local file access failed").with_details(value.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(value: validator::ValidationErrors) -> Self {
        AppError::validation("Invalid input").with_details(value.to_string())
    }
}

impl From<crate::realtime::RealtimeError> for AppError {
    fn from(value: crate::realtime::RealtimeError) -> Self {
        match value {
            crate::realtime::RealtimeError::Closed => {
                AppError::network("Realtime connection closed")
            }
            crate::realtime::RealtimeError::JoinRejected { .. } => {
                AppError::auth("Realtime subscription rejected").with_details(value.to_string())
            }
            other => AppError::network("Realtime connection failed").with_details(other.to_string()),
        }
    }
}

impl From<crate::contacts::ContactsError> for AppError {
    fn from(value: crate::contacts::ContactsError) -> Self {
        match value {
            crate::contacts::ContactsError::PermissionDenied => {
                AppError::permission("Please allow access to your contacts")
            }
            other => AppError::storage("Failed to load contacts").with_details(other.to_string()),
        }
    }
}

fn from_string(value: String) -> AppError {
    let lowered = value.to_lowercase();

    if lowered.contains("not authenticated")
        || lowered.contains("unauthorized")
        || lowered.contains("invalid login")
        || lowered.contains("jwt")
    {
        return AppError::auth(value);
    }

    if lowered.contains("network error")
        || lowered.contains("timed out")
        || lowered.contains("dns")
        || lowered.contains("connection")
    {
        return AppError::network(value);
    }

    if lowered.contains("permission") {
        return AppError::permission(value);
    }

    if lowered.contains("protocol") || lowered.contains("unexpected frame") {
        return AppError::protocol(value);
    }

    if lowered.contains("storage") || lowered.contains("upload") || lowered.contains("bucket") {
        return AppError::storage(value);
    }

    if lowered.contains("invalid") || lowered.contains("missing") {
        return AppError::validation(value);
    }

    AppError::internal(value)
}
