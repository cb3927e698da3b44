use validator::{Validate, ValidationError};

use crate::error::AppResult;

const MAX_MESSAGE_LEN: usize = 4000;

#[derive(Debug, Clone, Validate)]
pub struct Credentials {
    #[validate(email, length(max = 255))]
    pub email: String,
    #[validate(length(min = 6, max = 72))]
    pub password: String,
}

impl Credentials {
    pub fn new(email: &str, password: &str) -> AppResult<Self> {
        let credentials = Self {
            email: normalize_email(email),
            password: password.to_string(),
        };
        credentials.validate()?;
        Ok(credentials)
    }

    /// Name stored on a fresh profile: the local part of the e-mail.
    pub fn display_name(&self) -> String {
        display_name_from_email(&self.email)
    }
}

#[derive(Debug, Validate)]
pub struct OutgoingText {
    #[validate(
        length(min = 1, max = 4000),
        custom(function = "validate_message_content")
    )]
    pub content: String,
}

#[derive(Debug, Validate)]
pub struct ReactionRequest {
    #[validate(length(min = 1, max = 32), custom(function = "validate_emoji"))]
    pub emoji: String,
}

pub fn validate_message_content(value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_MESSAGE_LEN {
        return Err(ValidationError::new("message_content_length"));
    }
    Ok(())
}

pub fn validate_emoji(value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > 32 {
        return Err(ValidationError::new("emoji_length"));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(ValidationError::new("emoji_whitespace"));
    }
    Ok(())
}

pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

pub fn display_name_from_email(email: &str) -> String {
    email.split('@').next().unwrap_or_default().to_string()
}
