use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use std::time::Duration;

use crate::api::response;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to extract conversation: {0}")]
    Extraction(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("AI provider error: {0}")]
    Provider(String),

    #[error("Please wait {} more seconds before posting again", retry_after_secs(.retry_after))]
    RateLimited { retry_after: Duration },

    #[error("Session expired. Please re-enter your credentials")]
    SessionExpired,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Too many open sessions, try again later")]
    SessionLimit,

    #[error("Failed to post to LinkedIn: {0}")]
    Posting(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Provider(_) => StatusCode::BAD_GATEWAY,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::SessionExpired => StatusCode::GONE,
            AppError::SessionNotFound => StatusCode::NOT_FOUND,
            AppError::SessionLimit => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Posting(_) => StatusCode::BAD_GATEWAY,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable identifier for API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "invalid_input",
            AppError::Extraction(_) => "extraction_failed",
            AppError::Auth(_) => "auth_failed",
            AppError::Provider(_) => "provider_failed",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::SessionExpired => "session_expired",
            AppError::SessionNotFound => "session_not_found",
            AppError::SessionLimit => "session_limit",
            AppError::Posting(_) => "posting_failed",
            AppError::Config(_) => "config_error",
        }
    }

    /// Process exit status for the command-line front end.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::InvalidInput(_) => 2,
            AppError::Extraction(_) => 3,
            AppError::Auth(_) => 4,
            AppError::Provider(_) => 5,
            AppError::Posting(_) => 6,
            AppError::RateLimited { .. } => 7,
            AppError::SessionExpired | AppError::SessionNotFound => 8,
            AppError::SessionLimit | AppError::Config(_) => 1,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = match &self {
            AppError::RateLimited { retry_after } => Some(retry_after_secs(retry_after)),
            _ => None,
        };

        let mut res = response::error::<()>(status, self.kind(), self.to_string()).into_response();
        if let Some(secs) = retry_after {
            res.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        res
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Whole seconds to wait, rounded up and never zero.
fn retry_after_secs(retry_after: &Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}
