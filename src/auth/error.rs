//! Error taxonomy surfaced by the auth components and gates.
//!
//! Client-facing bodies are deliberately generic; the cause of an `Unauthorized`
//! (absent, expired, idle, revoked) only reaches the security log.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("email already registered")]
    Conflict,
    #[error("invalid email or password")]
    AuthFailed,
    #[error("authentication required")]
    Unauthorized,
    #[error("invalid CSRF token")]
    Forbidden,
    #[error("too many failed attempts, retry in {retry_after_seconds}s")]
    Locked { retry_after_seconds: u64 },
    #[error("service unavailable")]
    Unavailable(#[source] anyhow::Error),
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Unavailable(err)
    }
}

impl AuthError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict => StatusCode::CONFLICT,
            Self::AuthFailed | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Locked { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Validation(message) => message.clone(),
            Self::Conflict => "An account with that email already exists".to_string(),
            Self::AuthFailed => "Invalid email or password".to_string(),
            Self::Unauthorized => "Authentication required".to_string(),
            Self::Forbidden => "Invalid CSRF token".to_string(),
            Self::Locked { .. } => "Too many login attempts. Try again later.".to_string(),
            Self::Unavailable(err) => {
                error!("Auth storage unavailable: {err:#}");
                "Service temporarily unavailable".to_string()
            }
        };

        let mut response = (status, Json(json!({ "error": message }))).into_response();
        if let Self::Locked {
            retry_after_seconds,
        } = self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}
