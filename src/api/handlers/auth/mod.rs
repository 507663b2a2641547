//! Auth endpoints: signup, login, logout, password change and "who am I".

pub mod login;
pub mod logout;
pub mod me;
pub mod password;
pub mod signup;
pub mod types;

use axum::{
    extract::ConnectInfo,
    http::{HeaderMap, HeaderValue, header::SET_COOKIE},
};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use tracing::error;
use uuid::Uuid;

use crate::auth::{
    AuthError, AuthState,
    cookies::{clear_cookies, csrf_cookie, session_cookie},
    utils::extract_client_ip,
};

pub(crate) fn client_ip(
    state: &AuthState,
    headers: &HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> String {
    extract_client_ip(
        headers,
        connect_info.map(|ConnectInfo(addr)| addr),
        state.config().trust_proxy_headers(),
    )
}

/// Start a session for `user_id` (revoking older ones), bind a CSRF token to
/// it, and return the `Set-Cookie` headers for both.
pub(crate) async fn start_session(
    state: &AuthState,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<HeaderMap, AuthError> {
    let (session_id, token) = state.sessions().create(user_id, now).await?;
    let csrf = state
        .csrf()
        .issue(session_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("session {session_id} ended before CSRF binding"))?;

    let mut headers = HeaderMap::new();
    headers.append(SET_COOKIE, cookie(session_cookie(state.config(), &token))?);
    headers.append(SET_COOKIE, cookie(csrf_cookie(state.config(), &csrf))?);
    Ok(headers)
}

/// `Set-Cookie` headers that remove both cookies. Best-effort.
pub(crate) fn cleared_cookie_headers(state: &AuthState) -> HeaderMap {
    let mut headers = HeaderMap::new();
    match clear_cookies(state.config()) {
        Ok(cookies) => {
            for value in cookies {
                headers.append(SET_COOKIE, value);
            }
        }
        Err(err) => error!("Failed to build clearing cookies: {err}"),
    }
    headers
}

fn cookie(
    value: Result<HeaderValue, axum::http::header::InvalidHeaderValue>,
) -> Result<HeaderValue, AuthError> {
    value.map_err(|err| AuthError::Unavailable(anyhow::anyhow!("invalid cookie value: {err}")))
}

#[cfg(test)]
pub(crate) mod tests;
