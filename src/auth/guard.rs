//! Request gates for authenticated routes.
//!
//! Flow Overview: read the session cookie, validate it (expiry, then idle
//! time), record the activity, and hand back a principal. Mutating requests
//! must additionally echo the CSRF token bound to that session. Every
//! rejection is a uniform 401/403 to the client; the precise cause goes to the
//! security log.

use axum::{
    extract::{ConnectInfo, Extension, Request},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use std::{net::SocketAddr, sync::Arc};
use uuid::Uuid;

use super::{
    cookies::{SESSION_COOKIE_NAME, read_cookie},
    csrf::{CSRF_HEADER_NAME, CsrfCheck, requires_csrf},
    error::AuthError,
    events::{EventKind, SecurityEvent},
    sessions::{SessionCheck, SessionRejection},
    state::AuthState,
    utils::extract_client_ip,
};

/// Authenticated caller, inserted into request extensions by
/// [`require_authenticated`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub session_id: Uuid,
}

/// Resolve a raw session token into a principal and record the activity.
///
/// # Errors
/// `Unauthorized` for a missing or unusable token, `Unavailable` on storage failure.
pub async fn require_session(
    state: &AuthState,
    raw_token: Option<&str>,
    client_ip: &str,
    now: DateTime<Utc>,
) -> Result<Principal, AuthError> {
    let Some(raw_token) = raw_token else {
        return Err(AuthError::Unauthorized);
    };

    match state.sessions().validate(raw_token, now).await? {
        SessionCheck::Valid(session) => {
            state.sessions().touch(session.id, now).await?;
            Ok(Principal {
                user_id: session.user_id,
                session_id: session.id,
            })
        }
        SessionCheck::Rejected(rejection) => {
            let kind = if rejection == SessionRejection::Idle {
                EventKind::SessionIdleExpired
            } else {
                EventKind::SessionRejected
            };
            state.events().emit(
                &SecurityEvent::new(kind, now)
                    .with_client_ip(client_ip)
                    .with_reason(rejection.as_str()),
            );
            Err(AuthError::Unauthorized)
        }
    }
}

/// Check the CSRF header against the token bound to `principal`'s session.
///
/// # Errors
/// `Forbidden` when the token is missing or wrong, `Unavailable` on storage failure.
pub async fn require_csrf(
    state: &AuthState,
    principal: Principal,
    header_token: Option<&str>,
    client_ip: &str,
    now: DateTime<Utc>,
) -> Result<(), AuthError> {
    match state.csrf().verify(principal.session_id, header_token).await? {
        CsrfCheck::Ok => Ok(()),
        CsrfCheck::Rejected => {
            let reason = if header_token.is_some() {
                "mismatch"
            } else {
                "missing"
            };
            state.events().emit(
                &SecurityEvent::new(EventKind::CsrfFailure, now)
                    .with_user(principal.user_id)
                    .with_client_ip(client_ip)
                    .with_reason(reason),
            );
            Err(AuthError::Forbidden)
        }
    }
}

/// Read the CSRF header value, if any.
#[must_use]
pub fn csrf_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(CSRF_HEADER_NAME)
        .and_then(|value| value.to_str().ok())
}

/// Middleware for routers that need an authenticated caller.
///
/// Applies the session gate to every request and the CSRF gate to mutating
/// methods, then exposes [`Principal`] to the handler.
pub async fn require_authenticated(
    Extension(state): Extension<Arc<AuthState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut request: Request,
    next: Next,
) -> Response {
    let now = Utc::now();
    let headers = request.headers();
    let client_ip = extract_client_ip(
        headers,
        connect_info.map(|ConnectInfo(addr)| addr),
        state.config().trust_proxy_headers(),
    );
    let raw_token = read_cookie(headers, SESSION_COOKIE_NAME);

    let principal = match require_session(&state, raw_token.as_deref(), &client_ip, now).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    if requires_csrf(request.method()) {
        let header_token = csrf_header(request.headers());
        if let Err(err) = require_csrf(&state, principal, header_token, &client_ip, now).await {
            return err.into_response();
        }
    }

    request.extensions_mut().insert(principal);
    next.run(request).await
}
