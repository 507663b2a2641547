use axum::{
    Json,
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::{net::SocketAddr, sync::Arc};
use tracing::instrument;

use super::{
    cleared_cookie_headers, client_ip,
    types::{ErrorResponse, LogoutResponse},
};
use crate::auth::{
    AuthError, AuthState, EventKind, SecurityEvent,
    cookies::{SESSION_COOKIE_NAME, read_cookie},
    guard::{csrf_header, require_csrf, require_session},
};

/// End the caller's session. A request that carries a live session must prove
/// it with the CSRF header; one without a usable session only gets its
/// cookies cleared.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Signed out; cookies cleared", body = LogoutResponse),
        (status = 403, description = "Invalid CSRF token", body = ErrorResponse),
        (status = 503, description = "Storage unavailable", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn logout(
    auth_state: Extension<Arc<AuthState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Response, AuthError> {
    let now = Utc::now();
    let ip = client_ip(&auth_state, &headers, connect_info);

    let token = read_cookie(&headers, SESSION_COOKIE_NAME);
    match require_session(&auth_state, token.as_deref(), &ip, now).await {
        Ok(principal) => {
            require_csrf(&auth_state, principal, csrf_header(&headers), &ip, now).await?;

            auth_state.sessions().revoke(principal.session_id, now).await?;
            auth_state.events().emit(
                &SecurityEvent::new(EventKind::Logout, now)
                    .with_user(principal.user_id)
                    .with_client_ip(&ip),
            );
        }
        // Nothing left to end; the cookies are cleared below.
        Err(AuthError::Unauthorized) => {}
        Err(err) => return Err(err),
    }

    Ok((
        StatusCode::OK,
        cleared_cookie_headers(&auth_state),
        Json(LogoutResponse { logged_out: true }),
    )
        .into_response())
}
