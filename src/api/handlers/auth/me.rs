use axum::{
    Json,
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::{net::SocketAddr, sync::Arc};
use tracing::instrument;

use super::{
    client_ip,
    types::{ErrorResponse, MeResponse, UserResponse},
};
use crate::auth::{
    AuthError, AuthState,
    cookies::{CSRF_COOKIE_NAME, SESSION_COOKIE_NAME, csrf_cookie, read_cookie},
    guard::require_session,
};

#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current user, or null without a valid session", body = MeResponse),
        (status = 503, description = "Storage unavailable", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn me(
    auth_state: Extension<Arc<AuthState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Response, AuthError> {
    let now = Utc::now();
    let ip = client_ip(&auth_state, &headers, connect_info);
    let token = read_cookie(&headers, SESSION_COOKIE_NAME);

    let principal = match require_session(&auth_state, token.as_deref(), &ip, now).await {
        Ok(principal) => principal,
        Err(AuthError::Unauthorized) => {
            return Ok(Json(MeResponse { user: None }).into_response());
        }
        Err(err) => return Err(err),
    };

    let Some(user) = auth_state.credentials().find_user(principal.user_id).await? else {
        return Ok(Json(MeResponse { user: None }).into_response());
    };

    // A client that lost its CSRF cookie gets a fresh token bound to the session.
    let mut response_headers = HeaderMap::new();
    if read_cookie(&headers, CSRF_COOKIE_NAME).is_none() {
        if let Some(csrf) = auth_state.csrf().issue(principal.session_id).await? {
            let value = csrf_cookie(auth_state.config(), &csrf)
                .map_err(|err| anyhow::anyhow!("invalid cookie value: {err}"))?;
            response_headers.append(SET_COOKIE, value);
        }
    }

    Ok((
        StatusCode::OK,
        response_headers,
        Json(MeResponse {
            user: Some(UserResponse::from(user)),
        }),
    )
        .into_response())
}
