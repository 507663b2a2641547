use axum::{
    Json,
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use secrecy::SecretString;
use std::{net::SocketAddr, sync::Arc};
use tracing::{info, instrument};

use super::{
    cleared_cookie_headers, client_ip,
    types::{ErrorResponse, PasswordChangeRequest, PasswordChangeResponse},
};
use crate::auth::{
    AuthError, AuthState, EventKind, FailureOutcome, RateLimitDecision, SecurityEvent,
    cookies::{SESSION_COOKIE_NAME, read_cookie},
    guard::{csrf_header, require_csrf, require_session},
    rate_limit::{limiter_key, retry_after_seconds},
};

/// Change the caller's password. Every session of the user ends, including
/// the one making the request, so the client has to sign in again.
#[utoipa::path(
    post,
    path = "/api/auth/password",
    request_body = PasswordChangeRequest,
    responses(
        (status = 200, description = "Password changed; all sessions revoked", body = PasswordChangeResponse),
        (status = 400, description = "New password rejected", body = ErrorResponse),
        (status = 401, description = "No session or wrong current password", body = ErrorResponse),
        (status = 403, description = "Invalid CSRF token", body = ErrorResponse),
        (status = 429, description = "Too many failed attempts; see Retry-After", body = ErrorResponse),
        (status = 503, description = "Storage unavailable", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn change_password(
    auth_state: Extension<Arc<AuthState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Option<Json<PasswordChangeRequest>>,
) -> Result<Response, AuthError> {
    let now = Utc::now();
    let ip = client_ip(&auth_state, &headers, connect_info);
    let token = read_cookie(&headers, SESSION_COOKIE_NAME);

    let principal = require_session(&auth_state, token.as_deref(), &ip, now).await?;
    require_csrf(&auth_state, principal, csrf_header(&headers), &ip, now).await?;

    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation("Missing payload".to_string()));
    };

    let user = auth_state
        .credentials()
        .find_user(principal.user_id)
        .await?
        .ok_or(AuthError::Unauthorized)?;

    let key = limiter_key(&ip, &user.email);
    if let RateLimitDecision::Locked { until } =
        auth_state.rate_limiter().check_allowed(&key, now).await?
    {
        return Err(AuthError::Locked {
            retry_after_seconds: retry_after_seconds(until, now),
        });
    }

    let result = auth_state
        .credentials()
        .reset_password(
            &user.email,
            SecretString::from(request.current_password),
            SecretString::from(request.new_password),
            now,
        )
        .await;

    match result {
        Ok((user_id, revoked)) => {
            auth_state.rate_limiter().record_success(&key).await?;
            auth_state.events().emit(
                &SecurityEvent::new(EventKind::PasswordResetSuccess, now)
                    .with_user(user_id)
                    .with_client_ip(&ip),
            );
            info!("password changed, {revoked} session(s) revoked");

            Ok((
                StatusCode::OK,
                cleared_cookie_headers(&auth_state),
                Json(PasswordChangeResponse {
                    password_changed: true,
                    sessions_revoked: revoked,
                }),
            )
                .into_response())
        }
        Err(AuthError::AuthFailed) => {
            let now = Utc::now();
            let event = SecurityEvent::new(EventKind::PasswordResetFailure, now)
                .with_user(principal.user_id)
                .with_client_ip(&ip);
            match auth_state.rate_limiter().record_failure(&key, now).await? {
                FailureOutcome::Counted { .. } => {
                    auth_state.events().emit(&event.with_reason("wrong_password"));
                    Err(AuthError::AuthFailed)
                }
                FailureOutcome::LockedOut { until } => {
                    let retry_after = retry_after_seconds(until, now);
                    auth_state.events().emit(
                        &event
                            .with_reason("threshold")
                            .with_retry_after(retry_after),
                    );
                    Err(AuthError::Locked {
                        retry_after_seconds: retry_after,
                    })
                }
            }
        }
        Err(err) => {
            if matches!(err, AuthError::Validation(_)) {
                auth_state.events().emit(
                    &SecurityEvent::new(EventKind::PasswordResetFailure, now)
                        .with_user(principal.user_id)
                        .with_client_ip(&ip)
                        .with_reason("policy"),
                );
            }
            Err(err)
        }
    }
}
