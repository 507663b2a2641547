use axum::{
    Json,
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use secrecy::SecretString;
use std::{net::SocketAddr, sync::Arc};
use tracing::instrument;

use super::{
    client_ip, start_session,
    types::{AuthResponse, ErrorResponse, LoginRequest, UserResponse},
};
use crate::auth::{
    AuthError, AuthState, EventKind, FailureOutcome, RateLimitDecision, SecurityEvent,
    rate_limit::{limiter_key, retry_after_seconds},
};

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in; session and CSRF cookies set", body = AuthResponse),
        (status = 400, description = "Missing email or password", body = ErrorResponse),
        (status = 401, description = "Invalid email or password", body = ErrorResponse),
        (status = 429, description = "Too many failed attempts; see Retry-After", body = ErrorResponse),
        (status = 503, description = "Storage unavailable", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    auth_state: Extension<Arc<AuthState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Option<Json<LoginRequest>>,
) -> Result<Response, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation("Missing payload".to_string()));
    };
    if request.email.trim().is_empty() || request.password.is_empty() {
        return Err(AuthError::Validation(
            "Email and password are required".to_string(),
        ));
    }

    let now = Utc::now();
    let ip = client_ip(&auth_state, &headers, connect_info);
    let key = limiter_key(&ip, &request.email);

    // Locked keys are refused before the password is even looked at.
    if let RateLimitDecision::Locked { until } =
        auth_state.rate_limiter().check_allowed(&key, now).await?
    {
        let retry_after = retry_after_seconds(until, now);
        auth_state.events().emit(
            &SecurityEvent::new(EventKind::LoginLockout, now)
                .with_email(&request.email)
                .with_client_ip(&ip)
                .with_reason("locked")
                .with_retry_after(retry_after),
        );
        return Err(AuthError::Locked {
            retry_after_seconds: retry_after,
        });
    }

    let user_id = match auth_state
        .credentials()
        .verify(&request.email, SecretString::from(request.password))
        .await
    {
        Ok(user_id) => user_id,
        Err(AuthError::AuthFailed) => {
            return Err(record_failure(&auth_state, &key, &request.email, &ip).await);
        }
        Err(err) => return Err(err),
    };

    auth_state.rate_limiter().record_success(&key).await?;
    let cookies = start_session(&auth_state, user_id, now).await?;
    auth_state.events().emit(
        &SecurityEvent::new(EventKind::LoginSuccess, now)
            .with_user(user_id)
            .with_email(&request.email)
            .with_client_ip(&ip),
    );

    let user = auth_state
        .credentials()
        .find_user(user_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("user {user_id} missing after login"))?;

    Ok((
        StatusCode::OK,
        cookies,
        Json(AuthResponse {
            user: UserResponse::from(user),
        }),
    )
        .into_response())
}

/// Count the failure and pick the error the client sees. The failure that
/// trips the threshold already answers with 429.
async fn record_failure(auth_state: &AuthState, key: &str, email: &str, ip: &str) -> AuthError {
    // Hashing takes a while; measure lockout from when the failure is known.
    let now = Utc::now();
    auth_state.events().emit(
        &SecurityEvent::new(EventKind::LoginFailure, now)
            .with_email(email)
            .with_client_ip(ip),
    );

    match auth_state.rate_limiter().record_failure(key, now).await {
        Ok(FailureOutcome::Counted { .. }) => AuthError::AuthFailed,
        Ok(FailureOutcome::LockedOut { until }) => {
            let retry_after = retry_after_seconds(until, now);
            auth_state.events().emit(
                &SecurityEvent::new(EventKind::LoginLockout, now)
                    .with_email(email)
                    .with_client_ip(ip)
                    .with_reason("threshold")
                    .with_retry_after(retry_after),
            );
            AuthError::Locked {
                retry_after_seconds: retry_after,
            }
        }
        Err(err) => AuthError::Unavailable(err),
    }
}
