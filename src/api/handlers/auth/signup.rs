use axum::{
    Json,
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use secrecy::SecretString;
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, instrument};

use super::{
    client_ip, start_session,
    types::{AuthResponse, ErrorResponse, SignupRequest, UserResponse},
};
use crate::auth::{AuthError, AuthState, EventKind, SecurityEvent};

#[utoipa::path(
    post,
    path = "/api/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created and signed in", body = AuthResponse),
        (status = 400, description = "Invalid name, email or password", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
        (status = 503, description = "Storage unavailable", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn signup(
    auth_state: Extension<Arc<AuthState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Option<Json<SignupRequest>>,
) -> Result<Response, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation("Missing payload".to_string()));
    };
    let now = Utc::now();
    let ip = client_ip(&auth_state, &headers, connect_info);

    let user_id = match auth_state
        .credentials()
        .create_user(
            &request.name,
            &request.email,
            SecretString::from(request.password),
            now,
        )
        .await
    {
        Ok(user_id) => user_id,
        Err(AuthError::Conflict) => {
            auth_state.events().emit(
                &SecurityEvent::new(EventKind::SignupConflict, now)
                    .with_email(&request.email)
                    .with_client_ip(&ip),
            );
            return Err(AuthError::Conflict);
        }
        Err(err) => return Err(err),
    };

    auth_state.events().emit(
        &SecurityEvent::new(EventKind::SignupSuccess, now)
            .with_user(user_id)
            .with_email(&request.email)
            .with_client_ip(&ip),
    );
    debug!("created user {user_id}");

    let cookies = start_session(&auth_state, user_id, now).await?;
    let user = auth_state
        .credentials()
        .find_user(user_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("user {user_id} missing after signup"))?;

    Ok((
        StatusCode::CREATED,
        cookies,
        Json(AuthResponse {
            user: UserResponse::from(user),
        }),
    )
        .into_response())
}
