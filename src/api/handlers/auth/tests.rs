use crate::{
    api,
    auth::{
        AuthConfig, AuthState, EventKind, KdfParams, SecurityLog,
        cookies::{CSRF_COOKIE_NAME, SESSION_COOKIE_NAME},
        csrf::CSRF_HEADER_NAME,
        events::MemorySink,
    },
    db,
};
use anyhow::Result;
use axum::{
    Router,
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{
        Method, Request, StatusCode,
        header::{CONTENT_TYPE, COOKIE, RETRY_AFTER, SET_COOKIE},
    },
    response::Response,
};
use serde_json::{Value, json};
use std::{net::SocketAddr, sync::Arc};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    sink: Arc<MemorySink>,
}

impl TestApp {
    async fn new() -> Result<Self> {
        let pool = db::connect_in_memory().await?;
        let sink = Arc::new(MemorySink::default());
        let config = AuthConfig::default().with_kdf(KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        });
        let state = Arc::new(AuthState::new(
            pool.clone(),
            config,
            SecurityLog::default().with_sink(sink.clone()),
        ));
        let router = api::router(pool, state)
            .layer(MockConnectInfo(SocketAddr::from(([203, 0, 113, 7], 40000))));
        Ok(Self { router, sink })
    }

    async fn send(&self, request: Request<Body>) -> Result<Response> {
        Ok(self.router.clone().oneshot(request).await?)
    }

    async fn post(&self, uri: &str, body: &Value, session: &Session) -> Result<Response> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        if let Some(cookie) = session.cookie_header() {
            builder = builder.header(COOKIE, cookie);
        }
        if let Some(csrf) = &session.csrf {
            builder = builder.header(CSRF_HEADER_NAME, csrf);
        }
        self.send(builder.body(Body::from(body.to_string()))?).await
    }

    async fn me(&self, session: &Session) -> Result<Response> {
        let mut builder = Request::builder().uri("/api/auth/me");
        if let Some(cookie) = session.cookie_header() {
            builder = builder.header(COOKIE, cookie);
        }
        self.send(builder.body(Body::empty())?).await
    }

    async fn signup(&self, email: &str, password: &str) -> Result<Session> {
        let response = self
            .post(
                "/api/auth/signup",
                &json!({ "name": "Alice", "email": email, "password": password }),
                &Session::default(),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
        Ok(Session::from_response(&response))
    }

    async fn login(&self, email: &str, password: &str) -> Result<Response> {
        self.post(
            "/api/auth/login",
            &json!({ "email": email, "password": password }),
            &Session::default(),
        )
        .await
    }
}

/// Cookies a browser would hold, plus the CSRF value a page script would echo.
#[derive(Default, Clone)]
struct Session {
    token: Option<String>,
    csrf: Option<String>,
    send_csrf_cookie: bool,
}

impl Session {
    fn from_response(response: &Response) -> Self {
        let cookies = set_cookies(response);
        Self {
            token: cookie_value(&cookies, SESSION_COOKIE_NAME),
            csrf: cookie_value(&cookies, CSRF_COOKIE_NAME),
            send_csrf_cookie: true,
        }
    }

    fn without_csrf(&self) -> Self {
        Self {
            token: self.token.clone(),
            csrf: None,
            send_csrf_cookie: false,
        }
    }

    fn cookie_header(&self) -> Option<String> {
        let token = self.token.as_ref()?;
        let mut header = format!("{SESSION_COOKIE_NAME}={token}");
        if let (true, Some(csrf)) = (self.send_csrf_cookie, &self.csrf) {
            header.push_str(&format!("; {CSRF_COOKIE_NAME}={csrf}"));
        }
        Some(header)
    }
}

fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .collect()
}

fn cookie_value(set_cookies: &[String], name: &str) -> Option<String> {
    set_cookies.iter().find_map(|cookie| {
        let pair = cookie.split(';').next()?;
        let (key, value) = pair.split_once('=')?;
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}

async fn body_json(response: Response) -> Result<Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn signup_creates_account_and_session() -> Result<()> {
    let app = TestApp::new().await?;
    let response = app
        .post(
            "/api/auth/signup",
            &json!({ "name": "Alice", "email": " Alice@Example.com ", "password": "password1" }),
            &Session::default(),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 2);
    assert!(cookies.iter().any(|c| c.starts_with(SESSION_COOKIE_NAME) && c.contains("HttpOnly")));
    assert!(cookies.iter().any(|c| c.starts_with(CSRF_COOKIE_NAME) && !c.contains("HttpOnly")));

    let body = body_json(response).await?;
    assert_eq!(body["user"]["email"], "alice@example.com");
    assert_eq!(body["user"]["name"], "Alice");
    assert!(body["user"].get("password_hash").is_none());
    assert_eq!(app.sink.kinds(), vec![EventKind::SignupSuccess]);
    Ok(())
}

#[tokio::test]
async fn duplicate_signup_conflicts() -> Result<()> {
    let app = TestApp::new().await?;
    app.signup("alice@example.com", "password1").await?;

    let response = app
        .post(
            "/api/auth/signup",
            &json!({ "name": "Other", "email": "ALICE@example.com", "password": "password2" }),
            &Session::default(),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(set_cookies(&response).is_empty());
    assert_eq!(
        app.sink.kinds(),
        vec![EventKind::SignupSuccess, EventKind::SignupConflict]
    );
    Ok(())
}

#[tokio::test]
async fn signup_rejects_bad_input() -> Result<()> {
    let app = TestApp::new().await?;
    for body in [
        json!({ "name": "A", "email": "a@example.com", "password": "password1" }),
        json!({ "name": "Alice", "email": "not-an-email", "password": "password1" }),
        json!({ "name": "Alice", "email": "a@example.com", "password": "short" }),
    ] {
        let response = app.post("/api/auth/signup", &body, &Session::default()).await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    let missing_body = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/auth/signup")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(missing_body.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn login_failures_are_uniform() -> Result<()> {
    let app = TestApp::new().await?;
    app.signup("alice@example.com", "password1").await?;

    let wrong_password = app.login("alice@example.com", "password2").await?;
    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    let wrong_password = body_json(wrong_password).await?;

    let unknown_email = app.login("bob@example.com", "password1").await?;
    assert_eq!(unknown_email.status(), StatusCode::UNAUTHORIZED);
    let unknown_email = body_json(unknown_email).await?;

    assert_eq!(wrong_password, unknown_email);
    assert_eq!(wrong_password["error"], "Invalid email or password");
    Ok(())
}

#[tokio::test]
async fn login_rotates_sessions() -> Result<()> {
    let app = TestApp::new().await?;
    let first = app.signup("alice@example.com", "password1").await?;

    let response = app.login("alice@example.com", "password1").await?;
    assert_eq!(response.status(), StatusCode::OK);
    let second = Session::from_response(&response);
    assert_ne!(first.token, second.token);

    let me = body_json(app.me(&first).await?).await?;
    assert!(me["user"].is_null());
    let me = body_json(app.me(&second).await?).await?;
    assert_eq!(me["user"]["email"], "alice@example.com");
    assert!(app.sink.kinds().contains(&EventKind::LoginSuccess));
    Ok(())
}

#[tokio::test]
async fn repeated_failures_lock_the_pair() -> Result<()> {
    let app = TestApp::new().await?;
    app.signup("alice@example.com", "password1").await?;

    for _ in 0..4 {
        let response = app.login("alice@example.com", "wrong-pass").await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // The failure that reaches the threshold is already answered with 429.
    let fifth = app.login("alice@example.com", "wrong-pass").await?;
    assert_eq!(fifth.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = fifth
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or_default();
    assert!(retry_after > 0 && retry_after <= 15 * 60);

    // Correct password while locked is refused without a session.
    let locked = app.login("alice@example.com", "password1").await?;
    assert_eq!(locked.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(locked.headers().contains_key(RETRY_AFTER));
    assert!(set_cookies(&locked).is_empty());

    // A different email from the same address is unaffected.
    app.signup("bob@example.com", "password1").await?;
    let other = app.login("bob@example.com", "password1").await?;
    assert_eq!(other.status(), StatusCode::OK);

    let events = app.sink.events();
    let reasons: Vec<_> = events
        .iter()
        .filter(|event| event.event == EventKind::LoginLockout)
        .map(|event| event.reason)
        .collect();
    assert_eq!(reasons, vec![Some("threshold"), Some("locked")]);
    assert!(events
        .iter()
        .all(|event| event.client_ip.as_deref() == Some("203.0.113.7")));
    Ok(())
}

#[tokio::test]
async fn me_reports_anonymous_as_null() -> Result<()> {
    let app = TestApp::new().await?;
    let response = app.me(&Session::default()).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response).await?["user"].is_null());

    let forged = Session {
        token: Some("forged-token".to_string()),
        ..Session::default()
    };
    let response = app.me(&forged).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response).await?["user"].is_null());
    Ok(())
}

#[tokio::test]
async fn me_reissues_missing_csrf_cookie() -> Result<()> {
    let app = TestApp::new().await?;
    let session = app.signup("alice@example.com", "password1").await?;

    let with_cookie = app.me(&session).await?;
    assert!(set_cookies(&with_cookie).is_empty());

    let response = app.me(&session.without_csrf()).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let reissued = cookie_value(&set_cookies(&response), CSRF_COOKIE_NAME);
    assert!(reissued.is_some());
    assert_ne!(reissued, session.csrf);

    // Only the newest token is bound to the session.
    let stale = app.post("/api/auth/logout", &json!({}), &session).await?;
    assert_eq!(stale.status(), StatusCode::FORBIDDEN);

    let fresh = Session {
        csrf: reissued,
        ..session
    };
    let response = app.post("/api/auth/logout", &json!({}), &fresh).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn logout_requires_csrf_and_clears_cookies() -> Result<()> {
    let app = TestApp::new().await?;
    let session = app.signup("alice@example.com", "password1").await?;

    let forbidden = app
        .post("/api/auth/logout", &json!({}), &session.without_csrf())
        .await?;
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
    assert!(app.sink.kinds().contains(&EventKind::CsrfFailure));

    let response = app.post("/api/auth/logout", &json!({}), &session).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 2);
    assert!(cookies.iter().all(|cookie| cookie.contains("Max-Age=0")));
    assert_eq!(body_json(response).await?, json!({ "loggedOut": true }));
    assert!(app.sink.kinds().contains(&EventKind::Logout));

    let me = body_json(app.me(&session).await?).await?;
    assert!(me["user"].is_null());
    Ok(())
}

#[tokio::test]
async fn logout_without_session_still_clears_cookies() -> Result<()> {
    let app = TestApp::new().await?;
    let response = app
        .post("/api/auth/logout", &json!({}), &Session::default())
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(set_cookies(&response).len(), 2);
    Ok(())
}

#[tokio::test]
async fn logout_with_revoked_session_logs_the_cause() -> Result<()> {
    let app = TestApp::new().await?;
    let first = app.signup("alice@example.com", "password1").await?;
    let response = app.login("alice@example.com", "password1").await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.post("/api/auth/logout", &json!({}), &first).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response)
        .iter()
        .all(|cookie| cookie.contains("Max-Age=0")));

    let events = app.sink.events();
    let rejected = events
        .iter()
        .find(|event| event.event == EventKind::SessionRejected);
    assert_eq!(rejected.and_then(|event| event.reason), Some("revoked"));
    assert_eq!(
        rejected.and_then(|event| event.client_ip.as_deref()),
        Some("203.0.113.7")
    );
    assert!(!app.sink.kinds().contains(&EventKind::Logout));
    Ok(())
}

#[tokio::test]
async fn password_change_revokes_every_session() -> Result<()> {
    let app = TestApp::new().await?;
    let session = app.signup("alice@example.com", "password1").await?;

    let response = app
        .post(
            "/api/auth/password",
            &json!({ "currentPassword": "password1", "newPassword": "password2" }),
            &session,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response)
        .iter()
        .all(|cookie| cookie.contains("Max-Age=0")));
    let body = body_json(response).await?;
    assert_eq!(body["passwordChanged"], true);
    assert_eq!(body["sessionsRevoked"], 1);

    let me = body_json(app.me(&session).await?).await?;
    assert!(me["user"].is_null());
    assert_eq!(
        app.login("alice@example.com", "password1").await?.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        app.login("alice@example.com", "password2").await?.status(),
        StatusCode::OK
    );
    assert!(app.sink.kinds().contains(&EventKind::PasswordResetSuccess));
    Ok(())
}

#[tokio::test]
async fn wrong_current_password_changes_nothing() -> Result<()> {
    let app = TestApp::new().await?;
    let session = app.signup("alice@example.com", "password1").await?;

    let response = app
        .post(
            "/api/auth/password",
            &json!({ "current_password": "nope-nope", "new_password": "password2" }),
            &session,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.sink.kinds().contains(&EventKind::PasswordResetFailure));

    let me = body_json(app.me(&session).await?).await?;
    assert_eq!(me["user"]["email"], "alice@example.com");
    assert_eq!(
        app.login("alice@example.com", "password1").await?.status(),
        StatusCode::OK
    );
    Ok(())
}

#[tokio::test]
async fn password_change_needs_session_and_csrf() -> Result<()> {
    let app = TestApp::new().await?;
    let session = app.signup("alice@example.com", "password1").await?;
    let body = json!({ "currentPassword": "password1", "newPassword": "password2" });

    let anonymous = app
        .post("/api/auth/password", &body, &Session::default())
        .await?;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let no_csrf = app
        .post("/api/auth/password", &body, &session.without_csrf())
        .await?;
    assert_eq!(no_csrf.status(), StatusCode::FORBIDDEN);

    let me = body_json(app.me(&session).await?).await?;
    assert_eq!(me["user"]["email"], "alice@example.com");
    Ok(())
}
