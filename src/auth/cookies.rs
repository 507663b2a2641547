//! Session and CSRF cookies.
//!
//! The session cookie is `HttpOnly`; the CSRF cookie is deliberately readable
//! by page scripts so they can echo it in `X-CSRF-Token`.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{COOKIE, InvalidHeaderValue},
};

use super::config::AuthConfig;

pub const SESSION_COOKIE_NAME: &str = "subtracker_session";
pub const CSRF_COOKIE_NAME: &str = "subtracker_csrf";

/// Build the `HttpOnly` cookie carrying the session token.
///
/// # Errors
/// Returns an error if the token contains bytes not allowed in a header.
pub fn session_cookie(config: &AuthConfig, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(config, SESSION_COOKIE_NAME, token, max_age(config), true)
}

/// Build the script-readable cookie carrying the CSRF token.
///
/// # Errors
/// Returns an error if the token contains bytes not allowed in a header.
pub fn csrf_cookie(config: &AuthConfig, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(config, CSRF_COOKIE_NAME, token, max_age(config), false)
}

/// Expire both cookies.
///
/// # Errors
/// Returns an error if a cookie cannot be encoded.
pub fn clear_cookies(config: &AuthConfig) -> Result<[HeaderValue; 2], InvalidHeaderValue> {
    Ok([
        build_cookie(config, SESSION_COOKIE_NAME, "", 0, true)?,
        build_cookie(config, CSRF_COOKIE_NAME, "", 0, false)?,
    ])
}

/// Read one cookie value from the request.
#[must_use]
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let mut parts = pair.trim().splitn(2, '=');
            let key = parts.next()?.trim();
            let val = parts.next()?.trim();
            (key == name && !val.is_empty()).then(|| val.to_string())
        })
}

fn max_age(config: &AuthConfig) -> i64 {
    config.session_policy().lifetime.num_seconds()
}

fn build_cookie(
    config: &AuthConfig,
    name: &str,
    value: &str,
    max_age: i64,
    http_only: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{name}={value}; Path=/; SameSite={}; Max-Age={max_age}",
        config.cookie_same_site().as_str()
    );
    if http_only {
        cookie.push_str("; HttpOnly");
    }
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}
