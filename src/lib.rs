//! # Subtracker (authentication & request-security core)
//!
//! `subtracker` is a personal-finance web tool. This crate holds the part of it
//! that has to be right: who the caller is and whether the request may proceed.
//! The subscription/category CRUD surface consumes the gates exported from
//! [`auth::guard`].
//!
//! ## Components
//!
//! - **Credential Store** ([`auth::credentials`]): salted, memory-hard password
//!   hashes (`Argon2id`), constant-time verification, uniform failure responses.
//! - **Session Manager** ([`auth::sessions`]): opaque bearer tokens stored only as
//!   SHA-256 digests, absolute and idle expiry, rotation on every login.
//! - **CSRF Binder** ([`auth::csrf`]): a second per-session secret delivered in a
//!   script-readable cookie and echoed back in `X-CSRF-Token`.
//! - **Login Rate Limiter** ([`auth::rate_limit`]): failure counters persisted per
//!   `address|email` pair, lockouts that survive restarts.
//! - **Security Event Log** ([`auth::events`]): structured, best-effort audit
//!   records that never carry secrets.
//!
//! All state lives in `SQLite`; there is no in-process session cache, so every
//! worker sees the same revocations and lockouts.

pub mod api;
pub mod auth;
pub mod cli;
pub mod db;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
