//! Authentication and request-security core.
//!
//! Every operation takes `now` explicitly and keeps its state in the database,
//! so behaviour is the same no matter which worker serves a request.

pub mod config;
pub mod cookies;
pub mod credentials;
pub mod csrf;
pub mod error;
pub mod events;
pub mod guard;
pub mod rate_limit;
pub mod sessions;
pub mod state;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{AuthConfig, Environment, KdfParams, RateLimitPolicy, SameSite, SessionPolicy};
pub use credentials::{CredentialStore, UserRecord};
pub use csrf::{CsrfBinder, CsrfCheck};
pub use error::AuthError;
pub use events::{EventKind, JsonLinesSink, SecurityEvent, SecurityLog, SecuritySink, TracingSink};
pub use guard::{Principal, require_authenticated, require_csrf, require_session};
pub use rate_limit::{FailureOutcome, LoginRateLimiter, RateLimitDecision};
pub use sessions::{Session, SessionCheck, SessionManager, SessionRejection};
pub use state::AuthState;
