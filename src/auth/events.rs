//! Security event log.
//!
//! Events are append-only and best-effort: a sink that fails is reported with
//! `warn!` and otherwise ignored, so auditing never decides whether a request
//! succeeds. Emails are recorded as [`hash_identifier`] pseudonyms; passwords,
//! tokens and hash material are never part of an event.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    fs::OpenOptions,
    path::Path,
    sync::{Arc, Mutex},
};
use tokio::{
    io::AsyncWriteExt,
    sync::mpsc::{UnboundedSender, unbounded_channel},
    task::JoinHandle,
};
use tracing::{info, warn};
use uuid::Uuid;

use super::utils::hash_identifier;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SignupConflict,
    SignupSuccess,
    LoginFailure,
    LoginLockout,
    LoginSuccess,
    CsrfFailure,
    SessionIdleExpired,
    SessionRejected,
    Logout,
    PasswordResetSuccess,
    PasswordResetFailure,
}

impl EventKind {
    #[must_use]
    pub const fn outcome(self) -> Outcome {
        match self {
            Self::SignupSuccess | Self::LoginSuccess | Self::Logout | Self::PasswordResetSuccess => {
                Outcome::Success
            }
            Self::LoginLockout | Self::CsrfFailure | Self::SessionIdleExpired | Self::SessionRejected => {
                Outcome::Denied
            }
            Self::SignupConflict | Self::LoginFailure | Self::PasswordResetFailure => {
                Outcome::Failure
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Denied,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SecurityEvent {
    pub event: EventKind,
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl SecurityEvent {
    #[must_use]
    pub fn new(event: EventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            event,
            timestamp,
            outcome: event.outcome(),
            user_id: None,
            email_hash: None,
            client_ip: None,
            reason: None,
            retry_after_seconds: None,
        }
    }

    #[must_use]
    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Attach the pseudonym of an email; the address itself is not kept.
    #[must_use]
    pub fn with_email(mut self, email: &str) -> Self {
        self.email_hash = Some(hash_identifier(email));
        self
    }

    #[must_use]
    pub fn with_client_ip(mut self, client_ip: &str) -> Self {
        self.client_ip = Some(client_ip.to_string());
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = Some(reason);
        self
    }

    #[must_use]
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_seconds = Some(seconds);
        self
    }
}

/// Destination for security events.
pub trait SecuritySink: Send + Sync {
    /// # Errors
    /// Returns an error if the event could not be written.
    fn record(&self, event: &SecurityEvent) -> Result<()>;
}

/// Emits each event as a `tracing` record under the `security` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl SecuritySink for TracingSink {
    fn record(&self, event: &SecurityEvent) -> Result<()> {
        let payload = serde_json::to_string(event).context("failed to serialize security event")?;
        info!(target: "security", event = ?event.event, outcome = ?event.outcome, "{payload}");
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
///
/// Events are queued to a writer task so a slow disk never blocks the
/// request that emitted them.
#[derive(Debug)]
pub struct JsonLinesSink {
    lines: UnboundedSender<Vec<u8>>,
}

impl JsonLinesSink {
    /// Open `path` for appending and start the writer task. The task ends
    /// once the sink is dropped and the queue is drained.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened for appending.
    pub fn spawn(path: impl AsRef<Path>) -> Result<(Self, JoinHandle<()>)> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open security log: {}", path.display()))?;
        let (lines, mut queue) = unbounded_channel::<Vec<u8>>();
        let mut file = tokio::fs::File::from_std(file);

        let writer = tokio::spawn(async move {
            while let Some(line) = queue.recv().await {
                let written = match file.write_all(&line).await {
                    Ok(()) => file.flush().await,
                    Err(err) => Err(err),
                };
                if let Err(err) = written {
                    warn!("Failed to append security event: {err}");
                }
            }
        });

        Ok((Self { lines }, writer))
    }
}

impl SecuritySink for JsonLinesSink {
    fn record(&self, event: &SecurityEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event).context("failed to serialize security event")?;
        line.push(b'\n');
        self.lines
            .send(line)
            .map_err(|_| anyhow!("security log writer stopped"))
    }
}

/// Keeps events in memory; used by tests that assert on the audit trail.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl MemorySink {
    #[must_use]
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(|event| event.event).collect()
    }
}

impl SecuritySink for MemorySink {
    fn record(&self, event: &SecurityEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

/// Fan-out to every configured sink.
#[derive(Clone, Default)]
pub struct SecurityLog {
    sinks: Vec<Arc<dyn SecuritySink>>,
}

impl SecurityLog {
    /// Log with the tracing sink attached.
    #[must_use]
    pub fn new() -> Self {
        Self::default().with_sink(Arc::new(TracingSink))
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn SecuritySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn emit(&self, event: &SecurityEvent) {
        for sink in &self.sinks {
            if let Err(err) = sink.record(event) {
                warn!("Failed to record security event {:?}: {err:#}", event.event);
            }
        }
    }
}

impl std::fmt::Debug for SecurityLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityLog")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
