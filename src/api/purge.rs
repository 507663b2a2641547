//! Periodic cleanup of stale limiter entries and ended sessions.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, error};

use crate::auth::AuthState;

/// Rows removed by one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub rate_limits: u64,
    pub sessions: u64,
}

/// Run one sweep. Both tables share the limiter's retention horizon.
///
/// # Errors
/// Returns an error if either delete fails.
pub async fn purge_once(state: &AuthState, now: DateTime<Utc>) -> Result<PurgeReport> {
    let rate_limits = state.rate_limiter().purge_stale(now).await?;
    let sessions = state
        .sessions()
        .purge(now, state.config().rate_limit().retention)
        .await?;

    Ok(PurgeReport {
        rate_limits,
        sessions,
    })
}

/// Sweep every `interval` until the runtime shuts down. A failed sweep is
/// logged and retried on the next tick.
pub fn spawn_purge_worker(state: Arc<AuthState>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match purge_once(&state, Utc::now()).await {
                Ok(report) => debug!(
                    "purged {} rate limit entries and {} sessions",
                    report.rate_limits, report.sessions
                ),
                Err(err) => error!("purge sweep failed: {err:#}"),
            }

            sleep(interval).await;
        }
    })
}
