//! Background storage-hygiene sweeps
//!
//! Evaluation already filters by expiry at read time; these sweeps exist so
//! expired rows do not accumulate, not for correctness. Both are idempotent
//! and safe to run concurrently with evaluation and with each other.

use crate::clock::Clock;
use crate::stores::Stores;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Sweep cadence and retention settings
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How often the sweeps run
    pub interval: Duration,

    /// Grace period an expired override is retained for audit before the
    /// retention sweep hard-deletes it
    pub override_retention: ChronoDuration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            override_retention: ChronoDuration::days(30),
        }
    }
}

/// Run the expiry and retention sweeps on a fixed interval until `shutdown`
/// flips to `true`
///
/// Intended to be spawned as a background task next to the server loop.
pub async fn run_sweeps(
    stores: Stores,
    clock: Arc<dyn Clock>,
    config: SweepConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    // The immediate first tick would sweep before anything can have expired.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep_once(&stores, clock.as_ref(), &config).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("sweeper shutting down");
                    return;
                }
            }
        }
    }
}

/// One pass of both sweeps
pub async fn sweep_once(stores: &Stores, clock: &dyn Clock, config: &SweepConfig) {
    let now = clock.now();

    match stores.assignments.expire_due(now).await {
        Ok(swept) if swept > 0 => info!(swept, "deactivated expired assignments"),
        Ok(_) => {}
        Err(err) => warn!(error = %err, "assignment expiry sweep failed"),
    }

    let cutoff = now - config.override_retention;
    match stores.overrides.purge(cutoff).await {
        Ok(purged) if purged > 0 => info!(purged, "purged expired overrides"),
        Ok(_) => {}
        Err(err) => warn!(error = %err, "override retention sweep failed"),
    }
}
