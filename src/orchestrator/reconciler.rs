//! Periodic reconcilers
//!
//! A status reconciler rewrites container status from the engine's view and
//! sweeps orphaned port records every 30 seconds; a retention sweeper trims
//! the automation log hourly.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Orchestrator;

const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);
const RETENTION_INTERVAL: Duration = Duration::from_secs(3600);

/// Spawn the background reconcilers. Both stop when the token cancels.
pub fn spawn_reconcilers(orch: Arc<Orchestrator>, cancel: CancellationToken) {
    {
        let orch = orch.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RECONCILE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                debug!("Running status reconcile pass");
                orch.reconcile_once().await;
            }
            info!("Status reconciler stopped");
        });
    }

    tokio::spawn(async move {
        let retention = orch.config.automation_log_retention;
        let mut ticker = tokio::time::interval(RETENTION_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let cutoff = chrono::Utc::now().timestamp() - retention.as_secs() as i64;
            let conn = orch.db.conn().await;
            match orch.db.automation_logs.cleanup(&conn, cutoff) {
                Ok(0) => {}
                Ok(deleted) => info!("Retention sweep deleted {} automation log entries", deleted),
                Err(e) => warn!("Retention sweep failed: {}", e),
            }
        }
        info!("Retention sweeper stopped");
    });
}
