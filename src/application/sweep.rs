//! Periodic reconciliation of expired holds.
//!
//! Expiry is polling-based: a hold past `expires_at` stays on the books
//! until the next sweep, so the sweep interval is the maximum staleness
//! window (see `LedgerConfig::sweep_interval_secs`). Each hold's release is
//! its own transaction with a guarded status transition, so reprocessing an
//! already-settled hold is a no-op and one failure never blocks the rest of
//! the batch.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::{HoldStatus, LedgerError};

use super::WalletService;

/// Counts from one sweep run.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// Holds transitioned to `expired` by this run.
    pub released: usize,
    /// Holds another settlement won between scan and transition.
    pub skipped: usize,
    /// Holds whose release failed; retried on the next run.
    pub failed: usize,
}

impl WalletService {
    /// Release every active hold whose expiry has passed. Idempotent: holds
    /// already settled by a racing release/capture are skipped.
    pub async fn release_expired_holds(&self) -> Result<SweepReport, LedgerError> {
        let expired = self.repo().list_expired_holds(Utc::now()).await?;
        let mut report = SweepReport::default();

        for hold in expired {
            match self
                .repo()
                .settle_hold_released(hold.id, HoldStatus::Expired)
                .await
            {
                Ok(Some(settlement)) => {
                    report.released += 1;
                    self.invalidate_wallet(settlement.wallet.user_id, settlement.wallet.kind);
                }
                Ok(None) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(hold_id = %hold.id, error = %err, "failed to release expired hold");
                }
            }
        }

        if report.released > 0 || report.failed > 0 {
            info!(
                released = report.released,
                skipped = report.skipped,
                failed = report.failed,
                "hold expiry sweep finished"
            );
        }
        Ok(report)
    }
}

/// Run the expiry sweep on a fixed interval until the task is aborted.
/// Individual run failures are logged; the loop keeps going.
pub fn spawn_hold_sweeper(service: WalletService, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = service.release_expired_holds().await {
                warn!(error = %err, "hold expiry sweep failed");
            }
        }
    })
}
