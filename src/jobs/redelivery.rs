//! Background job: re-send invitation emails that never went out.
//!
//! Picks up PENDING approvals with no `notified_at` that are older than the
//! grace period, so a request still sending its own batch is left alone.

use std::time::Duration;
use tokio::time;

use crate::approval::ApprovalEngine;

/// Rows younger than this are still owned by the request that created them.
pub const GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Max invitations re-sent per sweep.
pub const SWEEP_LIMIT: i64 = 200;

/// Spawn the redelivery task. Call this once at startup.
pub fn spawn(engine: ApprovalEngine, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            sweep(&engine).await;
        }
    })
}

/// Run one sweep. Errors are logged, never propagated.
pub async fn sweep(engine: &ApprovalEngine) -> usize {
    match engine.redeliver_pending(GRACE_PERIOD, SWEEP_LIMIT).await {
        Ok(0) => 0,
        Ok(n) => {
            tracing::info!(delivered = n, "redelivered pending invitations");
            n
        }
        Err(e) => {
            tracing::error!("redelivery job failed: {}", e);
            0
        }
    }
}
