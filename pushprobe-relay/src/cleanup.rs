//! Background cleanup: prune old test runs and idle rate-limit buckets.

use crate::rate_limit::RateLimiter;
use pushprobe_core::TestRuns;
use std::time::Duration;
use tokio::time;

const SECS_PER_DAY: i64 = 86_400;

pub fn spawn_cleanup_task(
    test_runs: TestRuns,
    limiter: RateLimiter,
    retention_days: u64,
    interval_secs: u64,
) {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;
            if let Err(e) = run_cleanup(&test_runs, retention_days, chrono::Utc::now().timestamp()) {
                tracing::error!("Cleanup error: {}", e);
            }
            let pruned = limiter.prune_idle(Duration::from_secs(3600));
            if pruned > 0 {
                tracing::debug!(pruned, "Dropped idle rate-limit buckets");
            }
        }
    });
}

/// Deletes test runs older than the retention window. Devices are never touched.
fn run_cleanup(
    test_runs: &TestRuns,
    retention_days: u64,
    now: i64,
) -> pushprobe_core::Result<usize> {
    if retention_days == 0 {
        return Ok(0);
    }

    let cutoff = now - (retention_days as i64 * SECS_PER_DAY);
    let removed = test_runs.prune_created_before(cutoff)?;
    if removed > 0 {
        tracing::info!(removed, "Pruned expired test runs");
    }
    tracing::debug!("Cleanup completed");
    Ok(removed)
}
