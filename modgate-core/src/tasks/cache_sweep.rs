// modgate-core/src/tasks/cache_sweep.rs

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::cache::VerdictCache;

/// Upper bound on how long expired entries may linger between sweeps.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// Spawns a background task that periodically removes expired verdicts.
///
/// Runs every `min(ttl, 60s)` until the shutdown signal flips. A panicking
/// sweep is caught and logged; the loop keeps running.
pub fn spawn_cache_sweep_task(
    cache: Arc<VerdictCache>,
    ttl: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let period = if ttl.is_zero() {
        MAX_SWEEP_INTERVAL
    } else {
        ttl.min(MAX_SWEEP_INTERVAL)
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first interval tick completes immediately; skip it.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                }
                _ = ticker.tick() => {
                    let sweep = catch_unwind(AssertUnwindSafe(|| {
                        cache.remove_expired(Instant::now());
                    }));
                    if let Err(payload) = sweep {
                        warn!(panic = panic_message(payload.as_ref()), "verdict cache sweep panicked");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use modgate_common::models::{StatusCode, Verdict};

    use super::*;

    #[tokio::test]
    async fn sweep_task_removes_expired_entries() {
        let cache = Arc::new(VerdictCache::new(64 * 1024).expect("cache"));
        cache.insert(
            "stale",
            Verdict {
                status: StatusCode::Suspicious,
                reason: "old".into(),
                confidence: 0.9,
                trigger_tokens: Vec::new(),
                violator_user_id: 1,
                message_id: 1,
            },
            Duration::from_millis(5),
            Instant::now(),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_cache_sweep_task(Arc::clone(&cache), Duration::from_millis(10), shutdown_rx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.len(), 0, "expired entry should be swept");

        shutdown_tx.send(true).expect("signal shutdown");
        handle.await.expect("task exits cleanly");
    }

    #[tokio::test]
    async fn sweep_task_stops_on_shutdown() {
        let cache = Arc::new(VerdictCache::new(1024).expect("cache"));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_cache_sweep_task(cache, Duration::from_secs(3600), shutdown_rx);

        shutdown_tx.send(true).expect("signal shutdown");
        handle.await.expect("task exits cleanly");
    }
}
