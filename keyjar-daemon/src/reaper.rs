//! Background expiry of abandoned sessions.
//!
//! The store already evicts lazily whenever a key is touched; the reaper
//! reclaims jars nobody asks about again. The sweep loop runs in its own task
//! under a supervisor, so a panic in the store is logged and the loop is
//! restarted without affecting request handling.

use std::sync::Arc;
use std::time::Duration;

use keyjar_auth::session::JarStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::stats::BrokerStats;

/// Lower bound on the sweep period.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Start the supervised reaper.
///
/// The reaper exits once `shutdown` holds `true` or its sender is dropped.
pub fn spawn_reaper(
    store: Arc<dyn JarStore>,
    stats: BrokerStats,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let interval = interval.max(MIN_SWEEP_INTERVAL);

    tokio::spawn(async move {
        loop {
            let worker = tokio::spawn(sweep_loop(
                Arc::clone(&store),
                stats.clone(),
                interval,
                shutdown.clone(),
            ));

            match worker.await {
                Ok(()) => {
                    tracing::info!("Reaper stopped");
                    return;
                }
                Err(e) if e.is_panic() => {
                    stats.record_reaper_restart();
                    tracing::error!(error = %e, "Reaper panicked, restarting");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Reaper cancelled");
                    return;
                }
            }

            // Backoff before restart
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown_signalled(&mut shutdown) => {
                    tracing::info!("Reaper stopped");
                    return;
                }
            }
        }
    })
}

async fn sweep_loop(
    store: Arc<dyn JarStore>,
    stats: BrokerStats,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep_once(store.as_ref(), &stats);
            }
            _ = shutdown_signalled(&mut shutdown) => return,
        }
    }
}

/// Expire and remove every jar past its deadline. Returns how many were
/// removed.
pub fn sweep_once(store: &dyn JarStore, stats: &BrokerStats) -> usize {
    let expired = store.sweep_expired();

    for jar in &expired {
        tracing::debug!(
            client = %jar.fingerprint(),
            jar = %jar.id(),
            expires_at = %jar.expires_at(),
            "Session expired"
        );
    }

    if !expired.is_empty() {
        stats.record_expired(expired.len() as u64);
        tracing::info!(count = expired.len(), remaining = store.len(), "Swept expired sessions");
    }

    expired.len()
}

async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    // Err means the sender is gone, which also means stop
    let _ = shutdown.wait_for(|stop| *stop).await;
}
