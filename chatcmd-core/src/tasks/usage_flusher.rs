// src/tasks/usage_flusher.rs

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::services::commands::registry::CommandRegistry;

/// Spawns a background task that writes pending usage counts every
/// `interval`. Bursts of invocations between two ticks cost one save per
/// command. A last flush runs when `shutdown_rx` flips to `true`.
pub fn spawn_usage_flusher(
    registry: Arc<CommandRegistry>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(100)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        info!("Usage count flusher started (every {:?})", interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let written = registry.flush_usage_counts().await;
                    if written > 0 {
                        debug!("Persisted usage counts for {} commands", written);
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        let written = registry.flush_usage_counts().await;
        info!("Usage count flusher stopped ({} written on shutdown)", written);
    })
}
