// src/tasks/cooldown_sweeper.rs

use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::services::commands::cooldown::CooldownTracker;
use crate::services::commands::registry::CommandRegistry;

/// Spawns a background task that drops expired cooldown stamps every
/// `interval`, until `shutdown_rx` flips to `true`. Expiry is judged
/// against the cooldowns currently in `registry`.
pub fn spawn_cooldown_sweeper(
    tracker: Arc<CooldownTracker>,
    registry: Arc<CommandRegistry>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        info!("Cooldown sweeper started (every {:?})", interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = run_cooldown_sweep(&tracker, &registry);
                    if evicted > 0 {
                        debug!("Cooldown sweep evicted {} stamps, {} scopes left", evicted, tracker.scope_count());
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Cooldown sweeper stopped");
    })
}

pub fn run_cooldown_sweep(tracker: &CooldownTracker, registry: &CommandRegistry) -> usize {
    tracker.evict_expired(Utc::now(), |scope| registry.live_cooldown(scope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use chatcmd_common::models::{CommandDefinition, Cooldown};
    use crate::Error;
    use crate::repositories::InMemoryCommandRepository;
    use crate::services::commands::cooldown::CooldownScope;

    fn registry() -> CommandRegistry {
        CommandRegistry::new(Arc::new(InMemoryCommandRepository::new()))
    }

    async fn command_with(reg: &CommandRegistry, trigger: &str, cooldown: Cooldown) -> Result<String, Error> {
        let mut def = CommandDefinition::new("", trigger);
        def.cooldown = Some(cooldown);
        Ok(reg.save_custom_command(def, None, true).await?.id)
    }

    #[tokio::test]
    async fn test_sweep_drops_only_expired_entries() -> Result<(), Error> {
        let reg = registry();
        let old = command_with(&reg, "!old", Cooldown::user(5)).await?;
        let fresh = command_with(&reg, "!fresh", Cooldown::user(600)).await?;

        let tracker = CooldownTracker::new();
        let past = Utc::now() - ChronoDuration::seconds(120);
        tracker
            .check_and_reserve(&CooldownScope::command(&old), "u1", &Cooldown::user(5), past)
            .unwrap();
        tracker
            .check_and_reserve(&CooldownScope::command(&fresh), "u1", &Cooldown::user(600), Utc::now())
            .unwrap();

        assert_eq!(run_cooldown_sweep(&tracker, &reg), 1);
        assert!(!tracker.has_entries_for(&old));
        assert!(tracker.has_entries_for(&fresh));
        Ok(())
    }

    #[tokio::test]
    async fn test_sweep_respects_edited_cooldown() -> Result<(), Error> {
        let reg = registry();
        let id = command_with(&reg, "!raise", Cooldown::user(5)).await?;

        let tracker = CooldownTracker::new();
        let scope = CooldownScope::command(&id);
        let used = Utc::now() - ChronoDuration::seconds(10);
        tracker.check_and_reserve(&scope, "u1", &Cooldown::user(5), used).unwrap();

        let mut edit = reg.get_custom_command_by_id(&id).unwrap();
        edit.cooldown = Some(Cooldown::user(60));
        reg.save_custom_command(edit, None, false).await?;

        assert_eq!(run_cooldown_sweep(&tracker, &reg), 0);
        assert!(tracker
            .check_and_reserve(&scope, "u1", &Cooldown::user(60), Utc::now())
            .is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let handle = spawn_cooldown_sweeper(
            Arc::new(CooldownTracker::new()),
            Arc::new(registry()),
            Duration::from_secs(60),
            rx,
        );
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }
}
