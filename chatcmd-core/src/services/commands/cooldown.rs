// File: chatcmd-core/src/services/commands/cooldown.rs

use std::collections::HashMap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, trace};

use chatcmd_common::models::Cooldown;
use crate::services::commands::registry::CommandRemovalListener;

/// What a cooldown entry is tracked under: a whole command, or one of its
/// subcommands when that subcommand declares its own cooldown.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownScope {
    pub command_id: String,
    pub subcommand_id: Option<String>,
}

impl CooldownScope {
    pub fn command(command_id: &str) -> Self {
        Self {
            command_id: command_id.to_string(),
            subcommand_id: None,
        }
    }

    pub fn subcommand(command_id: &str, subcommand_id: &str) -> Self {
        Self {
            command_id: command_id.to_string(),
            subcommand_id: Some(subcommand_id.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    used_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ScopeState {
    global: Option<Stamp>,
    users: HashMap<String, Stamp>,
}

impl ScopeState {
    fn is_empty(&self) -> bool {
        self.global.is_none() && self.users.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownKind {
    Global,
    User,
}

/// Why `check_and_reserve` refused. `remaining_seconds` is rounded up, so it is never 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownRejection {
    pub remaining_seconds: u64,
    pub kind: CooldownKind,
}

/// Proof of a successful check. Hand it back to `release` to undo the
/// recorded usage when the invocation is rejected further down the line.
#[derive(Debug, Clone)]
pub struct CooldownReservation {
    scope: CooldownScope,
    user_id: String,
    recorded: Option<Stamp>,
    previous_global: Option<Stamp>,
    previous_user: Option<Stamp>,
    recorded_global: bool,
    recorded_user: bool,
}

impl CooldownReservation {
    /// True when nothing was recorded because the cooldown was empty.
    pub fn is_noop(&self) -> bool {
        self.recorded.is_none()
    }

    pub fn scope(&self) -> &CooldownScope {
        &self.scope
    }
}

/// Remaining milliseconds of a cooldown of `seconds` last used at `last`.
fn remaining_ms(seconds: Option<u64>, last: Option<Stamp>, now: DateTime<Utc>) -> i64 {
    match (seconds, last) {
        (Some(secs), Some(stamp)) if secs > 0 => {
            let elapsed = now.signed_duration_since(stamp.used_at).num_milliseconds();
            secs as i64 * 1000 - elapsed
        }
        _ => 0,
    }
}

fn ceil_seconds(ms: i64) -> u64 {
    ((ms + 999) / 1000).max(1) as u64
}

/// Tracks last-use timestamps per scope, globally and per user.
///
/// Check-and-record runs while holding the scope's map entry, so two
/// concurrent invocations of the same scope are serialized; unrelated
/// commands live in other entries and do not contend.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    scopes: DashMap<CooldownScope, ScopeState>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically checks both cooldowns and, when neither is running, records `now`.
    pub fn check_and_reserve(
        &self,
        scope: &CooldownScope,
        user_id: &str,
        cooldown: &Cooldown,
        now: DateTime<Utc>,
    ) -> Result<CooldownReservation, CooldownRejection> {
        let mut reservation = CooldownReservation {
            scope: scope.clone(),
            user_id: user_id.to_string(),
            recorded: None,
            previous_global: None,
            previous_user: None,
            recorded_global: false,
            recorded_user: false,
        };
        if cooldown.is_empty() {
            return Ok(reservation);
        }

        let mut state = self.scopes.entry(scope.clone()).or_default();

        let global_remaining = remaining_ms(cooldown.global, state.global, now);
        let user_remaining = remaining_ms(cooldown.user, state.users.get(user_id).copied(), now);

        if global_remaining > 0 || user_remaining > 0 {
            let (ms, kind) = if global_remaining >= user_remaining {
                (global_remaining, CooldownKind::Global)
            } else {
                (user_remaining, CooldownKind::User)
            };
            trace!("Cooldown {:?} for scope {:?} user {} => {}ms left", kind, scope, user_id, ms);
            return Err(CooldownRejection {
                remaining_seconds: ceil_seconds(ms),
                kind,
            });
        }

        let stamp = Stamp { used_at: now };
        if cooldown.global.unwrap_or(0) > 0 {
            reservation.previous_global = state.global.replace(stamp);
            reservation.recorded_global = true;
            reservation.recorded = Some(stamp);
        }
        if cooldown.user.unwrap_or(0) > 0 {
            reservation.previous_user = state.users.insert(user_id.to_string(), stamp);
            reservation.recorded_user = true;
            reservation.recorded.get_or_insert(stamp);
        }
        Ok(reservation)
    }

    /// Undo a reservation, provided nothing newer was recorded on top of it.
    pub fn release(&self, reservation: CooldownReservation) {
        let Some(recorded) = reservation.recorded else {
            return;
        };
        let Some(mut state) = self.scopes.get_mut(&reservation.scope) else {
            return;
        };

        if reservation.recorded_global
            && state.global.map(|g| g.used_at) == Some(recorded.used_at)
        {
            state.global = reservation.previous_global;
        }
        if reservation.recorded_user {
            let current = state.users.get(&reservation.user_id).map(|s| s.used_at);
            if current == Some(recorded.used_at) {
                match reservation.previous_user {
                    Some(prev) => {
                        state.users.insert(reservation.user_id.clone(), prev);
                    }
                    None => {
                        state.users.remove(&reservation.user_id);
                    }
                }
            }
        }
        let empty = state.is_empty();
        drop(state);
        if empty {
            self.scopes.remove_if(&reservation.scope, |_, s| s.is_empty());
        }
        debug!("Released cooldown reservation for {:?}", reservation.scope);
    }

    /// Drop every scope belonging to `command_id`.
    pub fn clear_command(&self, command_id: &str) {
        self.scopes.retain(|scope, _| scope.command_id != command_id);
    }

    /// Remove stamps that can no longer block anyone. Expiry is judged
    /// against `live_cooldown`, the cooldown the scope has right now, so an
    /// edited command keeps exactly the stamps `check_and_reserve` would still
    /// honour. Scopes without a live cooldown are dropped whole.
    /// Returns how many stamps were dropped.
    pub fn evict_expired<F>(&self, now: DateTime<Utc>, live_cooldown: F) -> usize
    where
        F: Fn(&CooldownScope) -> Option<Cooldown>,
    {
        let mut evicted = 0;
        self.scopes.retain(|scope, state| {
            let cooldown = live_cooldown(scope).unwrap_or_default();
            if state.global.is_some() && remaining_ms(cooldown.global, state.global, now) <= 0 {
                state.global = None;
                evicted += 1;
            }
            let before = state.users.len();
            state
                .users
                .retain(|_, stamp| remaining_ms(cooldown.user, Some(*stamp), now) > 0);
            evicted += before - state.users.len();
            !state.is_empty()
        });
        evicted
    }

    pub fn has_entries_for(&self, command_id: &str) -> bool {
        self.scopes.iter().any(|e| e.key().command_id == command_id)
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }
}

impl CommandRemovalListener for CooldownTracker {
    fn on_command_removed(&self, command_id: &str) {
        debug!("Clearing cooldowns for removed command {}", command_id);
        self.clear_command(command_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_user_cooldown_blocks_same_user_only() {
        let tracker = CooldownTracker::new();
        let scope = CooldownScope::command("c1");
        let cd = Cooldown::user(10);

        assert!(tracker.check_and_reserve(&scope, "alice", &cd, t(0)).is_ok());
        let rej = tracker.check_and_reserve(&scope, "alice", &cd, t(4)).unwrap_err();
        assert_eq!(rej.remaining_seconds, 6);
        assert_eq!(rej.kind, CooldownKind::User);

        assert!(tracker.check_and_reserve(&scope, "bob", &cd, t(4)).is_ok());
        assert!(tracker.check_and_reserve(&scope, "alice", &cd, t(10)).is_ok());
    }

    #[test]
    fn test_global_cooldown_blocks_everyone() {
        let tracker = CooldownTracker::new();
        let scope = CooldownScope::command("c1");
        let cd = Cooldown::global(10);

        assert!(tracker.check_and_reserve(&scope, "alice", &cd, t(0)).is_ok());
        let rej = tracker.check_and_reserve(&scope, "bob", &cd, t(3)).unwrap_err();
        assert_eq!(rej.remaining_seconds, 7);
        assert_eq!(rej.kind, CooldownKind::Global);
    }

    #[test]
    fn test_rejection_reports_larger_remaining_and_does_not_record() {
        let tracker = CooldownTracker::new();
        let scope = CooldownScope::command("c1");
        let cd = Cooldown { global: Some(5), user: Some(30) };

        assert!(tracker.check_and_reserve(&scope, "alice", &cd, t(0)).is_ok());
        let rej = tracker.check_and_reserve(&scope, "alice", &cd, t(2)).unwrap_err();
        assert_eq!(rej.remaining_seconds, 28);
        assert_eq!(rej.kind, CooldownKind::User);

        // Global ran out at t=5; the rejected attempt at t=2 must not have pushed it back.
        assert!(tracker.check_and_reserve(&scope, "bob", &cd, t(5)).is_ok());
    }

    #[test]
    fn test_sub_second_remaining_rounds_up() {
        let tracker = CooldownTracker::new();
        let scope = CooldownScope::command("c1");
        let cd = Cooldown::global(1);
        tracker.check_and_reserve(&scope, "a", &cd, t(0)).unwrap();
        let almost = t(0) + chrono::Duration::milliseconds(900);
        let rej = tracker.check_and_reserve(&scope, "a", &cd, almost).unwrap_err();
        assert_eq!(rej.remaining_seconds, 1);
    }

    #[test]
    fn test_empty_cooldown_records_nothing() {
        let tracker = CooldownTracker::new();
        let scope = CooldownScope::command("c1");
        let res = tracker.check_and_reserve(&scope, "a", &Cooldown::default(), t(0)).unwrap();
        assert!(res.is_noop());
        assert_eq!(tracker.scope_count(), 0);
    }

    #[test]
    fn test_release_restores_previous_state() {
        let tracker = CooldownTracker::new();
        let scope = CooldownScope::command("c1");
        let cd = Cooldown::global(10);

        let res = tracker.check_and_reserve(&scope, "a", &cd, t(0)).unwrap();
        tracker.release(res);
        assert!(tracker.check_and_reserve(&scope, "b", &cd, t(1)).is_ok());
        assert!(tracker.check_and_reserve(&scope, "c", &cd, t(2)).is_err());
    }

    #[test]
    fn test_subcommand_scope_is_independent() {
        let tracker = CooldownTracker::new();
        let cd = Cooldown::global(10);
        let base = CooldownScope::command("c1");
        let sub = CooldownScope::subcommand("c1", "s1");

        tracker.check_and_reserve(&base, "a", &cd, t(0)).unwrap();
        assert!(tracker.check_and_reserve(&sub, "a", &cd, t(1)).is_ok());

        tracker.clear_command("c1");
        assert!(!tracker.has_entries_for("c1"));
    }

    #[test]
    fn test_evict_expired_keeps_running_cooldowns() {
        let tracker = CooldownTracker::new();
        let short = CooldownScope::command("short");
        let long = CooldownScope::command("long");
        tracker.check_and_reserve(&short, "a", &Cooldown::user(5), t(0)).unwrap();
        tracker.check_and_reserve(&long, "a", &Cooldown::user(60), t(0)).unwrap();

        let live = |scope: &CooldownScope| match scope.command_id.as_str() {
            "short" => Some(Cooldown::user(5)),
            _ => Some(Cooldown::user(60)),
        };
        assert_eq!(tracker.evict_expired(t(10), live), 1);
        assert!(!tracker.has_entries_for("short"));
        assert!(tracker.check_and_reserve(&long, "a", &Cooldown::user(60), t(10)).is_err());
    }

    #[test]
    fn test_evict_uses_cooldown_raised_after_use() {
        let tracker = CooldownTracker::new();
        let scope = CooldownScope::command("c1");
        tracker.check_and_reserve(&scope, "a", &Cooldown::user(5), t(0)).unwrap();

        // The command was edited from 5s to 60s after the use.
        assert_eq!(tracker.evict_expired(t(10), |_| Some(Cooldown::user(60))), 0);
        let rej = tracker.check_and_reserve(&scope, "a", &Cooldown::user(60), t(10)).unwrap_err();
        assert_eq!(rej.remaining_seconds, 50);
    }

    #[test]
    fn test_evict_drops_scopes_without_live_cooldown() {
        let tracker = CooldownTracker::new();
        tracker
            .check_and_reserve(&CooldownScope::subcommand("c1", "s1"), "a", &Cooldown::global(600), t(0))
            .unwrap();
        assert_eq!(tracker.evict_expired(t(1), |_| None), 1);
        assert_eq!(tracker.scope_count(), 0);
    }

    #[test]
    fn test_concurrent_reservations_admit_exactly_one() {
        let tracker = Arc::new(CooldownTracker::new());
        let scope = CooldownScope::command("c1");
        let cd = Cooldown::user(30);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tracker = tracker.clone();
                let scope = scope.clone();
                std::thread::spawn(move || tracker.check_and_reserve(&scope, "alice", &cd, t(0)).is_ok())
            })
            .collect();

        let admitted = handles.into_iter().filter_map(|h| h.join().ok()).filter(|ok| *ok).count();
        assert_eq!(admitted, 1);
    }
}
