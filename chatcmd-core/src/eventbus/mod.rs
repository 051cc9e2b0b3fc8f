//! src/eventbus/mod.rs
//!
//! In-process bus for command lifecycle events. Every subscriber gets its
//! own bounded MPSC queue, so restriction results and executions are
//! exchanged by explicit message passing rather than shared listener state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{trace, warn};

use chatcmd_common::traits::FrontendNotifier;

/// Events published by the dispatcher and the restriction evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandEvent {
    /// One restriction predicate finished (or was skipped as unknown / errored).
    RestrictionChecked {
        command_id: String,
        restriction_id: String,
        restriction_type: String,
        passed: bool,
    },

    /// The composed restriction result for a command invocation.
    RestrictionsEvaluated {
        command_id: String,
        user_id: String,
        passed: bool,
        inherited: bool,
    },

    CooldownRejected {
        command_id: String,
        user_id: String,
        remaining_seconds: u64,
    },

    CommandExecuted {
        command_id: String,
        subcommand_id: Option<String>,
        user_id: String,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// A matched invocation was dropped because its command was removed or replaced meanwhile.
    InvocationDiscarded {
        command_id: String,
        user_id: String,
    },

    /// A registry mutation, mirrored from the frontend notification of the same name.
    RegistryChanged {
        event_name: String,
        data: Value,
    },
}

impl CommandEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            CommandEvent::RestrictionChecked { .. } => "restriction.checked",
            CommandEvent::RestrictionsEvaluated { .. } => "restriction.evaluated",
            CommandEvent::CooldownRejected { .. } => "command.cooldown",
            CommandEvent::CommandExecuted { .. } => "command.executed",
            CommandEvent::InvocationDiscarded { .. } => "command.discarded",
            CommandEvent::RegistryChanged { .. } => "registry.changed",
        }
    }

    pub fn command_id(&self) -> &str {
        match self {
            CommandEvent::RestrictionChecked { command_id, .. }
            | CommandEvent::RestrictionsEvaluated { command_id, .. }
            | CommandEvent::CooldownRejected { command_id, .. }
            | CommandEvent::CommandExecuted { command_id, .. }
            | CommandEvent::InvocationDiscarded { command_id, .. } => command_id,
            CommandEvent::RegistryChanged { data, .. } => {
                data.get("id").and_then(Value::as_str).unwrap_or_default()
            }
        }
    }
}

/// Each subscriber gets its own `mpsc::Sender<CommandEvent>`.
///
/// - If a subscriber's buffer is full, the event is dropped for that subscriber
///   only. Publishing never waits on a slow reader.
/// - Subscribers that dropped their `Receiver` are pruned on the next publish.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<CommandEvent>>>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    pub shutdown_rx: watch::Receiver<bool>,
    buffer_size: usize,
    dropped: Arc<AtomicU64>,
}

const DEFAULT_BUFFER_SIZE: usize = 1024;

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            subscribers: Arc::new(Mutex::new(vec![])),
            shutdown_tx: Arc::new(tx),
            shutdown_rx: rx,
            buffer_size: buffer_size.max(1),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Returns a receiver on which events will be delivered.
    pub async fn subscribe(&self, buffer_size: Option<usize>) -> mpsc::Receiver<CommandEvent> {
        let size = buffer_size.unwrap_or(self.buffer_size);
        let (tx, rx) = mpsc::channel(size);
        let mut subs = self.subscribers.lock().await;
        subs.push(tx);
        rx
    }

    /// Publish an event to all live subscribers.
    pub async fn publish(&self, event: CommandEvent) {
        let senders = {
            let mut subs = self.subscribers.lock().await;
            subs.retain(|s| !s.is_closed());
            subs.clone()
        };
        for s in senders {
            match s.try_send(event.clone()) {
                Ok(()) | Err(TrySendError::Closed(_)) => {}
                Err(TrySendError::Full(_)) => {
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        "Event bus subscriber is full, dropped '{}' for command '{}' ({} dropped so far)",
                        event.event_type(),
                        event.command_id(),
                        total
                    );
                }
            }
        }
    }

    /// Number of events dropped because a subscriber's queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

/// Forwards registry notifications onto the bus. Can be set as the
/// registry's notifier directly or wrapped around another notifier.
pub struct EventBusNotifier {
    bus: Arc<EventBus>,
    inner: Option<Arc<dyn FrontendNotifier>>,
}

impl EventBusNotifier {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus, inner: None }
    }

    pub fn wrapping(bus: Arc<EventBus>, inner: Arc<dyn FrontendNotifier>) -> Self {
        Self { bus, inner: Some(inner) }
    }
}

impl FrontendNotifier for EventBusNotifier {
    fn send(&self, event_name: &str, data: Value) {
        if let Some(inner) = &self.inner {
            inner.send(event_name, data.clone());
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            trace!("No runtime, dropping registry event '{}'", event_name);
            return;
        };
        let bus = self.bus.clone();
        let event = CommandEvent::RegistryChanged {
            event_name: event_name.to_string(),
            data,
        };
        handle.spawn(async move {
            bus.publish(event).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    fn discarded(id: &str) -> CommandEvent {
        CommandEvent::InvocationDiscarded {
            command_id: id.to_string(),
            user_id: "u1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe(Some(5)).await;
        let mut rx2 = bus.subscribe(Some(5)).await;

        bus.publish(discarded("c1")).await;

        let evt1 = rx1.recv().await.expect("rx1 should get event");
        let evt2 = rx2.recv().await.expect("rx2 should get event");
        assert_eq!(evt1.command_id(), "c1");
        assert_eq!(evt2.event_type(), "command.discarded");
    }

    #[tokio::test]
    async fn test_closed_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe(Some(1)).await;
        let mut live = bus.subscribe(Some(1)).await;
        drop(rx);

        bus.publish(discarded("c2")).await;
        assert_eq!(bus.subscriber_count().await, 1);
        let evt = timeout(Duration::from_millis(100), live.recv()).await.unwrap();
        assert!(evt.is_some());
    }

    #[tokio::test]
    async fn test_notifier_publishes_registry_changes() {
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe(Some(4)).await;
        let notifier = EventBusNotifier::new(bus.clone());

        notifier.send("command-removed", serde_json::json!({ "id": "c9", "type": "custom" }));

        let evt = timeout(Duration::from_millis(200), rx.recv()).await.unwrap().unwrap();
        assert_eq!(evt.event_type(), "registry.changed");
        assert_eq!(evt.command_id(), "c9");
    }

    #[tokio::test]
    async fn test_full_subscriber_does_not_block_publish() {
        let bus = EventBus::new();
        let _stalled = bus.subscribe(Some(1)).await;
        let mut live = bus.subscribe(Some(8)).await;

        for i in 0..4 {
            timeout(Duration::from_millis(100), bus.publish(discarded(&format!("c{i}"))))
                .await
                .expect("publish must not wait on a full subscriber");
        }

        assert_eq!(bus.dropped_events(), 3);
        for i in 0..4 {
            let evt = live.recv().await.unwrap();
            assert_eq!(evt.command_id(), format!("c{i}"));
        }
    }

    #[tokio::test]
    async fn test_shutdown_flag() {
        let bus = EventBus::new();
        let mut rx = bus.shutdown_rx.clone();
        assert!(!bus.is_shutdown());
        bus.shutdown();
        rx.changed().await.unwrap();
        assert!(bus.is_shutdown());
    }
}
