// tests/test_utils/helpers.rs
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::json;

use chatcmd_core::eventbus::EventBus;
use chatcmd_core::models::{ChatSender, EffectList, TriggerContext};
use chatcmd_core::services::commands::{
    CommandRegistry, CooldownTracker, Dispatcher, RestrictionEvaluator, RestrictionRegistry,
};
use chatcmd_core::repositories::InMemoryCommandRepository;
use chatcmd_core::traits::{ChatMessenger, CustomCommandRepository, EffectExecutor};
use chatcmd_core::{DispatcherConfig, Error};

/// Records everything sent to chat.
#[derive(Default)]
pub struct RecordingMessenger {
    pub sent: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
}

impl RecordingMessenger {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ChatMessenger for RecordingMessenger {
    async fn send_chat_message(&self, text: &str) -> Result<(), Error> {
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), Error> {
        self.deleted.lock().push(message_id.to_string());
        Ok(())
    }
}

/// Counts executions and keeps the contexts it was handed.
#[derive(Default)]
pub struct CountingExecutor {
    calls: AtomicUsize,
    pub contexts: Mutex<Vec<TriggerContext>>,
}

impl CountingExecutor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EffectExecutor for CountingExecutor {
    async fn execute(&self, _effects: &EffectList, context: &TriggerContext) -> Result<(), Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().push(context.clone());
        Ok(())
    }
}

pub struct Harness {
    pub registry: Arc<CommandRegistry>,
    pub cooldowns: Arc<CooldownTracker>,
    pub restrictions: Arc<RestrictionRegistry>,
    pub messenger: Arc<RecordingMessenger>,
    pub executor: Arc<CountingExecutor>,
    pub event_bus: Arc<EventBus>,
    pub dispatcher: Arc<Dispatcher>,
}

pub fn setup_harness() -> Harness {
    setup_harness_with_repo(Arc::new(InMemoryCommandRepository::new()))
}

pub fn setup_harness_with_repo(repo: Arc<dyn CustomCommandRepository>) -> Harness {
    let registry = Arc::new(CommandRegistry::new(repo));
    let cooldowns = Arc::new(CooldownTracker::new());
    registry.add_removal_listener(cooldowns.clone());

    let restrictions = Arc::new(RestrictionRegistry::new());
    let messenger = Arc::new(RecordingMessenger::default());
    let executor = Arc::new(CountingExecutor::default());
    let event_bus = Arc::new(EventBus::new());

    let evaluator = RestrictionEvaluator::new(restrictions.clone(), messenger.clone(), event_bus.clone());
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        cooldowns.clone(),
        evaluator,
        executor.clone(),
        messenger.clone(),
        event_bus.clone(),
        DispatcherConfig::default(),
    ));

    Harness {
        registry,
        cooldowns,
        restrictions,
        messenger,
        executor,
        event_bus,
        dispatcher,
    }
}

pub fn viewer(id: &str) -> ChatSender {
    ChatSender::new(id, &format!("viewer_{}", id))
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap()
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    t0() + chrono::Duration::seconds(seconds)
}

pub fn chat_effects() -> EffectList {
    EffectList {
        id: None,
        list: vec![json!({ "type": "chat", "message": "done" })],
    }
}
