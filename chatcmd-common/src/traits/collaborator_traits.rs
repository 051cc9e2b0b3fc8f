use async_trait::async_trait;
use serde_json::Value;

use crate::error::Error;
use crate::models::{EffectList, RestrictionEntry, TriggerContext};

/// Outcome of a single restriction predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateResult {
    Pass,
    /// Failed, optionally explaining why to the chatter.
    Fail(Option<String>),
}

impl PredicateResult {
    pub fn passed(&self) -> bool {
        matches!(self, PredicateResult::Pass)
    }
}

/// A pluggable restriction, resolved by `id()` from the restriction registry.
#[async_trait]
pub trait RestrictionPredicate: Send + Sync {
    /// Matches `RestrictionEntry::kind`.
    fn id(&self) -> &str;

    fn name(&self) -> &str {
        self.id()
    }

    async fn evaluate(
        &self,
        context: &TriggerContext,
        restriction: &RestrictionEntry,
    ) -> Result<PredicateResult, Error>;
}

/// Performs a command's effect list. The core never interprets effects.
#[async_trait]
pub trait EffectExecutor: Send + Sync {
    async fn execute(&self, effects: &EffectList, context: &TriggerContext) -> Result<(), Error>;
}

/// Outgoing chat, used for cooldown, restriction and usage messages.
#[async_trait]
pub trait ChatMessenger: Send + Sync {
    async fn send_chat_message(&self, text: &str) -> Result<(), Error>;

    async fn delete_message(&self, _message_id: &str) -> Result<(), Error> {
        Ok(())
    }
}

/// Fire-and-forget notifications to a UI. Return values are never inspected.
pub trait FrontendNotifier: Send + Sync {
    fn send(&self, event_name: &str, data: Value);
}

/// Passed to a system command callback when it fires.
#[derive(Debug, Clone)]
pub struct SystemCommandTriggerEvent {
    pub context: TriggerContext,
}

/// Code-side half of a system command.
#[async_trait]
pub trait SystemCommandHandler: Send + Sync {
    async fn on_trigger_event(&self, event: SystemCommandTriggerEvent) -> Result<(), Error>;
}
