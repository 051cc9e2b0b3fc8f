// File: chatcmd-core/src/services/commands/restriction.rs

use std::sync::Arc;
use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use chatcmd_common::models::{RestrictionData, RestrictionEntry, RestrictionMode, TriggerContext};
use chatcmd_common::traits::{ChatMessenger, PredicateResult, RestrictionPredicate};
use crate::Error;
use crate::eventbus::{CommandEvent, EventBus};

/// Restriction types by id. Predicates are looked up at evaluation time,
/// so registering one later takes effect for already-saved commands.
#[derive(Default)]
pub struct RestrictionRegistry {
    predicates: DashMap<String, Arc<dyn RestrictionPredicate>>,
}

impl RestrictionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_restriction(&self, predicate: Arc<dyn RestrictionPredicate>) -> Result<(), Error> {
        let id = predicate.id().to_string();
        if self.predicates.contains_key(&id) {
            return Err(Error::Conflict(format!("restriction type '{}' already registered", id)));
        }
        info!("Registering restriction type '{}' ({})", id, predicate.name());
        self.predicates.insert(id, predicate);
        Ok(())
    }

    pub fn unregister_restriction(&self, id: &str) -> Result<(), Error> {
        self.predicates
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("restriction type '{}'", id)))
    }

    pub fn get_restriction_by_id(&self, id: &str) -> Option<Arc<dyn RestrictionPredicate>> {
        self.predicates.get(id).map(|p| p.value().clone())
    }

    pub fn ids(&self) -> Vec<String> {
        self.predicates.iter().map(|e| e.key().clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RestrictionOutcome {
    Passed,
    Failed {
        /// First message offered by a failing predicate, if any.
        reason: Option<String>,
        /// Whether a fail message was actually sent to chat.
        message_sent: bool,
    },
}

impl RestrictionOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, RestrictionOutcome::Passed)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            RestrictionOutcome::Failed { reason, .. } => reason.as_deref(),
            RestrictionOutcome::Passed => None,
        }
    }
}

/// Composes predicate results under all/any/none and sends the fail message.
#[derive(Clone)]
pub struct RestrictionEvaluator {
    registry: Arc<RestrictionRegistry>,
    messenger: Arc<dyn ChatMessenger>,
    event_bus: Arc<EventBus>,
}

impl RestrictionEvaluator {
    pub fn new(
        registry: Arc<RestrictionRegistry>,
        messenger: Arc<dyn ChatMessenger>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            messenger,
            event_bus,
        }
    }

    pub fn registry(&self) -> &Arc<RestrictionRegistry> {
        &self.registry
    }

    /// Run one predicate. Unknown types and predicate errors count as a failure.
    async fn check(&self, context: &TriggerContext, entry: &RestrictionEntry) -> PredicateResult {
        let result = match self.registry.get_restriction_by_id(&entry.kind) {
            Some(predicate) => match predicate.evaluate(context, entry).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(
                        "Restriction '{}' ({}) errored for command '{}' => {:?}",
                        entry.id, entry.kind, context.command.trigger, e
                    );
                    PredicateResult::Fail(None)
                }
            },
            None => {
                warn!("Unknown restriction type '{}' on command '{}'", entry.kind, context.command.trigger);
                PredicateResult::Fail(None)
            }
        };

        self.event_bus
            .publish(CommandEvent::RestrictionChecked {
                command_id: context.command.id.clone(),
                restriction_id: entry.id.clone(),
                restriction_type: entry.kind.clone(),
                passed: result.passed(),
            })
            .await;
        result
    }

    async fn compose(&self, context: &TriggerContext, data: &RestrictionData) -> (bool, Option<String>) {
        if data.restrictions.is_empty() {
            return (true, None);
        }
        let mut reason = None;
        match data.mode {
            RestrictionMode::All => {
                for entry in &data.restrictions {
                    if let PredicateResult::Fail(msg) = self.check(context, entry).await {
                        return (false, msg);
                    }
                }
                (true, None)
            }
            RestrictionMode::Any => {
                for entry in &data.restrictions {
                    match self.check(context, entry).await {
                        PredicateResult::Pass => return (true, None),
                        PredicateResult::Fail(msg) => {
                            if reason.is_none() {
                                reason = msg;
                            }
                        }
                    }
                }
                (false, reason)
            }
            RestrictionMode::None => {
                for entry in &data.restrictions {
                    if self.check(context, entry).await.passed() {
                        debug!("Restriction '{}' passed under mode none", entry.id);
                        return (false, None);
                    }
                }
                (true, None)
            }
        }
    }

    /// Evaluate `data` for one invocation.
    ///
    /// With `restrictions_are_inherited` the restrictions belong to the parent
    /// command, so its fail message is not sent here; the caller sends the
    /// triggered subcommand's message instead.
    pub async fn run_restriction_predicates(
        &self,
        context: &TriggerContext,
        data: &RestrictionData,
        restrictions_are_inherited: bool,
    ) -> RestrictionOutcome {
        let (passed, reason) = self.compose(context, data).await;

        self.event_bus
            .publish(CommandEvent::RestrictionsEvaluated {
                command_id: context.command.id.clone(),
                user_id: context.sender_id().to_string(),
                passed,
                inherited: restrictions_are_inherited,
            })
            .await;

        if passed {
            return RestrictionOutcome::Passed;
        }
        debug!(
            "Restrictions failed for '{}' (mode {:?}, inherited={})",
            context.command.trigger, data.mode, restrictions_are_inherited
        );

        let message_sent = if restrictions_are_inherited {
            false
        } else {
            self.send_fail_message(data, reason.as_deref()).await
        };
        RestrictionOutcome::Failed { reason, message_sent }
    }

    /// Send `failMessage`, or the predicate's own message when that is empty.
    pub async fn send_fail_message(&self, data: &RestrictionData, reason: Option<&str>) -> bool {
        if !data.send_fail_message {
            return false;
        }
        let text = if data.fail_message.trim().is_empty() {
            match reason {
                Some(r) if !r.trim().is_empty() => r,
                _ => return false,
            }
        } else {
            data.fail_message.as_str()
        };
        match self.messenger.send_chat_message(text).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to send restriction fail message => {:?}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use chatcmd_common::models::{ChatMessage, ChatSender, CommandDefinition, UserCommand};

    /// Predicate whose result is fixed by its settings: `{"pass": bool}`.
    struct Fixed;

    #[async_trait]
    impl RestrictionPredicate for Fixed {
        fn id(&self) -> &str {
            "fixed"
        }

        async fn evaluate(&self, _ctx: &TriggerContext, r: &RestrictionEntry) -> Result<PredicateResult, Error> {
            if r.settings.get("pass").and_then(|v| v.as_bool()).unwrap_or(false) {
                Ok(PredicateResult::Pass)
            } else {
                let msg = r.settings.get("msg").and_then(|v| v.as_str()).map(|s| s.to_string());
                Ok(PredicateResult::Fail(msg))
            }
        }
    }

    struct Exploding;

    #[async_trait]
    impl RestrictionPredicate for Exploding {
        fn id(&self) -> &str {
            "explode"
        }

        async fn evaluate(&self, _ctx: &TriggerContext, _r: &RestrictionEntry) -> Result<PredicateResult, Error> {
            Err(Error::Predicate("boom".into()))
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatMessenger for Recorder {
        async fn send_chat_message(&self, text: &str) -> Result<(), Error> {
            self.sent.lock().push(text.to_string());
            Ok(())
        }
    }

    fn fixed(id: &str, pass: bool) -> RestrictionEntry {
        RestrictionEntry::new(id, "fixed").with_setting("pass", serde_json::json!(pass))
    }

    fn context() -> TriggerContext {
        TriggerContext {
            command: CommandDefinition::new("c1", "!test"),
            user_command: UserCommand::default(),
            chat_message: ChatMessage::new("!test", ChatSender::new("u1", "alice")),
            options: Default::default(),
        }
    }

    fn evaluator() -> (RestrictionEvaluator, Arc<Recorder>) {
        let registry = Arc::new(RestrictionRegistry::new());
        registry.register_restriction(Arc::new(Fixed)).unwrap();
        registry.register_restriction(Arc::new(Exploding)).unwrap();
        let recorder = Arc::new(Recorder::default());
        let eval = RestrictionEvaluator::new(registry, recorder.clone(), Arc::new(EventBus::new()));
        (eval, recorder)
    }

    async fn run(mode: RestrictionMode, results: &[bool]) -> bool {
        let (eval, _) = evaluator();
        let entries = results.iter().enumerate().map(|(i, p)| fixed(&format!("r{}", i), *p)).collect();
        eval.run_restriction_predicates(&context(), &RestrictionData::new(mode, entries), false)
            .await
            .passed()
    }

    #[tokio::test]
    async fn test_mode_composition_table() {
        assert!(!run(RestrictionMode::All, &[true, false]).await);
        assert!(run(RestrictionMode::All, &[true, true]).await);
        assert!(!run(RestrictionMode::Any, &[false, false]).await);
        assert!(run(RestrictionMode::Any, &[false, true]).await);
        assert!(run(RestrictionMode::None, &[false, false]).await);
        assert!(!run(RestrictionMode::None, &[false, true]).await);
    }

    #[tokio::test]
    async fn test_empty_list_always_passes() {
        for mode in [RestrictionMode::All, RestrictionMode::Any, RestrictionMode::None] {
            assert!(run(mode, &[]).await);
        }
    }

    #[tokio::test]
    async fn test_all_short_circuits_on_first_failure() {
        let (eval, _) = evaluator();
        let bus = eval.event_bus.clone();
        let mut rx = bus.subscribe(Some(16)).await;
        let data = RestrictionData::new(RestrictionMode::All, vec![fixed("a", false), fixed("b", true)]);
        eval.run_restriction_predicates(&context(), &data, false).await;

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, CommandEvent::RestrictionChecked { ref restriction_id, .. } if restriction_id == "a"));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, CommandEvent::RestrictionsEvaluated { passed: false, .. }));
    }

    #[tokio::test]
    async fn test_erroring_predicate_fails_closed_but_any_continues() {
        let (eval, _) = evaluator();
        let explode = RestrictionEntry::new("x", "explode");

        let only_error = RestrictionData::new(RestrictionMode::All, vec![explode.clone()]);
        assert!(!eval.run_restriction_predicates(&context(), &only_error, false).await.passed());

        let any = RestrictionData::new(RestrictionMode::Any, vec![explode, fixed("ok", true)]);
        assert!(eval.run_restriction_predicates(&context(), &any, false).await.passed());
    }

    #[tokio::test]
    async fn test_unknown_restriction_type_fails() {
        let (eval, _) = evaluator();
        let data = RestrictionData::new(RestrictionMode::All, vec![RestrictionEntry::new("u", "nope")]);
        assert!(!eval.run_restriction_predicates(&context(), &data, false).await.passed());
    }

    #[tokio::test]
    async fn test_fail_message_selection() {
        let (eval, recorder) = evaluator();
        let with_reason = fixed("r", false).with_setting("msg", serde_json::json!("mods only"));

        // Predicate message is used when failMessage is empty.
        let mut data = RestrictionData::new(RestrictionMode::All, vec![with_reason.clone()]);
        data.send_fail_message = true;
        let out = eval.run_restriction_predicates(&context(), &data, false).await;
        assert_eq!(out.reason(), Some("mods only"));

        // Configured failMessage wins.
        let data = RestrictionData::new(RestrictionMode::All, vec![with_reason.clone()]).with_fail_message("No.");
        eval.run_restriction_predicates(&context(), &data, false).await;

        // Inherited restrictions never send the parent's message.
        let out = eval.run_restriction_predicates(&context(), &data, true).await;
        assert_eq!(out, RestrictionOutcome::Failed { reason: Some("mods only".into()), message_sent: false });

        // sendFailMessage=false stays quiet.
        let quiet = RestrictionData::new(RestrictionMode::All, vec![with_reason]);
        eval.run_restriction_predicates(&context(), &quiet, false).await;

        assert_eq!(*recorder.sent.lock(), vec!["mods only".to_string(), "No.".to_string()]);
    }

    #[test]
    fn test_duplicate_registration_conflicts() {
        let registry = RestrictionRegistry::new();
        registry.register_restriction(Arc::new(Fixed)).unwrap();
        assert!(registry.register_restriction(Arc::new(Fixed)).unwrap_err().is_conflict());
        assert!(registry.unregister_restriction("fixed").is_ok());
        assert!(registry.unregister_restriction("fixed").unwrap_err().is_not_found());
    }
}
