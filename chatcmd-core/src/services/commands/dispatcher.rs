// File: chatcmd-core/src/services/commands/dispatcher.rs

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use chatcmd_common::models::options::resolve_options;
use chatcmd_common::models::{ChatMessage, ChatSender, Cooldown, RestrictionData, TriggerContext};
use chatcmd_common::traits::{ChatMessenger, EffectExecutor, SystemCommandTriggerEvent};
use crate::config::DispatcherConfig;
use crate::eventbus::{CommandEvent, EventBus};
use crate::services::commands::cooldown::{CooldownRejection, CooldownReservation, CooldownScope, CooldownTracker};
use crate::services::commands::matcher::{MatchStatus, MatchedCommand, TriggerMatcher};
use crate::services::commands::registry::{CommandRegistry, CommandSource};
use crate::services::commands::restriction::RestrictionEvaluator;

/// Per-message progress. `Executed` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Matched,
    CooldownChecked,
    RestrictionChecked,
    Executed,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Unknown subcommand or too few arguments.
    InvalidUsage,
    Cooldown { remaining_seconds: u64 },
    Restrictions,
    /// The command was removed or replaced while its restrictions were running.
    CommandRemoved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    NoMatch,
    Executed {
        command_id: String,
        subcommand_id: Option<String>,
    },
    Rejected {
        command_id: String,
        reason: RejectReason,
    },
}

impl DispatchOutcome {
    /// True when a command actually fired.
    pub fn fired(&self) -> bool {
        matches!(self, DispatchOutcome::Executed { .. })
    }

    pub fn final_state(&self) -> DispatchState {
        match self {
            DispatchOutcome::NoMatch => DispatchState::Idle,
            DispatchOutcome::Executed { .. } => DispatchState::Executed,
            DispatchOutcome::Rejected { .. } => DispatchState::Rejected,
        }
    }
}

/// Tracks the state of one message and logs each transition.
struct Run {
    message_id: String,
    state: DispatchState,
}

impl Run {
    fn new(message_id: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            state: DispatchState::Idle,
        }
    }

    fn advance(&mut self, next: DispatchState) {
        debug!("dispatch[{}]: {:?} -> {:?}", self.message_id, self.state, next);
        self.state = next;
    }
}

/// Orchestrates matcher, cooldowns, restrictions and execution for each chat message.
pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
    matcher: TriggerMatcher,
    cooldowns: Arc<CooldownTracker>,
    restrictions: RestrictionEvaluator,
    executor: Arc<dyn EffectExecutor>,
    messenger: Arc<dyn ChatMessenger>,
    event_bus: Arc<EventBus>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<CommandRegistry>,
        cooldowns: Arc<CooldownTracker>,
        restrictions: RestrictionEvaluator,
        executor: Arc<dyn EffectExecutor>,
        messenger: Arc<dyn ChatMessenger>,
        event_bus: Arc<EventBus>,
        config: DispatcherConfig,
    ) -> Self {
        debug!("Initializing Dispatcher");
        Self {
            matcher: TriggerMatcher::new(registry.clone()),
            registry,
            cooldowns,
            restrictions,
            executor,
            messenger,
            event_bus,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    pub fn cooldowns(&self) -> &Arc<CooldownTracker> {
        &self.cooldowns
    }

    /// Drive one chat message through the whole state machine.
    /// Never fails: every problem ends as `NoMatch` or `Rejected` and is logged.
    pub async fn handle_incoming_message(&self, message: ChatMessage) -> DispatchOutcome {
        let mut run = Run::new(&message.id);

        let Some(matched) = self.matcher.match_message(&message) else {
            return DispatchOutcome::NoMatch;
        };
        run.advance(DispatchState::Matched);

        let command_id = matched.command.id().to_string();
        let user_id = message.sender.user_id.clone();
        let reject = |run: &mut Run, reason: RejectReason| {
            run.advance(DispatchState::Rejected);
            DispatchOutcome::Rejected {
                command_id: command_id.clone(),
                reason,
            }
        };

        if !matched.status.is_valid() {
            self.send_usage_message(&matched).await;
            return reject(&mut run, RejectReason::InvalidUsage);
        }

        // Matched -> CooldownChecked
        let (scope, cooldown) = cooldown_for(&matched);
        let reservation = match self
            .cooldowns
            .check_and_reserve(&scope, &user_id, &cooldown, message.timestamp)
        {
            Ok(r) => r,
            Err(rejection) => {
                self.on_cooldown(&matched, &message, rejection).await;
                return reject(&mut run, RejectReason::Cooldown {
                    remaining_seconds: rejection.remaining_seconds,
                });
            }
        };
        run.advance(DispatchState::CooldownChecked);

        let context = TriggerContext {
            command: matched.command.definition.clone(),
            user_command: matched.user_command.clone(),
            chat_message: message.clone(),
            options: resolve_options(&matched.command.definition.options),
        };

        // CooldownChecked -> RestrictionChecked
        if !self.check_restrictions(&matched, &context).await {
            self.cooldowns.release(reservation);
            return reject(&mut run, RejectReason::Restrictions);
        }

        // Complete-then-discard: a definition that changed while predicates ran is not executed.
        if !self.registry.is_current(&matched.command) {
            info!("Discarding invocation of '{}': command was removed or replaced", context.command.trigger);
            self.release_if_live(reservation);
            self.event_bus
                .publish(CommandEvent::InvocationDiscarded {
                    command_id: command_id.clone(),
                    user_id: user_id.clone(),
                })
                .await;
            return reject(&mut run, RejectReason::CommandRemoved);
        }
        run.advance(DispatchState::RestrictionChecked);

        // RestrictionChecked -> Executed
        let success = self.execute(&matched, context).await;
        run.advance(DispatchState::Executed);

        self.event_bus
            .publish(CommandEvent::CommandExecuted {
                command_id: command_id.clone(),
                subcommand_id: matched.user_command.subcommand_id.clone(),
                user_id,
                success,
                timestamp: message.timestamp,
            })
            .await;

        DispatchOutcome::Executed {
            command_id,
            subcommand_id: matched.user_command.subcommand_id,
        }
    }

    /// Convenience entry point for raw text. Returns whether a command fired.
    pub async fn handle_chat_line(&self, text: &str, sender: ChatSender) -> bool {
        self.handle_incoming_message(ChatMessage::new(text, sender))
            .await
            .fired()
    }

    /// Consume chat messages from `rx`, each in its own task, until the
    /// channel closes or the event bus shuts down.
    pub fn spawn_dispatch_loop(self: Arc<Self>, mut rx: mpsc::Receiver<ChatMessage>) -> JoinHandle<()> {
        let mut shutdown_rx = self.event_bus.shutdown_rx.clone();
        tokio::spawn(async move {
            info!("Dispatch loop started");
            if *shutdown_rx.borrow() {
                return;
            }
            loop {
                tokio::select! {
                    maybe_msg = rx.recv() => {
                        let Some(message) = maybe_msg else { break };
                        let me = self.clone();
                        tokio::spawn(async move {
                            let outcome = me.handle_incoming_message(message).await;
                            debug!("dispatch outcome => {:?}", outcome);
                        });
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Dispatch loop stopped");
        })
    }

    // ----------------------------------------------------------------
    // Steps
    // ----------------------------------------------------------------

    async fn send_usage_message(&self, matched: &MatchedCommand) {
        if let MatchStatus::NotEnoughArgs { required, given } = &matched.status {
            debug!(
                "'{}' needs {} args, got {}",
                matched.command.definition.trigger, required, given
            );
        }
        if !self.config.send_usage_messages {
            return;
        }
        let Some(usage) = matched.usage() else {
            return;
        };
        let text = self
            .config
            .format_usage_message(&matched.command.definition.trigger, usage);
        self.say(&text).await;
    }

    async fn on_cooldown(&self, matched: &MatchedCommand, message: &ChatMessage, rejection: CooldownRejection) {
        let def = &matched.command.definition;
        debug!("'{}' on cooldown for {}s", def.trigger, rejection.remaining_seconds);

        self.event_bus
            .publish(CommandEvent::CooldownRejected {
                command_id: def.id.clone(),
                user_id: message.sender.user_id.clone(),
                remaining_seconds: rejection.remaining_seconds,
            })
            .await;

        if !def.send_cooldown_message || (matched.command.is_system() && def.hide_cooldowns) {
            return;
        }
        let template = match def.cooldown_message.as_deref() {
            Some(custom) if def.use_custom_cooldown_message && !custom.trim().is_empty() => custom,
            _ => self.config.default_cooldown_message.as_str(),
        };
        let text = self
            .config
            .format_cooldown_message(template, rejection.remaining_seconds, &message.sender.username);
        self.say(&text).await;
    }

    /// Own subcommand restrictions run directly; otherwise the parent's are
    /// inherited and the subcommand's fail message policy applies.
    async fn check_restrictions(&self, matched: &MatchedCommand, context: &TriggerContext) -> bool {
        let def = &matched.command.definition;
        let sub = matched.triggered_subcommand();

        let (data, inherited): (Option<&RestrictionData>, bool) = match sub {
            Some(s) if s.has_own_restrictions() => (s.restriction_data.as_ref(), false),
            Some(_) => (def.restriction_data.as_ref(), true),
            None => (def.restriction_data.as_ref(), false),
        };
        let Some(data) = data else {
            return true;
        };

        let outcome = self
            .restrictions
            .run_restriction_predicates(context, data, inherited)
            .await;
        if outcome.passed() {
            return true;
        }

        if inherited {
            if let Some(own) = sub.and_then(|s| s.restriction_data.as_ref()) {
                self.restrictions.send_fail_message(own, outcome.reason()).await;
            }
        }
        false
    }

    /// Put back a reservation only if the command still exists; a removed
    /// command has already had its cooldowns cleared.
    fn release_if_live(&self, reservation: CooldownReservation) {
        if self.registry.contains(&reservation.scope().command_id) {
            self.cooldowns.release(reservation);
        }
    }

    async fn execute(&self, matched: &MatchedCommand, context: TriggerContext) -> bool {
        let def = &matched.command.definition;

        if def.auto_delete_trigger {
            if let Err(e) = self.messenger.delete_message(&context.chat_message.id).await {
                warn!("Could not delete trigger message for '{}' => {:?}", def.trigger, e);
            }
        }

        let result = match &matched.command.source {
            CommandSource::System(handler) => {
                handler
                    .on_trigger_event(SystemCommandTriggerEvent { context })
                    .await
            }
            CommandSource::Custom => {
                self.registry.record_usage(&def.id);
                let effects = matched
                    .triggered_subcommand()
                    .and_then(|s| s.effects.as_ref())
                    .or(def.effects.as_ref());
                match effects {
                    Some(effects) => self.executor.execute(effects, &context).await,
                    None => {
                        debug!("'{}' has no effects to run", def.trigger);
                        Ok(())
                    }
                }
            }
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                error!("Error executing command '{}' => {:?}", def.trigger, e);
                false
            }
        }
    }

    async fn say(&self, text: &str) {
        if let Err(e) = self.messenger.send_chat_message(text).await {
            error!("Failed to send chat message => {:?}", e);
        }
    }
}

/// Subcommands with their own cooldown are tracked separately from the parent.
fn cooldown_for(matched: &MatchedCommand) -> (CooldownScope, Cooldown) {
    let def = &matched.command.definition;
    match matched.triggered_subcommand() {
        Some(sub) if sub.cooldown.map(|c| !c.is_empty()).unwrap_or(false) => (
            CooldownScope::subcommand(&def.id, &sub.id),
            sub.cooldown.unwrap_or_default(),
        ),
        _ => (CooldownScope::command(&def.id), def.cooldown.unwrap_or_default()),
    }
}
