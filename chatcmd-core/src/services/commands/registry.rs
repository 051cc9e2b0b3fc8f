// File: chatcmd-core/src/services/commands/registry.rs

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use chatcmd_common::models::options::validate_options;
use chatcmd_common::models::{CommandDefinition, CommandType, Cooldown, SubCommand};
use chatcmd_common::traits::{CustomCommandRepository, FrontendNotifier, SystemCommandHandler};
use crate::Error;
use crate::services::commands::cooldown::CooldownScope;
use crate::services::commands::matcher::TriggerPatterns;

/// Called whenever a command leaves the registry, so per-command state elsewhere can be dropped.
pub trait CommandRemovalListener: Send + Sync {
    fn on_command_removed(&self, command_id: &str);
}

/// A code-registered command: definition plus callback. Never persisted.
#[derive(Clone)]
pub struct SystemCommand {
    pub definition: CommandDefinition,
    pub handler: Arc<dyn SystemCommandHandler>,
}

impl SystemCommand {
    pub fn new(definition: CommandDefinition, handler: Arc<dyn SystemCommandHandler>) -> Self {
        Self { definition, handler }
    }
}

impl fmt::Debug for SystemCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemCommand")
            .field("id", &self.definition.id)
            .field("trigger", &self.definition.trigger)
            .finish()
    }
}

#[derive(Clone)]
pub enum CommandSource {
    System(Arc<dyn SystemCommandHandler>),
    Custom,
}

/// One registry entry. Every register/save gets a fresh `revision`, so
/// holders of an older entry can tell that it is stale.
pub struct RegisteredCommand {
    pub definition: CommandDefinition,
    pub source: CommandSource,
    pub(crate) patterns: TriggerPatterns,
    revision: u64,
}

impl RegisteredCommand {
    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn is_system(&self) -> bool {
        matches!(self.source, CommandSource::System(_))
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

impl fmt::Debug for RegisteredCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredCommand")
            .field("id", &self.definition.id)
            .field("trigger", &self.definition.trigger)
            .field("system", &self.is_system())
            .finish()
    }
}

#[derive(Default)]
struct RegistryState {
    /// Registration order; regex and whole-message commands are tried in this order.
    commands: Vec<Arc<RegisteredCommand>>,
    by_id: HashMap<String, Arc<RegisteredCommand>>,
    /// Lowercased literal trigger/alias => command.
    trigger_index: HashMap<String, Arc<RegisteredCommand>>,
}

impl RegistryState {
    fn insert(&mut self, entry: Arc<RegisteredCommand>) {
        self.index(&entry);
        self.by_id.insert(entry.id().to_string(), entry.clone());
        self.commands.push(entry);
    }

    fn replace(&mut self, entry: Arc<RegisteredCommand>) {
        if let Some(old) = self.by_id.get(entry.id()).cloned() {
            self.unindex(&old);
            if let Some(pos) = self.commands.iter().position(|c| Arc::ptr_eq(c, &old)) {
                self.commands[pos] = entry.clone();
            }
        }
        self.index(&entry);
        self.by_id.insert(entry.id().to_string(), entry);
    }

    fn remove(&mut self, id: &str) -> Option<Arc<RegisteredCommand>> {
        let old = self.by_id.remove(id)?;
        self.unindex(&old);
        self.commands.retain(|c| !Arc::ptr_eq(c, &old));
        Some(old)
    }

    fn index(&mut self, entry: &Arc<RegisteredCommand>) {
        if entry.definition.trigger_is_regex {
            return;
        }
        for t in entry.definition.all_triggers() {
            self.trigger_index.insert(normalize_trigger(t), entry.clone());
        }
    }

    fn unindex(&mut self, entry: &Arc<RegisteredCommand>) {
        self.trigger_index.retain(|_, c| !Arc::ptr_eq(c, entry));
    }

    /// First trigger/alias of `def` already owned by a command other than `skip_id`.
    fn taken_trigger(&self, def: &CommandDefinition, skip_id: Option<&str>) -> Option<String> {
        let wanted: HashSet<String> = def.all_triggers().map(normalize_trigger).collect();
        self.commands
            .iter()
            .filter(|c| Some(c.id()) != skip_id)
            .flat_map(|c| c.definition.all_triggers())
            .find(|t| wanted.contains(&normalize_trigger(t)))
            .map(|t| t.to_string())
    }
}

/// Triggers and aliases compare case-insensitively.
pub fn normalize_trigger(trigger: &str) -> String {
    trigger.trim().to_lowercase()
}

/// Structural checks that must hold before a definition enters the registry.
pub fn validate_definition(def: &CommandDefinition) -> Result<TriggerPatterns, Error> {
    if def.id.trim().is_empty() {
        return Err(Error::Validation("command id must not be empty".into()));
    }
    if def.trigger.trim().is_empty() {
        return Err(Error::Validation(format!("command '{}' has an empty trigger", def.id)));
    }
    if def.aliases.iter().any(|a| a.trim().is_empty()) {
        return Err(Error::Validation(format!("command '{}' has an empty alias", def.id)));
    }
    // Literal triggers are looked up by the first word of a message.
    if !def.trigger_is_regex {
        if let Some(t) = def.all_triggers().find(|t| t.trim().contains(char::is_whitespace)) {
            return Err(Error::Validation(format!(
                "command '{}' has trigger '{}' containing whitespace",
                def.id, t
            )));
        }
    }

    let mut own = HashSet::new();
    for t in def.all_triggers() {
        if !own.insert(normalize_trigger(t)) {
            return Err(Error::Validation(format!(
                "command '{}' lists trigger '{}' more than once",
                def.id, t
            )));
        }
    }

    let subs: Vec<&SubCommand> = def.sub_commands.iter().chain(def.fallback_subcommand.iter()).collect();
    let mut args = HashSet::new();
    let mut ids = HashSet::new();
    for sub in &subs {
        if sub.id.trim().is_empty() {
            return Err(Error::Validation(format!("command '{}' has a subcommand without id", def.id)));
        }
        if !ids.insert(sub.id.as_str()) {
            return Err(Error::Validation(format!(
                "command '{}' has duplicate subcommand id '{}'",
                def.id, sub.id
            )));
        }
        if !args.insert(sub.arg.to_lowercase()) {
            return Err(Error::Validation(format!(
                "command '{}' has duplicate subcommand arg '{}'",
                def.id, sub.arg
            )));
        }
    }
    let fallbacks = def.sub_commands.iter().filter(|s| s.fallback).count()
        + usize::from(def.fallback_subcommand.is_some());
    if fallbacks > 1 {
        return Err(Error::Validation(format!(
            "command '{}' declares {} fallback subcommands, at most one is allowed",
            def.id, fallbacks
        )));
    }

    validate_options(&def.options)?;
    for sub in &subs {
        validate_options(&sub.options)?;
    }
    TriggerPatterns::compile(def)
}

/// Holds system (in-memory) and custom (persisted) commands.
///
/// Reads go through a `parking_lot::RwLock` and never wait on I/O. All
/// mutations are additionally serialized by an async gate so that
/// persistence can be awaited without holding the read/write lock.
pub struct CommandRegistry {
    state: RwLock<RegistryState>,
    next_revision: AtomicU64,
    write_gate: Mutex<()>,
    repo: Arc<dyn CustomCommandRepository>,
    notifier: Option<Arc<dyn FrontendNotifier>>,
    removal_listeners: RwLock<Vec<Arc<dyn CommandRemovalListener>>>,
    /// Custom commands whose usage count changed since the last flush.
    dirty_usage: parking_lot::Mutex<HashSet<String>>,
}

impl CommandRegistry {
    pub fn new(repo: Arc<dyn CustomCommandRepository>) -> Self {
        debug!("Initializing CommandRegistry");
        Self {
            state: RwLock::new(RegistryState::default()),
            next_revision: AtomicU64::new(1),
            write_gate: Mutex::new(()),
            repo,
            notifier: None,
            removal_listeners: RwLock::new(Vec::new()),
            dirty_usage: parking_lot::Mutex::new(HashSet::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn FrontendNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn add_removal_listener(&self, listener: Arc<dyn CommandRemovalListener>) {
        self.removal_listeners.write().push(listener);
    }

    /// Load every persisted custom command into the cache. Invalid or
    /// conflicting definitions are skipped with an error log.
    pub async fn load_custom_commands(&self) -> Result<usize, Error> {
        let _gate = self.write_gate.lock().await;
        let stored = self.repo.list_commands().await?;
        let mut loaded = 0;
        let mut state = self.state.write();
        for mut def in stored {
            def.command_type = CommandType::Custom;
            let patterns = match validate_definition(&def) {
                Ok(p) => p,
                Err(e) => {
                    error!("Skipping stored command '{}' => {}", def.trigger, e);
                    continue;
                }
            };
            if state.by_id.contains_key(&def.id) {
                error!("Skipping stored command '{}' => duplicate id {}", def.trigger, def.id);
                continue;
            }
            if let Some(taken) = state.taken_trigger(&def, None) {
                error!("Skipping stored command '{}' => trigger '{}' already taken", def.trigger, taken);
                continue;
            }
            state.insert(Arc::new(RegisteredCommand {
                definition: def,
                source: CommandSource::Custom,
                patterns,
                revision: self.bump_revision(),
            }));
            loaded += 1;
        }
        drop(state);
        info!("load_custom_commands => loaded {} custom commands", loaded);
        self.notify_count_changed(CommandType::Custom);
        Ok(loaded)
    }

    // ----------------------------------------------------------------
    // Queries
    // ----------------------------------------------------------------

    pub fn get_all_active_commands(&self) -> Vec<CommandDefinition> {
        self.state
            .read()
            .commands
            .iter()
            .filter(|c| c.definition.active)
            .map(|c| c.definition.clone())
            .collect()
    }

    /// True if `trigger` equals (case-insensitively) any registered trigger or alias.
    pub fn trigger_is_taken(&self, trigger: &str) -> bool {
        let wanted = normalize_trigger(trigger);
        if wanted.is_empty() {
            return false;
        }
        self.state
            .read()
            .commands
            .iter()
            .flat_map(|c| c.definition.all_triggers())
            .any(|t| normalize_trigger(t) == wanted)
    }

    pub fn get_system_command_by_id(&self, id: &str) -> Option<SystemCommand> {
        let state = self.state.read();
        let entry = state.by_id.get(id)?;
        match &entry.source {
            CommandSource::System(handler) => Some(SystemCommand::new(entry.definition.clone(), handler.clone())),
            CommandSource::Custom => None,
        }
    }

    pub fn get_system_commands(&self) -> Vec<SystemCommand> {
        self.state
            .read()
            .commands
            .iter()
            .filter_map(|c| match &c.source {
                CommandSource::System(h) => Some(SystemCommand::new(c.definition.clone(), h.clone())),
                CommandSource::Custom => None,
            })
            .collect()
    }

    pub fn get_system_command_trigger(&self, id: &str) -> Option<String> {
        self.get_system_command_by_id(id).map(|c| c.definition.trigger)
    }

    pub fn get_all_system_command_definitions(&self) -> Vec<CommandDefinition> {
        self.get_system_commands().into_iter().map(|c| c.definition).collect()
    }

    pub fn has_system_command(&self, id: &str) -> bool {
        self.state
            .read()
            .by_id
            .get(id)
            .map(|c| c.is_system())
            .unwrap_or(false)
    }

    pub fn get_custom_command_by_id(&self, id: &str) -> Option<CommandDefinition> {
        self.state
            .read()
            .by_id
            .get(id)
            .filter(|c| !c.is_system())
            .map(|c| c.definition.clone())
    }

    pub fn get_all_custom_commands(&self) -> Vec<CommandDefinition> {
        self.state
            .read()
            .commands
            .iter()
            .filter(|c| !c.is_system())
            .map(|c| c.definition.clone())
            .collect()
    }

    /// Literal trigger/alias lookup used by the matcher.
    pub(crate) fn find_by_trigger(&self, candidate: &str) -> Option<Arc<RegisteredCommand>> {
        self.state.read().trigger_index.get(&normalize_trigger(candidate)).cloned()
    }

    /// Commands that have to be tested against the raw message, in registration order.
    pub(crate) fn pattern_commands(&self) -> Vec<Arc<RegisteredCommand>> {
        self.state
            .read()
            .commands
            .iter()
            .filter(|c| c.patterns.trigger.is_some())
            .cloned()
            .collect()
    }

    /// True while `entry` is still the live definition for its id.
    /// Usage-count bumps keep the revision and do not make an entry stale.
    pub fn is_current(&self, entry: &RegisteredCommand) -> bool {
        self.state
            .read()
            .by_id
            .get(entry.id())
            .map(|live| live.revision == entry.revision)
            .unwrap_or(false)
    }

    fn bump_revision(&self) -> u64 {
        self.next_revision.fetch_add(1, Ordering::Relaxed)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().by_id.contains_key(id)
    }

    /// The cooldown currently governing `scope`, as the dispatcher would pick it.
    /// `None` once the command or subcommand is gone or no longer has its own cooldown.
    pub fn live_cooldown(&self, scope: &CooldownScope) -> Option<Cooldown> {
        let state = self.state.read();
        let def = &state.by_id.get(&scope.command_id)?.definition;
        match &scope.subcommand_id {
            None => def.cooldown,
            Some(sub_id) => def
                .find_subcommand(sub_id)
                .and_then(|s| s.cooldown)
                .filter(|c| !c.is_empty()),
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ----------------------------------------------------------------
    // System commands
    // ----------------------------------------------------------------

    pub async fn register_system_command(&self, command: SystemCommand) -> Result<(), Error> {
        let mut def = command.definition;
        def.command_type = CommandType::System;
        let patterns = validate_definition(&def)?;

        let _gate = self.write_gate.lock().await;
        {
            let mut state = self.state.write();
            if state.by_id.contains_key(&def.id) {
                return Err(Error::Conflict(format!("a command with id '{}' is already registered", def.id)));
            }
            if let Some(taken) = state.taken_trigger(&def, None) {
                return Err(Error::Conflict(format!("trigger '{}' is already taken", taken)));
            }
            info!("Registering system command '{}' ({})", def.trigger, def.id);
            let id = def.id.clone();
            state.insert(Arc::new(RegisteredCommand {
                definition: def,
                source: CommandSource::System(command.handler),
                patterns,
                revision: self.bump_revision(),
            }));
            drop(state);
            self.notify("command-added", json!({ "id": id, "type": "system" }));
        }
        self.notify_count_changed(CommandType::System);
        Ok(())
    }

    pub async fn unregister_system_command(&self, id: &str) -> Result<(), Error> {
        let _gate = self.write_gate.lock().await;
        {
            let mut state = self.state.write();
            if !state.by_id.get(id).map(|c| c.is_system()).unwrap_or(false) {
                return Err(Error::NotFound(format!("system command '{}'", id)));
            }
            state.remove(id);
        }
        info!("Unregistered system command {}", id);
        self.after_removal(id, CommandType::System);
        Ok(())
    }

    // ----------------------------------------------------------------
    // Custom commands
    // ----------------------------------------------------------------

    /// Create (`is_new`) or update a custom command, persisting it first.
    /// Returns the definition as stored.
    pub async fn save_custom_command(
        &self,
        command: CommandDefinition,
        user: Option<&str>,
        is_new: bool,
    ) -> Result<CommandDefinition, Error> {
        let mut def = command;
        def.command_type = CommandType::Custom;
        def.hide_cooldowns = false;
        if is_new && def.id.trim().is_empty() {
            def.id = Uuid::new_v4().to_string();
        }
        let patterns = validate_definition(&def)?;

        let _gate = self.write_gate.lock().await;
        let now = Utc::now();

        {
            let state = self.state.read();
            if is_new {
                if state.by_id.contains_key(&def.id) {
                    return Err(Error::Conflict(format!("a command with id '{}' already exists", def.id)));
                }
                if let Some(taken) = state.taken_trigger(&def, None) {
                    return Err(Error::Conflict(format!("trigger '{}' is already taken", taken)));
                }
                def.created_by = user.map(|u| u.to_string());
                def.created_at = Some(now);
                def.last_edit_by = None;
                def.last_edit_at = None;
            } else {
                let existing = state
                    .by_id
                    .get(&def.id)
                    .filter(|c| !c.is_system())
                    .ok_or_else(|| Error::NotFound(format!("custom command '{}'", def.id)))?;
                if let Some(taken) = state.taken_trigger(&def, Some(&def.id)) {
                    return Err(Error::Conflict(format!("trigger '{}' is already taken", taken)));
                }
                def.created_by = existing.definition.created_by.clone();
                def.created_at = existing.definition.created_at;
                def.count = existing.definition.count;
                def.last_edit_by = user.map(|u| u.to_string());
                def.last_edit_at = Some(now);
            }
        }

        self.repo.save_command(&def).await?;

        {
            let mut state = self.state.write();
            if !is_new {
                // Usage may have been recorded while the save was in flight.
                if let Some(live) = state.by_id.get(&def.id) {
                    def.count = def.count.max(live.definition.count);
                }
            }
            let entry = Arc::new(RegisteredCommand {
                definition: def.clone(),
                source: CommandSource::Custom,
                patterns,
                revision: self.bump_revision(),
            });
            if is_new {
                state.insert(entry);
            } else {
                state.replace(entry);
            }
        }

        if is_new {
            info!("Created custom command '{}' ({})", def.trigger, def.id);
            self.notify("command-added", json!({ "id": def.id, "type": "custom" }));
        } else {
            info!("Updated custom command '{}' ({})", def.trigger, def.id);
            self.notify("command-updated", json!({ "id": def.id, "type": "custom" }));
        }
        self.notify_count_changed(CommandType::Custom);
        Ok(def)
    }

    pub async fn remove_custom_command_by_trigger(&self, trigger: &str) -> Result<(), Error> {
        let wanted = normalize_trigger(trigger);
        let _gate = self.write_gate.lock().await;

        let id = self
            .state
            .read()
            .commands
            .iter()
            .find(|c| !c.is_system() && normalize_trigger(&c.definition.trigger) == wanted)
            .map(|c| c.id().to_string())
            .ok_or_else(|| Error::NotFound(format!("custom command with trigger '{}'", trigger)))?;

        self.repo.delete_command(&id).await?;
        self.state.write().remove(&id);

        info!("Removed custom command '{}' ({})", trigger, id);
        self.after_removal(&id, CommandType::Custom);
        Ok(())
    }

    /// Bump the usage counter of a custom command. The new count is written
    /// on the next `flush_usage_counts`.
    pub fn record_usage(&self, id: &str) {
        {
            let mut state = self.state.write();
            let Some(old) = state.by_id.get(id).filter(|c| !c.is_system()).cloned() else {
                return;
            };
            let mut def = old.definition.clone();
            def.count += 1;
            state.replace(Arc::new(RegisteredCommand {
                definition: def,
                source: CommandSource::Custom,
                patterns: old.patterns.clone(),
                revision: old.revision,
            }));
        }
        self.dirty_usage.lock().insert(id.to_string());
    }

    /// Persist every usage count bumped since the last flush, one save per
    /// command. Returns how many commands were written.
    pub async fn flush_usage_counts(&self) -> usize {
        let pending: Vec<String> = self.dirty_usage.lock().drain().collect();
        if pending.is_empty() {
            return 0;
        }

        let _gate = self.write_gate.lock().await;
        let mut written = 0;
        for id in pending {
            // The command may have been edited or removed meanwhile; persist what is live.
            let Some(current) = self.get_custom_command_by_id(&id) else {
                continue;
            };
            match self.repo.save_command(&current).await {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!("Failed to persist usage count for '{}' => {:?}", current.trigger, e);
                    self.dirty_usage.lock().insert(id);
                }
            }
        }
        debug!("Flushed usage counts for {} commands", written);
        written
    }

    pub fn pending_usage_flushes(&self) -> usize {
        self.dirty_usage.lock().len()
    }

    // ----------------------------------------------------------------
    // Notifications
    // ----------------------------------------------------------------

    fn after_removal(&self, id: &str, kind: CommandType) {
        let listeners = self.removal_listeners.read().clone();
        for l in listeners {
            l.on_command_removed(id);
        }
        self.notify("command-removed", json!({ "id": id, "type": kind }));
        self.notify_count_changed(kind);
    }

    fn notify_count_changed(&self, kind: CommandType) {
        let (event, count) = match kind {
            CommandType::System => ("system-commands-updated", self.get_system_commands().len()),
            CommandType::Custom => ("custom-commands-updated", self.get_all_custom_commands().len()),
        };
        self.notify(event, json!({ "count": count }));
    }

    fn notify(&self, event_name: &str, data: serde_json::Value) {
        if let Some(n) = &self.notifier {
            n.send(event_name, data);
        }
    }
}
