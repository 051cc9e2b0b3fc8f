// File: chatcmd-core/src/services/builtin_commands/commands_list.rs

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use chatcmd_common::models::{CommandDefinition, CommandOption, CommandType, Cooldown, OptionKind};
use chatcmd_common::traits::{ChatMessenger, SystemCommandHandler, SystemCommandTriggerEvent};
use crate::Error;
use crate::services::commands::registry::{CommandRegistry, SystemCommand};

pub const COMMANDS_LIST_ID: &str = "chatcmd:commandlist";

/// `!commands`: replies with the triggers of every active, visible command.
pub struct CommandsListCommand {
    // Weak because the registry owns this handler.
    registry: Weak<CommandRegistry>,
    messenger: Arc<dyn ChatMessenger>,
}

impl CommandsListCommand {
    pub fn new(registry: &Arc<CommandRegistry>, messenger: Arc<dyn ChatMessenger>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            messenger,
        }
    }

    pub fn definition() -> CommandDefinition {
        let mut def = CommandDefinition::new(COMMANDS_LIST_ID, "!commands");
        def.name = Some("Command List".to_string());
        def.description = Some("Lists all commands available in chat.".to_string());
        def.command_type = CommandType::System;
        def.cooldown = Some(Cooldown {
            global: Some(10),
            user: None,
        });
        let mut separator = CommandOption::new(OptionKind::String, json!(", "));
        separator.title = Some("Separator between triggers".to_string());
        def.options = BTreeMap::from([("separator".to_string(), separator)]);
        def
    }

    pub fn system_command(registry: &Arc<CommandRegistry>, messenger: Arc<dyn ChatMessenger>) -> SystemCommand {
        SystemCommand::new(Self::definition(), Arc::new(Self::new(registry, messenger)))
    }

    /// Sorted, de-duplicated primary triggers of active non-hidden commands.
    pub fn list_triggers(registry: &CommandRegistry) -> Vec<String> {
        let mut triggers: Vec<String> = registry
            .get_all_active_commands()
            .into_iter()
            .filter(|c| !c.hidden)
            .map(|c| c.trigger)
            .collect();
        triggers.sort_by_key(|t| t.to_lowercase());
        triggers.dedup();
        triggers
    }
}

#[async_trait]
impl SystemCommandHandler for CommandsListCommand {
    async fn on_trigger_event(&self, event: SystemCommandTriggerEvent) -> Result<(), Error> {
        let Some(registry) = self.registry.upgrade() else {
            debug!("!commands fired after registry was dropped");
            return Ok(());
        };
        let separator = event
            .context
            .options
            .get("separator")
            .and_then(|v| v.as_str())
            .unwrap_or(", ");
        let triggers = Self::list_triggers(&registry);
        let reply = if triggers.is_empty() {
            "There are no commands yet.".to_string()
        } else {
            format!("Commands: {}", triggers.join(separator))
        };
        self.messenger.send_chat_message(&reply).await
    }
}
