// File: chatcmd-core/src/services/builtin_commands/mod.rs
//! System commands that ship with the dispatcher. Each command lives in its
//! own file; `register_builtin_commands` adds all of them to a registry.

pub mod commands_list;

use std::sync::Arc;
use tracing::info;

use chatcmd_common::traits::ChatMessenger;
use crate::Error;
use crate::services::commands::registry::CommandRegistry;

pub use commands_list::{CommandsListCommand, COMMANDS_LIST_ID};

pub async fn register_builtin_commands(
    registry: &Arc<CommandRegistry>,
    messenger: Arc<dyn ChatMessenger>,
) -> Result<(), Error> {
    registry
        .register_system_command(CommandsListCommand::system_command(registry, messenger))
        .await?;
    info!("Registered built-in commands");
    Ok(())
}
