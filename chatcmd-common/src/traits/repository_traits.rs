use async_trait::async_trait;
use crate::error::Error;
use crate::models::CommandDefinition;

/// Durable store for custom commands. The registry keeps a cached copy and
/// writes through this trait on every save/remove.
#[async_trait]
pub trait CustomCommandRepository: Send + Sync {
    async fn list_commands(&self) -> Result<Vec<CommandDefinition>, Error>;
    async fn get_command_by_id(&self, id: &str) -> Result<Option<CommandDefinition>, Error>;
    /// Insert or replace by `id`.
    async fn save_command(&self, cmd: &CommandDefinition) -> Result<(), Error>;
    async fn delete_command(&self, id: &str) -> Result<(), Error>;
}
