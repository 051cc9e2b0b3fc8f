// File: chatcmd-core/src/repositories/memory.rs

use async_trait::async_trait;
use parking_lot::RwLock;

use chatcmd_common::models::CommandDefinition;
use chatcmd_common::traits::CustomCommandRepository;
use crate::Error;

/// Non-durable store. Keeps insertion order so reloads register commands
/// in the order they were created.
#[derive(Default)]
pub struct InMemoryCommandRepository {
    commands: RwLock<Vec<CommandDefinition>>,
}

impl InMemoryCommandRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_commands(commands: Vec<CommandDefinition>) -> Self {
        Self {
            commands: RwLock::new(commands),
        }
    }

    pub fn len(&self) -> usize {
        self.commands.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CustomCommandRepository for InMemoryCommandRepository {
    async fn list_commands(&self) -> Result<Vec<CommandDefinition>, Error> {
        Ok(self.commands.read().clone())
    }

    async fn get_command_by_id(&self, id: &str) -> Result<Option<CommandDefinition>, Error> {
        Ok(self.commands.read().iter().find(|c| c.id == id).cloned())
    }

    async fn save_command(&self, cmd: &CommandDefinition) -> Result<(), Error> {
        let mut guard = self.commands.write();
        match guard.iter_mut().find(|c| c.id == cmd.id) {
            Some(existing) => *existing = cmd.clone(),
            None => guard.push(cmd.clone()),
        }
        Ok(())
    }

    async fn delete_command(&self, id: &str) -> Result<(), Error> {
        self.commands.write().retain(|c| c.id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_upserts_in_place() -> Result<(), Error> {
        let repo = InMemoryCommandRepository::new();
        repo.save_command(&CommandDefinition::new("a", "!a")).await?;
        repo.save_command(&CommandDefinition::new("b", "!b")).await?;

        let mut edited = CommandDefinition::new("a", "!alpha");
        edited.count = 3;
        repo.save_command(&edited).await?;

        let all = repo.list_commands().await?;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].trigger, "!alpha");
        assert_eq!(all[0].count, 3);
        assert_eq!(all[1].id, "b");

        repo.delete_command("a").await?;
        assert!(repo.get_command_by_id("a").await?.is_none());
        assert_eq!(repo.len(), 1);
        Ok(())
    }
}
