// File: chatcmd-core/src/repositories/json_file.rs

use std::path::{Path, PathBuf};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use chatcmd_common::models::CommandDefinition;
use chatcmd_common::traits::CustomCommandRepository;
use crate::Error;

/// Stores custom commands as one pretty-printed JSON array.
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename, so a crash mid-write leaves the previous file intact. Writes are
/// serialized by `lock`; a missing file reads as an empty list.
pub struct JsonFileCommandRepository {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileCommandRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<CommandDefinition>, Error> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} does not exist yet, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw)
            .map_err(|e| Error::Persistence(format!("{} is not a valid command file: {}", self.path.display(), e)))
    }

    async fn write_all(&self, commands: &[CommandDefinition]) -> Result<(), Error> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_string_pretty(commands)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CustomCommandRepository for JsonFileCommandRepository {
    async fn list_commands(&self) -> Result<Vec<CommandDefinition>, Error> {
        let _guard = self.lock.lock().await;
        let commands = self.read_all().await?;
        info!("Read {} custom commands from {}", commands.len(), self.path.display());
        Ok(commands)
    }

    async fn get_command_by_id(&self, id: &str) -> Result<Option<CommandDefinition>, Error> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.into_iter().find(|c| c.id == id))
    }

    async fn save_command(&self, cmd: &CommandDefinition) -> Result<(), Error> {
        let _guard = self.lock.lock().await;
        let mut commands = self.read_all().await?;
        match commands.iter_mut().find(|c| c.id == cmd.id) {
            Some(existing) => *existing = cmd.clone(),
            None => commands.push(cmd.clone()),
        }
        self.write_all(&commands).await
    }

    async fn delete_command(&self, id: &str) -> Result<(), Error> {
        let _guard = self.lock.lock().await;
        let mut commands = self.read_all().await?;
        let before = commands.len();
        commands.retain(|c| c.id != id);
        if commands.len() == before {
            return Ok(());
        }
        self.write_all(&commands).await
    }
}
