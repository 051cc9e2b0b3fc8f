// File: chatcmd-core/src/config.rs

use std::path::Path;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Tunables for the dispatcher and its background tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DispatcherConfig {
    /// Sent when a command without a custom cooldown message is on cooldown.
    /// `{timeLeft}` and `{user}` are substituted.
    pub default_cooldown_message: String,
    /// `{trigger}` and `{usage}` are substituted.
    pub usage_message_template: String,
    pub send_usage_messages: bool,
    pub cooldown_sweep_interval_secs: u64,
    /// How often bumped usage counts are written to the command store.
    pub usage_flush_interval_secs: u64,
    /// Per-subscriber buffer on the command event bus.
    pub event_buffer_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_cooldown_message: "This command is still on cooldown for: {timeLeft}".to_string(),
            usage_message_template: "Invalid usage: {trigger} {usage}".to_string(),
            send_usage_messages: true,
            cooldown_sweep_interval_secs: 300,
            usage_flush_interval_secs: 5,
            event_buffer_size: 1024,
        }
    }
}

impl DispatcherConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(raw)?)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_json_str(&raw)
    }

    pub fn format_cooldown_message(&self, template: &str, seconds: u64, user: &str) -> String {
        template
            .replace("{timeLeft}", &format_time_left(seconds))
            .replace("{user}", user)
    }

    pub fn format_usage_message(&self, trigger: &str, usage: &str) -> String {
        self.usage_message_template
            .replace("{trigger}", trigger)
            .replace("{usage}", usage)
            .trim_end()
            .to_string()
    }
}

/// `75` => `1m 15s`, `3` => `3s`.
pub fn format_time_left(seconds: u64) -> String {
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    match (h, m) {
        (0, 0) => format!("{}s", s),
        (0, _) => format!("{}m {}s", m, s),
        _ => format!("{}h {}m {}s", h, m, s),
    }
}
