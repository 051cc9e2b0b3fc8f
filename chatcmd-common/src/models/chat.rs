use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The user who sent a chat line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSender {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub is_streamer: bool,
    #[serde(default)]
    pub is_bot: bool,
}

impl ChatSender {
    pub fn new(user_id: &str, username: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            username: username.to_string(),
            ..Default::default()
        }
    }

    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    /// Case-insensitive role check.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }
}

/// A single incoming chat line, as handed over by the platform connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sender: ChatSender,
    #[serde(default)]
    pub is_whisper: bool,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(text: &str, sender: ChatSender) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            sender,
            is_whisper: false,
            timestamp: Utc::now(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn whisper(mut self) -> Self {
        self.is_whisper = true;
        self
    }
}
