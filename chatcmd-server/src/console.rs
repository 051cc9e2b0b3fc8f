//! chatcmd-server/src/console.rs
//!
//! Stand-ins for the chat platform: outgoing chat and effects are logged,
//! incoming chat is read line by line from stdin.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use chatcmd_common::models::{ChatMessage, ChatSender, EffectList, TriggerContext};
use chatcmd_common::traits::{ChatMessenger, EffectExecutor, FrontendNotifier};
use chatcmd_core::Error;

pub struct ConsoleMessenger;

#[async_trait]
impl ChatMessenger for ConsoleMessenger {
    async fn send_chat_message(&self, text: &str) -> Result<(), Error> {
        println!("[bot] {}", text);
        Ok(())
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), Error> {
        info!("(deleted chat message {})", message_id);
        Ok(())
    }
}

/// Logs effect lists instead of running them.
pub struct LoggingEffectExecutor;

#[async_trait]
impl EffectExecutor for LoggingEffectExecutor {
    async fn execute(&self, effects: &EffectList, context: &TriggerContext) -> Result<(), Error> {
        info!(
            "'{}' fired by {} args={:?} => {} effect(s)",
            context.command.trigger,
            context.chat_message.sender.username,
            context.user_command.args,
            effects.list.len()
        );
        for effect in &effects.list {
            debug!("effect => {}", effect);
        }
        Ok(())
    }
}

pub struct LogNotifier;

impl FrontendNotifier for LogNotifier {
    fn send(&self, event_name: &str, data: serde_json::Value) {
        debug!("frontend <= {} {}", event_name, data);
    }
}

/// Parses `name[role,role]: text` or plain `text` (sent as `default_user`).
/// The name `streamer` marks the broadcaster; a leading `/w ` marks a whisper.
pub fn parse_console_line(line: &str, default_user: &str) -> Option<ChatMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (head, text) = match line.split_once(": ") {
        Some((head, text)) if !head.contains(char::is_whitespace) => (head, text),
        _ => (default_user, line),
    };
    let (name, roles) = match head.split_once('[') {
        Some((name, rest)) => (name, rest.trim_end_matches(']')),
        None => (head, ""),
    };
    let roles: Vec<&str> = roles.split(',').map(str::trim).filter(|r| !r.is_empty()).collect();

    let mut sender = ChatSender::new(&name.to_lowercase(), name).with_roles(&roles);
    sender.is_streamer = name.eq_ignore_ascii_case("streamer");

    let (text, whisper) = match text.strip_prefix("/w ") {
        Some(rest) => (rest, true),
        None => (text, false),
    };
    let message = ChatMessage::new(text, sender);
    Some(if whisper { message.whisper() } else { message })
}

/// Feeds stdin lines into `tx` until EOF or shutdown.
pub fn spawn_console_reader(
    tx: mpsc::Sender<ChatMessage>,
    default_user: String,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            let Some(msg) = parse_console_line(&line, &default_user) else { continue };
                            if tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {
                            info!("stdin closed");
                            break;
                        }
                        Err(e) => {
                            warn!("Failed to read stdin => {:?}", e);
                            break;
                        }
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_named_line_with_roles() {
        let msg = parse_console_line("Alice[mod,vip]: !hug bob", "viewer").unwrap();
        assert_eq!(msg.text, "!hug bob");
        assert_eq!(msg.sender.user_id, "alice");
        assert!(msg.sender.has_role("mod"));
        assert!(msg.sender.has_role("vip"));
        assert!(!msg.sender.is_streamer);
    }

    #[test]
    fn test_parse_plain_line_and_whisper() {
        let msg = parse_console_line("/w !commands", "viewer").unwrap();
        assert_eq!(msg.text, "!commands");
        assert_eq!(msg.sender.username, "viewer");
        assert!(msg.is_whisper);
        assert!(parse_console_line("   ", "viewer").is_none());
    }

    #[test]
    fn test_streamer_flag() {
        let msg = parse_console_line("streamer: !so someone", "viewer").unwrap();
        assert!(msg.sender.is_streamer);
    }
}
