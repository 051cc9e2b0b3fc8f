// File: chatcmd-core/src/services/commands/matcher.rs

use std::collections::HashMap;
use std::sync::Arc;
use regex::{Regex, RegexBuilder};
use tracing::{debug, trace};

use chatcmd_common::models::{ChatMessage, CommandDefinition, SubCommand, UserCommand};
use crate::Error;
use crate::services::commands::registry::{CommandRegistry, RegisteredCommand};

/// Patterns compiled once when a definition is registered.
#[derive(Debug, Clone, Default)]
pub struct TriggerPatterns {
    /// Set for regex triggers and for literal triggers with `scanWholeMessage`.
    pub trigger: Option<Regex>,
    /// Subcommand id => anchored pattern, for subcommands flagged `regex`.
    pub subcommands: HashMap<String, Regex>,
}

fn build(pattern: &str) -> Result<Regex, Error> {
    Ok(RegexBuilder::new(pattern).case_insensitive(true).build()?)
}

impl TriggerPatterns {
    pub fn compile(def: &CommandDefinition) -> Result<Self, Error> {
        let trigger = if def.trigger_is_regex {
            let pattern = if def.scan_whole_message {
                def.trigger.clone()
            } else {
                format!("^(?:{})", def.trigger)
            };
            Some(build(&pattern).map_err(|e| {
                Error::Validation(format!("command '{}' has an invalid trigger pattern: {}", def.id, e))
            })?)
        } else if def.scan_whole_message {
            // Literal trigger anywhere in the message, as a whole word.
            let words = def
                .all_triggers()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join("|");
            Some(build(&format!(r"(?:^|\s)(?:{})(?:\s|$)", words))?)
        } else {
            None
        };

        let mut subcommands = HashMap::new();
        for sub in def.sub_commands.iter().chain(def.fallback_subcommand.iter()) {
            if sub.regex {
                let re = build(&format!("^(?:{})$", sub.arg)).map_err(|e| {
                    Error::Validation(format!("subcommand '{}' has an invalid pattern: {}", sub.id, e))
                })?;
                subcommands.insert(sub.id.clone(), re);
            }
        }

        Ok(Self { trigger, subcommands })
    }
}

/// Split a chat line into argument tokens. With `quoted`, a `"..."` span
/// becomes one token with the quotes stripped; an unterminated quote runs
/// to the end of the line.
pub fn tokenize(text: &str, quoted: bool) -> Vec<String> {
    if !quoted {
        return text.split_whitespace().map(|s| s.to_string()).collect();
    }

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut had_quotes = false;

    for ch in text.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                had_quotes = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() || had_quotes {
                    tokens.push(std::mem::take(&mut current));
                }
                had_quotes = false;
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() || had_quotes {
        tokens.push(current);
    }
    tokens
}

/// Why a matched line may not run as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchStatus {
    Valid,
    /// First argument matched no subcommand and there is no fallback.
    InvalidSubcommand,
    NotEnoughArgs { required: usize, given: usize },
}

impl MatchStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, MatchStatus::Valid)
    }
}

#[derive(Debug, Clone)]
pub struct MatchedCommand {
    pub command: Arc<RegisteredCommand>,
    pub user_command: UserCommand,
    pub status: MatchStatus,
}

impl MatchedCommand {
    pub fn triggered_subcommand(&self) -> Option<&SubCommand> {
        self.user_command.triggered_subcmd.as_ref()
    }

    /// Usage text of whatever was triggered, subcommand first.
    pub fn usage(&self) -> Option<&str> {
        self.triggered_subcommand()
            .map(|s| s.usage.as_str())
            .filter(|u| !u.is_empty())
            .or(self.command.definition.usage.as_deref())
    }
}

/// Resolves raw chat text into a command, subcommand and argument vector.
#[derive(Clone)]
pub struct TriggerMatcher {
    registry: Arc<CommandRegistry>,
}

impl TriggerMatcher {
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }

    pub fn match_message(&self, message: &ChatMessage) -> Option<MatchedCommand> {
        let text = message.text.trim();
        if text.is_empty() {
            return None;
        }

        let (candidate, rest) = match text.find(char::is_whitespace) {
            Some(pos) => (&text[..pos], &text[pos..]),
            None => (text, ""),
        };

        // Literal triggers and aliases first, then patterns in registration order.
        let (command, arg_text) = match self.registry.find_by_trigger(candidate) {
            Some(c) => (c, rest),
            None => {
                let hit = self.registry.pattern_commands().into_iter().find(|c| {
                    c.definition.active
                        && c.patterns.trigger.as_ref().map(|re| re.is_match(text)).unwrap_or(false)
                })?;
                let args = if hit.definition.scan_whole_message { text } else { rest };
                (hit, args)
            }
        };

        let def = &command.definition;
        if !def.active {
            debug!("Command '{}' is inactive.", def.trigger);
            return None;
        }
        if ignored_sender(def, message) {
            trace!("Command '{}' ignores this sender", def.trigger);
            return None;
        }

        let args = tokenize(arg_text, def.treat_quoted_text_as_single_arg);
        let mut user_command = UserCommand {
            trigger: def.trigger.clone(),
            args,
            triggered_subcmd: None,
            is_invalid_subcommand_trigger: false,
            triggered_arg: None,
            subcommand_id: None,
            command_sender: message.sender.user_id.clone(),
            sender_roles: message.sender.roles.clone(),
        };

        let mut status = MatchStatus::Valid;
        if def.has_subcommands() {
            if let Some(first) = user_command.args.first().cloned() {
                match find_subcommand(&command, &first) {
                    Some(sub) => {
                        user_command.args.remove(0);
                        user_command.subcommand_id = Some(sub.id.clone());
                        user_command.triggered_arg = Some(first);
                        user_command.triggered_subcmd = Some(sub.clone());
                    }
                    None => match def.fallback().filter(|f| f.active) {
                        Some(fallback) => {
                            user_command.subcommand_id = Some(fallback.id.clone());
                            user_command.triggered_arg = Some(first);
                            user_command.triggered_subcmd = Some(fallback.clone());
                        }
                        None => {
                            debug!("'{}' is not a subcommand of '{}'", first, def.trigger);
                            user_command.is_invalid_subcommand_trigger = true;
                            status = MatchStatus::InvalidSubcommand;
                        }
                    },
                }
            }
        }

        if status.is_valid() {
            let required = user_command
                .triggered_subcmd
                .as_ref()
                .and_then(|s| s.min_args)
                .or(def.min_args)
                .unwrap_or(0);
            let given = user_command.args.len();
            if given < required {
                status = MatchStatus::NotEnoughArgs { required, given };
            }
        }

        Some(MatchedCommand {
            command,
            user_command,
            status,
        })
    }
}

fn ignored_sender(def: &CommandDefinition, message: &ChatMessage) -> bool {
    (def.ignore_streamer && message.sender.is_streamer)
        || (def.ignore_bot && message.sender.is_bot)
        || (def.ignore_whispers && message.is_whisper)
}

/// Declaration order; fallback-only subcommands still match their own arg.
fn find_subcommand<'a>(command: &'a RegisteredCommand, token: &str) -> Option<&'a SubCommand> {
    let def = &command.definition;
    def.sub_commands
        .iter()
        .chain(def.fallback_subcommand.iter())
        .filter(|s| s.active)
        .find(|s| match command.patterns.subcommands.get(&s.id) {
            Some(re) => re.is_match(token),
            None => s.arg.eq_ignore_ascii_case(token),
        })
}
