use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::chat::ChatMessage;
use crate::models::options::{CommandOption, ResolvedOptions};

fn default_true() -> bool {
    true
}

/// Unknown keys of a stored command, written back untouched.
pub type ExtraFields = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    System,
    #[default]
    Custom,
}

/// Minimum seconds between successful invocations. `None` means no cooldown of that kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cooldown {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<u64>,
}

impl Cooldown {
    pub fn global(seconds: u64) -> Self {
        Self { global: Some(seconds), user: None }
    }

    pub fn user(seconds: u64) -> Self {
        Self { global: None, user: Some(seconds) }
    }

    pub fn is_empty(&self) -> bool {
        self.global.unwrap_or(0) == 0 && self.user.unwrap_or(0) == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestrictionMode {
    /// Every restriction must pass.
    #[default]
    All,
    /// At least one restriction must pass.
    Any,
    /// No restriction may pass.
    None,
}

/// One configured restriction. `kind` names the predicate in the restriction registry,
/// everything else is handed to that predicate untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestrictionEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub settings: serde_json::Map<String, Value>,
}

impl RestrictionEntry {
    pub fn new(id: &str, kind: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
            settings: serde_json::Map::new(),
        }
    }

    pub fn with_setting(mut self, key: &str, value: Value) -> Self {
        self.settings.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestrictionData {
    #[serde(default)]
    pub mode: RestrictionMode,
    #[serde(default)]
    pub send_fail_message: bool,
    #[serde(default)]
    pub fail_message: String,
    #[serde(default)]
    pub restrictions: Vec<RestrictionEntry>,
}

impl RestrictionData {
    pub fn new(mode: RestrictionMode, restrictions: Vec<RestrictionEntry>) -> Self {
        Self {
            mode,
            restrictions,
            ..Default::default()
        }
    }

    pub fn with_fail_message(mut self, message: &str) -> Self {
        self.send_fail_message = true;
        self.fail_message = message.to_string();
        self
    }
}

/// Opaque effect payload. Only the execution engine interprets `list`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub list: Vec<Value>,
}

/// `allowTriggerBySharedChat`: a flag, or `"inherit"` to follow the global setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SharedChatTrigger {
    Flag(bool),
    Keyword(SharedChatKeyword),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharedChatKeyword {
    Inherit,
}

impl SharedChatTrigger {
    pub fn inherit() -> Self {
        SharedChatTrigger::Keyword(SharedChatKeyword::Inherit)
    }
}

/// Set on currency system commands only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyRef {
    pub name: String,
    pub id: String,
}

/// A named branch of a command, selected by the first argument.
///
/// Carries the command-level display and chat settings too, so a stored
/// subcommand reads back exactly as it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubCommand {
    pub id: String,
    pub arg: String,
    #[serde(default)]
    pub usage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_args: Option<usize>,
    /// `arg` is a pattern matched against the first argument token.
    #[serde(default)]
    pub regex: bool,
    #[serde(default)]
    pub fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<Cooldown>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restriction_data: Option<RestrictionData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effects: Option<EffectList>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_delete_trigger: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_streamer: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_bot: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_whispers: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_cooldown_message: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_custom_cooldown_message: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treat_quoted_text_as_single_arg: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, CommandOption>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl SubCommand {
    pub fn new(id: &str, arg: &str) -> Self {
        Self {
            id: id.to_string(),
            arg: arg.to_string(),
            usage: String::new(),
            description: None,
            active: true,
            min_args: None,
            regex: false,
            fallback: false,
            cooldown: None,
            restriction_data: None,
            effects: None,
            aliases: Vec::new(),
            hidden: None,
            auto_delete_trigger: None,
            ignore_streamer: None,
            ignore_bot: None,
            ignore_whispers: None,
            send_cooldown_message: None,
            use_custom_cooldown_message: None,
            cooldown_message: None,
            treat_quoted_text_as_single_arg: None,
            options: BTreeMap::new(),
            extra: ExtraFields::new(),
        }
    }

    /// True when the subcommand declares restrictions of its own.
    pub fn has_own_restrictions(&self) -> bool {
        self.restriction_data
            .as_ref()
            .map(|r| !r.restrictions.is_empty())
            .unwrap_or(false)
    }
}

/// The persisted shape of a command, shared by system and custom commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDefinition {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub command_type: CommandType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_edit_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_edit_at: Option<DateTime<Utc>>,
    /// How many times the command has fired in chat.
    #[serde(default)]
    pub count: u64,

    #[serde(default = "default_true")]
    pub active: bool,
    pub trigger: String,
    #[serde(default)]
    pub trigger_is_regex: bool,
    #[serde(default)]
    pub scan_whole_message: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,

    #[serde(default)]
    pub auto_delete_trigger: bool,
    #[serde(default)]
    pub simple: bool,
    /// Hidden from the `!commands` list.
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub ignore_streamer: bool,
    #[serde(default)]
    pub ignore_bot: bool,
    #[serde(default)]
    pub ignore_whispers: bool,

    #[serde(default = "default_true")]
    pub send_cooldown_message: bool,
    #[serde(default)]
    pub use_custom_cooldown_message: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_message: Option<String>,
    /// System commands only: never announce cooldowns.
    #[serde(default)]
    pub hide_cooldowns: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_command_description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort_tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<Cooldown>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effects: Option<EffectList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restriction_data: Option<RestrictionData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_commands: Vec<SubCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_subcommand: Option<SubCommand>,
    #[serde(default)]
    pub treat_quoted_text_as_single_arg: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_args: Option<usize>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, CommandOption>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<CurrencyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_trigger_by_shared_chat: Option<SharedChatTrigger>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl CommandDefinition {
    pub fn new(id: &str, trigger: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            description: None,
            command_type: CommandType::Custom,
            created_by: None,
            created_at: None,
            last_edit_by: None,
            last_edit_at: None,
            count: 0,
            active: true,
            trigger: trigger.to_string(),
            trigger_is_regex: false,
            scan_whole_message: false,
            aliases: Vec::new(),
            usage: None,
            auto_delete_trigger: false,
            simple: false,
            hidden: false,
            ignore_streamer: false,
            ignore_bot: false,
            ignore_whispers: false,
            send_cooldown_message: true,
            use_custom_cooldown_message: false,
            cooldown_message: None,
            hide_cooldowns: false,
            base_command_description: None,
            sort_tags: Vec::new(),
            cooldown: None,
            effects: None,
            restriction_data: None,
            sub_commands: Vec::new(),
            fallback_subcommand: None,
            treat_quoted_text_as_single_arg: false,
            min_args: None,
            options: BTreeMap::new(),
            currency: None,
            allow_trigger_by_shared_chat: None,
            extra: ExtraFields::new(),
        }
    }

    /// Primary trigger followed by every alias.
    pub fn all_triggers(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.trigger.as_str()).chain(self.aliases.iter().map(|a| a.as_str()))
    }

    /// The fallback subcommand, whether declared in `fallbackSubcommand` or flagged in `subCommands`.
    pub fn fallback(&self) -> Option<&SubCommand> {
        self.fallback_subcommand
            .as_ref()
            .or_else(|| self.sub_commands.iter().find(|s| s.fallback))
    }

    pub fn has_subcommands(&self) -> bool {
        !self.sub_commands.is_empty() || self.fallback_subcommand.is_some()
    }

    pub fn find_subcommand(&self, id: &str) -> Option<&SubCommand> {
        self.sub_commands
            .iter()
            .chain(self.fallback_subcommand.iter())
            .find(|s| s.id == id)
    }
}

/// Result of matching a chat line against a command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCommand {
    pub trigger: String,
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_subcmd: Option<SubCommand>,
    pub is_invalid_subcommand_trigger: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_arg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcommand_id: Option<String>,
    pub command_sender: String,
    pub sender_roles: Vec<String>,
}

/// Everything a predicate, a system command callback or the execution engine sees.
#[derive(Debug, Clone)]
pub struct TriggerContext {
    pub command: CommandDefinition,
    pub user_command: UserCommand,
    pub chat_message: ChatMessage,
    pub options: ResolvedOptions,
}

impl TriggerContext {
    pub fn sender_id(&self) -> &str {
        &self.chat_message.sender.user_id
    }

    pub fn sender_roles(&self) -> &[String] {
        &self.chat_message.sender.roles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_reads_camel_case_shape() {
        let raw = json!({
            "id": "c1",
            "type": "custom",
            "active": true,
            "trigger": "!give",
            "aliases": ["!gift"],
            "treatQuotedTextAsSingleArg": true,
            "cooldown": { "global": 10 },
            "restrictionData": {
                "mode": "any",
                "sendFailMessage": true,
                "failMessage": "nope",
                "restrictions": [{ "id": "r1", "type": "roles", "roles": ["mod"] }]
            },
            "subCommands": [{ "id": "s1", "arg": "coins", "usage": "coins <n>", "minArgs": 1 }]
        });

        let def: CommandDefinition = serde_json::from_value(raw).unwrap();
        assert_eq!(def.trigger, "!give");
        assert_eq!(def.aliases, vec!["!gift".to_string()]);
        assert!(def.treat_quoted_text_as_single_arg);
        assert!(def.send_cooldown_message, "defaults to sending cooldown messages");
        assert_eq!(def.cooldown, Some(Cooldown::global(10)));

        let rd = def.restriction_data.as_ref().unwrap();
        assert_eq!(rd.mode, RestrictionMode::Any);
        assert_eq!(rd.restrictions[0].kind, "roles");
        assert_eq!(rd.restrictions[0].settings["roles"], json!(["mod"]));

        assert_eq!(def.sub_commands[0].min_args, Some(1));
        assert!(def.sub_commands[0].active);
    }

    #[test]
    fn test_fallback_lookup_prefers_dedicated_field() {
        let mut def = CommandDefinition::new("c1", "!points");
        let mut flagged = SubCommand::new("s2", "points");
        flagged.fallback = true;
        def.sub_commands = vec![SubCommand::new("s1", "coins"), flagged];
        assert_eq!(def.fallback().map(|s| s.id.as_str()), Some("s2"));

        def.fallback_subcommand = Some(SubCommand::new("s3", "other"));
        assert_eq!(def.fallback().map(|s| s.id.as_str()), Some("s3"));
        assert!(def.find_subcommand("s3").is_some());
    }

    #[test]
    fn test_stored_shape_survives_a_rewrite() {
        let raw = json!({
            "id": "c2",
            "type": "custom",
            "active": true,
            "trigger": "!bank",
            "allowTriggerBySharedChat": "inherit",
            "currency": { "name": "Coins", "id": "cur-1" },
            "pluginData": { "x": 1 },
            "subCommands": [{
                "id": "s1",
                "arg": "add",
                "usage": "add <n>",
                "aliases": ["plus"],
                "hidden": true,
                "sendCooldownMessage": false,
                "useCustomCooldownMessage": true,
                "cooldownMessage": "wait",
                "autoDeleteTrigger": true,
                "treatQuotedTextAsSingleArg": true,
                "ignoreBot": true,
                "description2": "kept"
            }]
        });

        let def: CommandDefinition = serde_json::from_value(raw).unwrap();
        assert_eq!(def.allow_trigger_by_shared_chat, Some(SharedChatTrigger::inherit()));
        assert_eq!(def.currency.as_ref().map(|c| c.id.as_str()), Some("cur-1"));
        let sub = &def.sub_commands[0];
        assert_eq!(sub.aliases, vec!["plus".to_string()]);
        assert_eq!(sub.cooldown_message.as_deref(), Some("wait"));
        assert_eq!(sub.ignore_bot, Some(true));

        let out = serde_json::to_value(&def).unwrap();
        assert_eq!(out["allowTriggerBySharedChat"], json!("inherit"));
        assert_eq!(out["currency"], json!({ "name": "Coins", "id": "cur-1" }));
        assert_eq!(out["pluginData"], json!({ "x": 1 }));
        let sub_out = &out["subCommands"][0];
        for key in [
            "aliases",
            "hidden",
            "sendCooldownMessage",
            "useCustomCooldownMessage",
            "cooldownMessage",
            "autoDeleteTrigger",
            "treatQuotedTextAsSingleArg",
            "ignoreBot",
            "description2",
        ] {
            assert!(sub_out.get(key).is_some(), "subcommand lost '{}'", key);
        }
        assert_eq!(sub_out["sendCooldownMessage"], json!(false));
        assert!(sub_out.get("ignoreStreamer").is_none());

        let flag: CommandDefinition =
            serde_json::from_value(json!({ "trigger": "!x", "allowTriggerBySharedChat": false })).unwrap();
        assert_eq!(flag.allow_trigger_by_shared_chat, Some(SharedChatTrigger::Flag(false)));
    }

    #[test]
    fn test_cooldown_empty() {
        assert!(Cooldown::default().is_empty());
        assert!(Cooldown { global: Some(0), user: None }.is_empty());
        assert!(!Cooldown::user(5).is_empty());
    }
}
