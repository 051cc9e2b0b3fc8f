pub mod chat;
pub mod command;
pub mod options;

pub use chat::{ChatMessage, ChatSender};
pub use command::{
    CommandDefinition, CommandType, Cooldown, CurrencyRef, EffectList, ExtraFields,
    RestrictionData, RestrictionEntry, RestrictionMode, SharedChatKeyword, SharedChatTrigger,
    SubCommand, TriggerContext, UserCommand,
};
pub use options::{CommandOption, OptionKind, ResolvedOptions};
