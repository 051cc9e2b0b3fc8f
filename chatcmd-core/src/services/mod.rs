// File: chatcmd-core/src/services/mod.rs

pub mod commands;
pub mod builtin_commands;

pub use commands::{CommandRegistry, Dispatcher, DispatchOutcome, SystemCommand};
