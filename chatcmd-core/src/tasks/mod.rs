// File: chatcmd-core/src/tasks/mod.rs

pub mod cooldown_sweeper;
pub mod usage_flusher;

pub use cooldown_sweeper::spawn_cooldown_sweeper;
pub use usage_flusher::spawn_usage_flusher;
