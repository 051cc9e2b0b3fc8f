// src/lib.rs

pub mod config;
pub mod eventbus;
pub mod repositories;
pub mod services;
pub mod tasks;

pub use chatcmd_common::error::Error;
pub use chatcmd_common::models;
pub use chatcmd_common::traits;
pub use config::DispatcherConfig;
