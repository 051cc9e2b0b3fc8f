// File: chatcmd-core/src/repositories/mod.rs

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileCommandRepository;
pub use memory::InMemoryCommandRepository;
