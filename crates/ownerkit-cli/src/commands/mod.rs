//! Subcommand implementations.

pub mod config;
pub mod opcodes;
pub mod wire;
