//! CLI, configuration, journal store and output rendering
//!
//! This crate provides the `wellsync` command-line interface.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod secret;
pub mod store;

pub use cli::Cli;
pub use commands::Workspace;
pub use error::{ClientError, ClientResult};
pub use store::JournalFile;
