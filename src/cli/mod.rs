//! CLI module
//!
//! Diagnostic command-line interface for the transport.
//!
//! # Commands
//!
//! - `request` - Send one request through the full resilience stack
//! - `config` - Print the effective configuration

mod commands;
mod runner;

pub use commands::{Cli, Commands, OutputFormat};
pub use runner::Runner;
