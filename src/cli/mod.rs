//! CLI module for Invoice Vault
//!
//! Provides command-line interface for:
//! - init: Create the data root and bootstrap the schema
//! - serve: Run the administrative HTTP API
//! - backup / restore: Local artifact round trips
//! - reset: Destructive reset, confirmed with --yes

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{backup, init, reset, restore, run, run_command, serve};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
