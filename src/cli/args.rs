//! CLI argument definitions using clap
//!
//! Commands:
//! - invoice-vault init --config <path>
//! - invoice-vault serve --config <path> [--port <port>]
//! - invoice-vault backup --scope <scope> --output <dir>
//! - invoice-vault restore --scope <scope> --file <path>
//! - invoice-vault reset --yes

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::backup::ArtifactScope;

const DEFAULT_CONFIG: &str = "./invoice-vault.json";

/// Invoice Vault - backup, restore and reset for an invoice store
#[derive(Parser, Debug)]
#[command(name = "invoice-vault")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Emit logs as one JSON object per line
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the data root layout and bootstrap the schema
    Init {
        /// Path to configuration file
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Serve the administrative HTTP API
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Write a backup artifact into a directory
    Backup {
        /// Path to configuration file
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// database, uploads or full
        #[arg(long)]
        scope: ArtifactScope,

        /// Directory receiving the artifact
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },

    /// Restore from a local artifact; the file itself is left in place
    Restore {
        /// Path to configuration file
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// database, uploads or full
        #[arg(long)]
        scope: ArtifactScope,

        /// Artifact to restore from
        #[arg(long)]
        file: PathBuf,
    },

    /// Delete every business record. Cannot be undone.
    Reset {
        /// Path to configuration file
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// Confirm the destructive reset
        #[arg(long)]
        yes: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
