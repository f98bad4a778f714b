//! CLI definitions and command implementations for redcapfs.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// redcapfs - REDCap exports on demand, driven by file names
#[derive(Parser)]
#[command(name = "redcapfs")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config.toml (default: <config dir>/redcapfs/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watch a directory and export whatever is asked for inside it
    Mount {
        /// Directory to serve (created if missing)
        mountpoint: PathBuf,

        /// REDCap API URL for this run, overriding the stored one
        #[arg(short, long)]
        url: Option<String>,
    },

    /// Manage stored access tokens
    Token {
        #[command(subcommand)]
        action: TokenCommand,
    },

    /// Store the REDCap API URL
    SetUrl {
        /// e.g. https://redcap.example.org/api/
        url: String,
    },
}

#[derive(Subcommand)]
pub enum TokenCommand {
    /// Add an access token (one per site account)
    Add {
        /// Token as shown on the REDCap API page
        token: String,
    },

    /// List stored tokens and the API URL
    Show {
        /// Print tokens in full instead of masked
        #[arg(long)]
        reveal: bool,
    },

    /// Delete the token store
    Clear,
}
