//! redcapfs CLI - REDCap exports on demand, driven by file names
//!
//! Usage:
//!   redcapfs mount <DIR>        - Serve a directory until Ctrl-C
//!   redcapfs token add <TOKEN>  - Store an access token
//!   redcapfs token show         - List stored tokens (masked)
//!   redcapfs token clear        - Delete the token store
//!   redcapfs set-url <URL>      - Store the REDCap API URL

use anyhow::Result;
use clap::Parser;
use redcapfs::cli::{commands, Cli, Commands, TokenCommand};
use redcapfs::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("redcapfs={}", log_level).parse()?),
        )
        .with_target(false)
        .init();

    let config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Mount { mountpoint, url } => commands::mount(config, mountpoint, url).await,
        Commands::Token { action } => match action {
            TokenCommand::Add { token } => commands::token_add(&config, &token),
            TokenCommand::Show { reveal } => commands::token_show(&config, reveal),
            TokenCommand::Clear => commands::token_clear(&config),
        },
        Commands::SetUrl { url } => commands::set_url(&config, &url),
    }
}
