//! Command implementations for the redcapfs CLI.
//!
//! Main commands:
//! - mount: serve a directory until Ctrl-C
//! - token add/show/clear: manage the encrypted token store
//! - set-url: store the REDCap API URL

use crate::client::{DataClient, HttpTransport};
use crate::config::Config;
use crate::context::AppContext;
use crate::router::{EventRouter, ExportReport, ExportStatus};
use crate::vault::{CredentialVault, Credentials};
use crate::watcher::MountWatcher;
use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Visible characters at the end of a masked token.
const VISIBLE_TOKEN_CHARS: usize = 4;

/// Prompt for a passphrase (input hidden)
fn prompt_passphrase(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let passphrase = rpassword::read_password().context("Cannot read passphrase")?;

    if passphrase.is_empty() {
        bail!("Passphrase cannot be empty");
    }

    Ok(passphrase)
}

/// Passphrase for an existing store, or a new confirmed one for a first run.
fn passphrase_for(vault: &CredentialVault) -> Result<String> {
    if vault.exists() {
        return prompt_passphrase("Token store passphrase: ");
    }

    println!(
        "{} {}",
        "Creating token store".cyan(),
        vault.path().display().to_string().dimmed()
    );
    let passphrase = prompt_passphrase("New passphrase: ")?;
    let confirm = prompt_passphrase("Confirm passphrase: ")?;
    if passphrase != confirm {
        bail!("Passphrases do not match");
    }
    Ok(passphrase)
}

fn open_vault(config: &Config) -> CredentialVault {
    CredentialVault::new(&config.vault_path, &config.default_base_url)
}

/// `****************wxyz`
fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let hidden = chars.len().saturating_sub(VISIBLE_TOKEN_CHARS);
    let visible: String = chars[hidden..].iter().collect();
    format!("{}{}", "*".repeat(hidden), visible)
}

/// Add an access token to the store
pub fn token_add(config: &Config, token: &str) -> Result<()> {
    let token = token.trim();
    if token.is_empty() {
        bail!("Token cannot be empty");
    }

    let vault = open_vault(config);
    let passphrase = passphrase_for(&vault)?;
    let mut credentials = vault
        .load(&passphrase)
        .context("Cannot open token store")?;

    if credentials.access_tokens.iter().any(|t| t == token) {
        println!("{}", "Token already stored.".yellow());
        return Ok(());
    }

    credentials.access_tokens.push(token.to_string());
    vault.save(&passphrase, &credentials)?;

    println!(
        "  {} Stored token {} ({} total)",
        "✓".green(),
        mask_token(token).cyan(),
        credentials.access_tokens.len()
    );
    Ok(())
}

/// Print the stored URL and tokens
pub fn token_show(config: &Config, reveal: bool) -> Result<()> {
    let vault = open_vault(config);
    if !vault.exists() {
        println!("{}", "No token store yet. Add a token with `redcapfs token add`.".yellow());
        return Ok(());
    }

    let passphrase = prompt_passphrase("Token store passphrase: ")?;
    let credentials = vault
        .load(&passphrase)
        .context("Cannot open token store")?;

    println!("\n{} {}", "URL:".cyan(), credentials.base_url.white().bold());
    if credentials.access_tokens.is_empty() {
        println!("{}", "No tokens stored.".yellow());
        return Ok(());
    }

    println!(
        "{} {}\n",
        "Tokens:".cyan(),
        credentials.access_tokens.len().to_string().green().bold()
    );
    for (idx, token) in credentials.access_tokens.iter().enumerate() {
        let shown = if reveal {
            token.clone()
        } else {
            mask_token(token)
        };
        println!("  {}. {}", (idx + 1).to_string().cyan(), shown);
    }
    println!();
    Ok(())
}

/// Delete the token store
pub fn token_clear(config: &Config) -> Result<()> {
    let vault = open_vault(config);
    if !vault.exists() {
        println!("{}", "Nothing to clear.".yellow());
        return Ok(());
    }

    let passphrase = prompt_passphrase("Token store passphrase: ")?;
    if vault.remove(&passphrase).context("Cannot open token store")? {
        println!("  {} Token store removed", "✓".green());
    }
    Ok(())
}

/// Store the REDCap API URL
pub fn set_url(config: &Config, url: &str) -> Result<()> {
    let url = url.trim();
    if url.is_empty() {
        bail!("URL cannot be empty");
    }

    let vault = open_vault(config);
    let passphrase = passphrase_for(&vault)?;
    let credentials = vault
        .load(&passphrase)
        .context("Cannot open token store")?;

    let updated = Credentials {
        base_url: url.to_string(),
        ..credentials
    };
    vault.save(&passphrase, &updated)?;

    println!("  {} API URL set to {}", "✓".green(), url.cyan());
    Ok(())
}

/// Serve `mountpoint` until Ctrl-C
pub async fn mount(config: Config, mountpoint: PathBuf, url: Option<String>) -> Result<()> {
    let vault = open_vault(&config);
    let passphrase = prompt_passphrase("Token store passphrase: ")?;
    let mut credentials = vault
        .load(&passphrase)
        .context("Cannot open token store")?;
    if let Some(url) = url {
        credentials.base_url = url;
    }
    if credentials.access_tokens.is_empty() {
        println!(
            "{}",
            "No access tokens stored; exports will be empty. Add one with `redcapfs token add`."
                .yellow()
        );
    }

    fs::create_dir_all(&mountpoint)
        .with_context(|| format!("Cannot create {}", mountpoint.display()))?;
    let root = mountpoint
        .canonicalize()
        .with_context(|| format!("Cannot resolve {}", mountpoint.display()))?;

    println!("{}", "Loading project metadata...".cyan());
    let transport = Arc::new(HttpTransport::new(config.client.timeout())?);
    let client = DataClient::new(transport, credentials, config.study.clone());
    let ctx = Arc::new(AppContext::load(config, client, root.clone()).await);

    let (router, mut reports) = EventRouter::new(ctx)?;
    let printer = tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            print_report(&report);
        }
    });

    router.write_startup_files().await;
    let watcher = MountWatcher::start(&root, router.clone())?;

    println!(
        "\n{} {} {}",
        "Serving".green().bold(),
        watcher.root().display().to_string().white().bold(),
        "(Ctrl-C to stop)".dimmed()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Cannot listen for Ctrl-C")?;

    println!("\n{}", "Stopping...".cyan());
    drop(watcher);
    router.shutdown().await;
    drop(router);
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;

    Ok(())
}

fn print_report(report: &ExportReport) {
    let target = report.target.display().to_string();
    match &report.status {
        ExportStatus::Written { rows } => println!(
            "  {} {} {}",
            "✓".green(),
            target,
            format!("({} rows)", rows).dimmed()
        ),
        ExportStatus::Failed { error } => {
            println!("  {} {}: {}", "✗".red(), target, error.red())
        }
    }
}
