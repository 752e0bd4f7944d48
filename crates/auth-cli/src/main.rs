//! Shopfront auth CLI - drive the progressive login flow from a terminal.

mod commands;
mod output;

use anyhow::Result;
use auth_flow::AuthManager;
use clap::{Parser, Subcommand};
use client_core::{Config, Paths};
use session_store::{FileStorage, SessionStore};
use std::sync::Arc;

/// Shopfront auth CLI.
#[derive(Parser)]
#[command(name = "shopfront-auth")]
#[command(about = "Shopfront CLI for authentication and session management")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Login with the progressive email → password → OTP flow
    Login {
        /// Use the legacy single-shot email/password login
        #[arg(long)]
        legacy: bool,
    },

    /// Create an account (implies login)
    Register,

    /// Logout and clear the local session
    Logout,

    /// Check authentication status
    Status,

    /// Show the logged-in identity
    Whoami,

    /// Force a session token refresh
    Refresh,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    client_core::init_logging(&cli.log_level);

    let paths = Paths::new()?;
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;

    let storage = FileStorage::open(paths.session_file())?;
    let store = Arc::new(SessionStore::new(Box::new(storage)));
    let manager = AuthManager::from_config(&config, store)?;

    match cli.command {
        Commands::Login { legacy } => commands::login(&manager, legacy, &cli.format).await,
        Commands::Register => commands::register(&manager, &cli.format).await,
        Commands::Logout => commands::logout(&manager, &cli.format).await,
        Commands::Status => commands::status(&manager, &cli.format).await,
        Commands::Whoami => commands::whoami(&manager, &cli.format).await,
        Commands::Refresh => commands::refresh(&manager, &cli.format).await,
    }
}
