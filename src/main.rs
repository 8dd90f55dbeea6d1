//! Raven CLI - terminal client for Raven chat
//!
//! Reads and follows channels of a Raven (Frappe) site from the terminal.

mod api;
mod auth;
mod config;
mod models;
mod realtime;
mod stream;
mod tui;

use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "raven-cli")]
#[command(about = "Terminal client for Raven chat", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Store and verify API credentials for a site
    Login {
        /// Site URL, e.g. https://chat.example.com
        #[arg(long)]
        site: String,

        /// API key (User settings > API Access on the site)
        #[arg(long)]
        api_key: String,

        /// API secret
        #[arg(long)]
        api_secret: String,
    },

    /// Log out and clear stored credentials
    Logout,

    /// Show current authentication status
    Status,

    /// Show current user info (verify auth works)
    Whoami,

    /// List channels and direct messages
    Channels {
        /// Include archived channels
        #[arg(short, long)]
        archived: bool,
    },

    /// List members of a channel
    Members {
        /// Channel id or name (from `channels` output)
        channel: String,
    },

    /// Print messages from a channel
    Read {
        /// Channel id or name (from `channels` output)
        channel: String,

        /// Messages per page (defaults to the configured page size)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Additional older pages to load
        #[arg(short, long, default_value = "0")]
        older: usize,

        /// Show the messages around this message id instead of the latest
        #[arg(short, long)]
        around: Option<String>,
    },

    /// Follow a channel live (Ctrl-C to stop)
    Watch {
        /// Channel id or name (from `channels` output)
        channel: String,
    },

    /// Launch the terminal user interface for a channel
    Tui {
        /// Channel id or name (from `channels` output)
        channel: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if matches!(cli.command, Commands::Tui { .. }) {
        // Keep log lines off the alternate screen.
        let path = config::Config::log_path()?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    match cli.command {
        Commands::Login {
            site,
            api_key,
            api_secret,
        } => {
            tracing::info!("Starting login...");
            auth::login(&site, &api_key, &api_secret).await?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            auth::logout().await?;
        }
        Commands::Status => {
            auth::status().await?;
        }
        Commands::Whoami => {
            api::whoami().await?;
        }
        Commands::Channels { archived } => {
            tracing::info!("Fetching channels...");
            api::list_channels(archived).await?;
        }
        Commands::Members { channel } => {
            api::list_members(&channel).await?;
        }
        Commands::Read {
            channel,
            limit,
            older,
            around,
        } => {
            api::read_messages(&channel, limit, older, around.as_deref()).await?;
        }
        Commands::Watch { channel } => {
            api::watch(&channel).await?;
        }
        Commands::Tui { channel } => {
            tui::run(&channel).await?;
        }
    }

    Ok(())
}
