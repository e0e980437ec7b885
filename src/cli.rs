use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};

#[derive(Parser, Debug)]
#[command(name = "llc-bridge")]
#[command(version)]
#[command(about = "Chat-bot framework bridge for the LLC real-time chat service")]
pub struct Args {
    /// Bot username to authenticate as (env: LLC_USERNAME)
    #[arg(long, short, global = true)]
    pub username: Option<String>,

    /// Base URL of the LLC deployment (env: LLC_URL)
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Use this access token instead of requesting one (env: LLC_TOKEN)
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Connect to a local server at wss://localhost:<port>/ws
    #[arg(long, global = true)]
    pub local: bool,

    /// Port for --local
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// TOML config file; flags and environment override it
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print every incoming message until interrupted
    Listen,
    /// Send one message to a user and print the echo
    Send {
        /// Recipient username
        to: String,
        text: String,
    },
    /// Type a message out one character at a time
    Animate {
        /// Recipient username
        to: String,
        text: String,
        /// Milliseconds between characters
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Request and print an access token
    Token,
    /// List registered command prefixes
    Prefixes,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Command {
    /// Whether the command talks to the service at all.
    pub fn needs_session(&self) -> bool {
        !matches!(self, Command::Completions { .. })
    }
}

/// Build the session config: file (or defaults), then environment, then flags.
pub fn resolve_config(args: &Args) -> Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::new(String::new()),
    };
    config.apply_env()?;

    if let Some(username) = &args.username {
        config.username = username.clone();
    }
    if let Some(url) = &args.url {
        config.base_url = url.clone();
    }
    if let Some(token) = &args.token {
        config.token = Some(token.clone());
    }
    if args.local {
        config.local = true;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    if config.username.is_empty() {
        return Err(BridgeError::Config(
            "no username: pass --username, set LLC_USERNAME, or use --config".into(),
        ));
    }
    Ok(config)
}

/// `--interval` in milliseconds, when given.
pub fn animate_interval(interval: Option<u64>) -> Option<Duration> {
    interval.map(Duration::from_millis)
}
