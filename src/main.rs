use std::io;
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser};
use colored::*;
use tracing_subscriber::EnvFilter;

use llc_bridge::adapter::{bridge_id, message_handler, NormalizedMessage};
use llc_bridge::cli::{animate_interval, resolve_config, Args, Command};
use llc_bridge::composer::{self, ComposedApi};
use llc_bridge::error::{BridgeError, Result};
use llc_bridge::llc::{BridgeClient, ReplyTarget, SessionState};

/// How long a one-shot command waits for the socket to open.
const OPEN_TIMEOUT: Duration = Duration::from_secs(15);

fn print_message(msg: &NormalizedMessage) {
    let reply = msg
        .message_reply
        .as_deref()
        .map(|r| format!(" {} {}", "↪".dimmed(), r.sender_id.dimmed()))
        .unwrap_or_default();
    println!(
        "{} {}{} {}",
        msg.sender_id.cyan().bold(),
        msg.message_id.dimmed(),
        reply,
        msg.body
    );
}

/// Start the session and wait until it is open.
async fn open_session(api: &ComposedApi) -> Result<()> {
    let client: &Arc<BridgeClient> = api.client();
    let mut state = client.subscribe_state();
    client.start_listening(None).await;

    let wait = async {
        loop {
            match *state.borrow_and_update() {
                SessionState::Open => return Ok(()),
                SessionState::Disconnected => {
                    return Err(BridgeError::Connect {
                        url: client.config().base_url.clone(),
                        detail: "session did not open".into(),
                    })
                }
                _ => {}
            }
            if state.changed().await.is_err() {
                return Err(BridgeError::ConnectionClosed);
            }
        }
    };
    tokio::time::timeout(OPEN_TIMEOUT, wait)
        .await
        .map_err(|_| BridgeError::Connect {
            url: client.config().base_url.clone(),
            detail: format!("not open after {OPEN_TIMEOUT:?}"),
        })?
}

async fn run(args: Args) -> Result<()> {
    if let Command::Completions { shell } = &args.command {
        clap_complete::generate(*shell, &mut Args::command(), "llc-bridge", &mut io::stdout());
        return Ok(());
    }

    let config = resolve_config(&args)?;
    let api = composer::login(config, None).await?.api;
    let client = Arc::clone(api.client());

    match args.command {
        Command::Listen => {
            api.listen(message_handler(|msg| async move { print_message(&msg) }))
                .await?;
            eprintln!("{} as {}", "Listening".green().bold(), client.username());
            tokio::signal::ctrl_c()
                .await
                .map_err(|e| BridgeError::InvalidArgument(format!("signal handler: {e}")))?;
            client.end_listening();
        }
        Command::Send { to, text } => {
            open_session(&api).await?;
            let receipt = api
                .adapter()
                .send_message(text, &bridge_id(&to), None)
                .await?;
            println!("{}", serde_json::to_string_pretty(&receipt.into_value()?)?);
            client.end_listening();
        }
        Command::Animate { to, text, interval } => {
            open_session(&api).await?;
            let info = client
                .animate(&text, animate_interval(interval), Some(ReplyTarget::user(to)))
                .await?;
            println!(
                "{} {}",
                "Animated".green().bold(),
                info.message_id.unwrap_or_default().dimmed()
            );
            client.end_listening();
        }
        Command::Token => {
            println!("{}", client.ensure_token().await?);
        }
        Command::Prefixes => {
            let prefixes = client.command_prefixes().await;
            println!("{}", serde_json::to_string_pretty(&prefixes)?);
        }
        Command::Completions { .. } => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
