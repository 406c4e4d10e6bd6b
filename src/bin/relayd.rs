//! Relay Daemon - Authenticated WebSocket push hub
//!
//! Accepts WebSocket clients, authenticates them, and fans out events
//! published through the admin API to the connected users.
//!
//! # Usage
//!
//! ```bash
//! # Start the hub with defaults (127.0.0.1:8080)
//! relayd start
//!
//! # Start with a config file and a different listen address
//! relayd --config relay.toml start --listen 0.0.0.0:9000
//!
//! # Print the effective configuration
//! relayd print-config
//!
//! # Issue a development JWT for user 42 (requires a JWT secret)
//! relayd issue-token 42 --ttl-secs 3600
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use relay_core::UserId;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use relayd::auth::JwtVerifier;
use relayd::server::RelayServer;
use relayd::{Hub, RelayConfig};

/// relayd - authenticated WebSocket push hub
#[derive(Parser, Debug)]
#[command(name = "relayd", version, about)]
struct Args {
    /// Path to a TOML config file
    #[arg(long, global = true, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the hub (default)
    Start {
        /// Address to listen on, overriding config and RELAY_LISTEN
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Emit logs as JSON lines
        #[arg(long, env = "RELAY_JSON_LOGS")]
        json_logs: bool,
    },
    /// Print the effective configuration as TOML and exit
    PrintConfig,
    /// Sign a JWT for a user with the configured secret
    IssueToken {
        /// Numeric user id (non-zero)
        user_id: u64,

        /// Token lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl_secs: u64,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        listen: None,
        json_logs: false,
    });

    let mut config = RelayConfig::load(args.config.as_deref()).context("Failed to load config")?;

    match command {
        Command::Start { listen, json_logs } => {
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            init_logging(json_logs)?;
            run_daemon(config)
        }
        Command::PrintConfig => {
            print!("{}", config.to_toml().context("Failed to render config")?);
            Ok(())
        }
        Command::IssueToken { user_id, ttl_secs } => {
            let Some(secret) = config.auth.jwt_secret.as_deref().filter(|s| !s.is_empty()) else {
                bail!("No JWT secret configured (set auth.jwt_secret or RELAY_JWT_SECRET)");
            };
            let user_id = UserId::new(user_id).context("Invalid user id")?;
            let token = JwtVerifier::new(secret.as_bytes())
                .issue_token(user_id, Duration::from_secs(ttl_secs))
                .context("Failed to sign token")?;
            println!("{token}");
            Ok(())
        }
    }
}

fn init_logging(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("relayd=info".parse()?)
        .add_directive("relay_core=info".parse()?)
        .add_directive("relay_protocol=info".parse()?);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn run_daemon(config: RelayConfig) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "Relay daemon starting"
    );

    if config.auth.tokens.is_empty() && config.auth.jwt_secret.is_none() {
        warn!("No credential verifier configured; every client will fail authentication");
    }
    if config.auth.admin_token.is_none() {
        warn!("No admin token configured; the broadcast endpoint is open");
    }

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let hub = Hub::from_config(&config).context("Failed to build hub")?;
    info!(
        max_connections = config.hub.max_connections,
        mailbox_capacity = config.hub.mailbox_capacity,
        "Hub started"
    );

    let server = RelayServer::new(
        config.server.listen,
        hub,
        config.auth.admin_token.clone(),
        cancel_token,
    );

    info!(listen = %server.listen_addr(), "Starting server");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Relay daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
