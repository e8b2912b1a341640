//! TeamCity plug entry point.
//!
//! Keeps a WebSocket connection to a job dispatcher open, queues TeamCity
//! builds when asked to launch a plan, and reports build status back.
//!
//! # Usage
//!
//! ```text
//! teamcity-plug --server <URL> --config <FILE> --apikey <KEY> --name <NAME>
//!
//! Options:
//!   --server         <URL>   Dispatcher WebSocket URL (ws:// or wss://)
//!   --config         <FILE>  TOML file with TeamCity URL and credentials
//!   --apikey         <KEY>   Key sent in the login message
//!   --name           <NAME>  Name this plug registers under
//!   --retry-interval <SECS>  Reconnect delay in seconds [default: 5]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                       | Flag               |
//! |--------------------------------|--------------------|
//! | `TEAMCITY_PLUG_SERVER`         | `--server`         |
//! | `TEAMCITY_PLUG_CONFIG`         | `--config`         |
//! | `TEAMCITY_PLUG_API_KEY`        | `--apikey`         |
//! | `TEAMCITY_PLUG_NAME`           | `--name`           |
//! | `TEAMCITY_PLUG_RETRY_INTERVAL` | `--retry-interval` |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::builder::NonEmptyStringValueParser;
use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use teamcity_plug::application::RequestDispatcher;
use teamcity_plug::domain::{DispatcherConfig, PlugConfig};
use teamcity_plug::infrastructure::{load_config, ConnectionManager, TeamCityClient};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Bridge between a WebSocket job dispatcher and the TeamCity build queue.
#[derive(Debug, Parser)]
#[command(name = "teamcity-plug", version)]
struct Cli {
    /// Dispatcher WebSocket URL (`ws://` or `wss://`).
    #[arg(long, env = "TEAMCITY_PLUG_SERVER", value_parser = NonEmptyStringValueParser::new())]
    server: String,

    /// Path of the TOML configuration file.
    #[arg(long, env = "TEAMCITY_PLUG_CONFIG")]
    config: PathBuf,

    /// API key sent to the dispatcher in the login message.
    #[arg(
        long,
        env = "TEAMCITY_PLUG_API_KEY",
        hide_env_values = true,
        value_parser = NonEmptyStringValueParser::new()
    )]
    apikey: String,

    /// Name this plug registers under.
    #[arg(long, env = "TEAMCITY_PLUG_NAME", value_parser = NonEmptyStringValueParser::new())]
    name: String,

    /// Seconds to wait before retrying a failed or dropped connection.
    #[arg(
        long,
        env = "TEAMCITY_PLUG_RETRY_INTERVAL",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    retry_interval: u64,
}

impl Cli {
    /// Converts the parsed arguments into a [`PlugConfig`], reading the
    /// configuration file on the way.
    ///
    /// # Errors
    ///
    /// Returns an error if `--server` is not a WebSocket URL or if the
    /// configuration file cannot be loaded.
    fn into_plug_config(self) -> anyhow::Result<PlugConfig> {
        let scheme = self
            .server
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase());
        if !matches!(scheme.as_deref(), Some("ws" | "wss")) {
            anyhow::bail!(
                "invalid dispatcher URL '{}': expected ws:// or wss://",
                self.server
            );
        }

        let teamcity = load_config(&self.config)
            .with_context(|| format!("failed to load config {}", self.config.display()))?;

        let mut dispatcher = DispatcherConfig::new(self.server, self.name, self.apikey);
        dispatcher.retry_interval = Duration::from_secs(self.retry_interval);

        Ok(PlugConfig {
            dispatcher,
            teamcity,
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_plug_config()?;

    info!(
        "teamcity-plug {} starting as {:?}",
        env!("CARGO_PKG_VERSION"),
        config.dispatcher.plug_name
    );
    debug!("{config:?}");

    let client =
        TeamCityClient::new(&config.teamcity).context("failed to create TeamCity client")?;
    if client.check_connection().await {
        info!("TeamCity reachable at {}", client.base_url());
    } else {
        // Builds will fail until TeamCity comes back, but the dispatcher
        // connection is still useful for status replies.
        error!(
            "TeamCity at {} is not reachable; continuing anyway",
            client.base_url()
        );
    }

    let dispatcher = RequestDispatcher::new(Arc::new(client));
    let manager = Arc::new(
        ConnectionManager::new(config.dispatcher, dispatcher)
            .context("failed to set up dispatcher connection")?,
    );

    let manager_ctrl_c = Arc::clone(&manager);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                manager_ctrl_c.shutdown();
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    manager.run().await;

    info!("teamcity-plug stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
