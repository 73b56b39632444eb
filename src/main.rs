use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shiftboard::client::{ClientConfig, LoggingCache, SubscriptionManager};
use shiftboard::config::{Config, LoggingConfig, RelayBackend};
use shiftboard::metrics;
use shiftboard::server::ShiftboardServer;
use shiftboard::storage::{InMemoryStore, Store};

#[derive(Parser)]
#[command(
    name = "shiftboard",
    version,
    about = "Volunteer shift scheduling server with live updates",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "SHIFTBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json, pretty); overrides the configuration
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Address to bind (e.g. 0.0.0.0:8080)
        #[arg(short, long)]
        bind: Option<String>,

        /// JSON fixture to seed the in-memory store with
        #[arg(long)]
        seed: Option<PathBuf>,

        /// Relay backend (memory, redis)
        #[arg(long)]
        relay: Option<String>,
    },

    /// Validate configuration and print the effective values
    CheckConfig,

    /// Follow a server's realtime stream and log cache invalidations
    Watch {
        /// Server base URL
        #[arg(short, long, default_value = "http://localhost:8080")]
        url: String,

        /// Only follow one event
        #[arg(short, long)]
        event: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    setup_tracing(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Serve { bind, seed, relay } => {
            if let Some(bind) = bind {
                config.server.bind_address = bind
                    .parse()
                    .with_context(|| format!("Invalid bind address: {bind}"))?;
            }
            if let Some(relay) = relay {
                config.broker.relay.backend = relay.parse()?;
            }
            serve(config, seed.as_deref()).await?;
        }
        Commands::CheckConfig => check_config(&config)?,
        Commands::Watch { url, event } => watch(url, event).await?,
    }

    Ok(())
}

fn setup_tracing(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("shiftboard=debug,tower_http=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(format!("shiftboard={},warn", logging.level))
        })
    };

    match logging.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    Ok(())
}

async fn serve(config: Config, seed: Option<&Path>) -> shiftboard::error::Result<()> {
    config.validate()?;

    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }

    let store: Arc<dyn Store> = match seed {
        Some(path) => Arc::new(InMemoryStore::load_fixture(path).await?),
        None => {
            tracing::warn!("No seed fixture given, starting with an empty store");
            Arc::new(InMemoryStore::new())
        }
    };

    if config.broker.relay.backend == RelayBackend::Memory {
        tracing::info!("Using in-process relay; realtime events stay on this instance");
    }

    let server = ShiftboardServer::new(config, store).await?;
    println!("{}", server.info().display());

    server
        .start_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    Ok(())
}

fn check_config(config: &Config) -> Result<()> {
    config.validate()?;
    println!("Configuration OK");
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn watch(url: String, event: Option<String>) -> shiftboard::error::Result<()> {
    let mut client_config = ClientConfig::new(url);
    if let Some(slug) = event {
        client_config = client_config.for_event(slug);
    }

    let mut manager = SubscriptionManager::new(client_config, Arc::new(LoggingCache))?;
    let mut state = manager.state();

    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = state.borrow_and_update().clone();
            tracing::info!(state = ?current, "Connection state changed");
        }
    });

    manager
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
