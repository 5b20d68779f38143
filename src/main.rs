use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use oi_archive::config::Config;
use oi_archive::coordinator::{ClientConfig, CoordinatorClient, CoordinatorServer};
use oi_archive::error::{ArchiveErrorTrait, Error};
use oi_archive::plugin::{DirectoryPlugin, PluginRuntime};
use oi_archive::store::StoreConfig;
use oi_archive::utils::format_duration;

#[derive(Parser)]
#[command(
    name = "oi-archive",
    version,
    about = "Coordinator and plugin runtime for online-judge problem-set crawlers",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator server
    Serve {
        /// Address to bind
        #[arg(short, long)]
        addr: Option<String>,

        /// Persist batches in this SQLite database instead of memory
        #[arg(long)]
        sqlite: Option<PathBuf>,

        /// Plugin id to run in debug (dry-run) mode, repeatable
        #[arg(long = "debug-plugin")]
        debug_plugins: Vec<String>,

        /// Run every plugin in debug mode
        #[arg(long, default_value = "false")]
        debug_all: bool,
    },

    /// Publish a local directory as a plugin's file set
    Push {
        /// Directory to mirror
        #[arg(short, long)]
        dir: PathBuf,

        /// Plugin id
        #[arg(long)]
        id: Option<String>,

        /// Plugin display name
        #[arg(long)]
        name: Option<String>,

        /// Coordinator base URL
        #[arg(long)]
        coordinator: Option<String>,

        /// Repeat every N seconds until interrupted
        #[arg(long)]
        interval: Option<u64>,

        /// Deregister when done
        #[arg(long, default_value = "false")]
        deregister: bool,
    },

    /// Show coordinator health and registered plugins
    Status {
        /// Coordinator base URL
        #[arg(long)]
        coordinator: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    // Initialize tracing/logging
    setup_tracing(&config.logging.format, &config.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Serve {
            addr,
            sqlite,
            debug_plugins,
            debug_all,
        } => {
            if let Some(addr) = addr {
                config.coordinator.bind_address = addr
                    .parse()
                    .with_context(|| format!("Invalid bind address: {addr}"))?;
            }
            if let Some(path) = sqlite {
                config.coordinator.store = StoreConfig::Sqlite { path };
            }
            config.coordinator.debug_plugins.extend(debug_plugins);
            config.coordinator.debug_all |= debug_all;

            serve(config).await?;
        }

        Commands::Push {
            dir,
            id,
            name,
            coordinator,
            interval,
            deregister,
        } => {
            if let Some(id) = id {
                config.plugin.id = id;
            }
            if let Some(name) = name {
                config.plugin.name = name;
            } else if config.plugin.name.is_empty() {
                config.plugin.name = config.plugin.id.clone();
            }
            if let Some(url) = coordinator {
                config.plugin.coordinator_url = url;
            }
            if let Some(secs) = interval {
                config.plugin.update_interval_secs = secs;
            }
            config.plugin.deregister_on_stop |= deregister;

            tracing::info!(
                plugin_id = %config.plugin.id,
                dir = %dir.display(),
                "Starting push command"
            );
            push(config, dir).await.map_err(report)?;
        }

        Commands::Status { coordinator } => {
            let url = coordinator.unwrap_or(config.plugin.coordinator_url);
            status(url).await.map_err(report)?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("oi_archive=debug,tower_http=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("oi_archive={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    config.validate()?;

    if let Err(e) = oi_archive::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    let server = CoordinatorServer::new(config.coordinator)?;
    println!("{}", server.info().display());

    server
        .start_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

/// Log a command failure with its classification before exiting
fn report(err: Error) -> anyhow::Error {
    tracing::error!(
        category = %err.category(),
        recoverable = err.is_recoverable(),
        error = %err,
        "Command failed"
    );
    if err.is_recoverable() {
        eprintln!("The failure looks transient ({}), retrying later may succeed", err.category());
    }
    err.into()
}

async fn push(config: Config, dir: PathBuf) -> oi_archive::error::Result<()> {
    let runtime_config = config.plugin.runtime_config()?;
    let mut runtime = PluginRuntime::new(runtime_config, DirectoryPlugin::new(dir))?;

    let shutdown = runtime.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            shutdown.shutdown();
        }
    });

    let summary = runtime.run().await?;

    println!("Push finished");
    println!("  Cycles: {}", summary.cycles);
    println!("  Submitted: {}", summary.submitted);
    println!("  Skipped: {}", summary.skipped);
    println!("  Failed: {}", summary.failed);
    println!("  Files applied: {}", summary.files_applied);
    if let Some(debug) = summary.debug_mode {
        println!("  Mode: {}", if debug { "debug (dry run)" } else { "production" });
    }
    Ok(())
}

async fn status(url: String) -> oi_archive::error::Result<()> {
    let client = CoordinatorClient::new(ClientConfig::new(url).with_timeout(Duration::from_secs(10)))?;

    let health = client.health_check().await.map_err(|e| {
        Error::with_source(format!("Coordinator at {} is unreachable", client.coordinator_url()), e)
    })?;
    println!(
        "Coordinator {} (v{}, up {})",
        if health.healthy { "healthy" } else { "unhealthy" },
        health.version,
        format_duration(Duration::from_secs(health.uptime_secs))
    );

    let plugins = client.list_plugins().await?;
    if plugins.is_empty() {
        println!("No registered plugins");
        return Ok(());
    }

    println!("{:<24} {:<12} {:>8} {:>10}", "PLUGIN", "MODE", "UPDATES", "FILES");
    for state in plugins {
        println!(
            "{:<24} {:<12} {:>8} {:>10}",
            state.info.id(),
            if state.debug_mode { "debug" } else { "production" },
            state.updates_applied,
            state.files_applied
        );
    }
    Ok(())
}
