//! ycache - maintenance tool for an on-disk cache directory
//!
//! Usage: `ycache <stats|sweep|clear|watch>`
//!
//! The directory and bounds come from the `YCACHE_*` environment variables
//! (see `CacheConfig::from_env`).

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ycache::cache::{CacheBackend, DiskCacheStore};
use ycache::{spawn_sweep_task, CacheConfig};

const USAGE: &str = "usage: ycache <stats|sweep|clear|watch>";

#[derive(Debug, Clone, Copy)]
enum Command {
    /// Print statistics as JSON
    Stats,
    /// Remove expired entries once
    Sweep,
    /// Remove every entry
    Clear,
    /// Sweep periodically until interrupted
    Watch,
}

impl Command {
    fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw {
            "stats" => Ok(Command::Stats),
            "sweep" => Ok(Command::Sweep),
            "clear" => Ok(Command::Clear),
            "watch" => Ok(Command::Watch),
            other => bail!("unknown command '{other}'\n{USAGE}"),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Defaults to "info" for this crate, can be overridden with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ycache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let Some(arg) = std::env::args().nth(1) else {
        bail!("{USAGE}");
    };
    let command = Command::parse(&arg)?;

    let config = CacheConfig::from_env();
    config.validate()?;
    let dir = config.require_cache_dir()?.clone();
    let store = DiskCacheStore::open(&config)
        .with_context(|| format!("opening cache directory {}", dir.display()))?;
    info!(dir = %dir.display(), ?command, "cache opened");

    match command {
        Command::Stats => {
            let stats = store.stats();
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Sweep => {
            let removed = store.sweep_expired()?;
            info!(removed, "sweep complete");
        }
        Command::Clear => {
            store.clear()?;
        }
        Command::Watch => {
            let store: Arc<dyn CacheBackend> = Arc::new(store);
            let handle = spawn_sweep_task(Arc::clone(&store), config.sweep_interval);
            shutdown_signal().await?;
            handle.abort();
            warn!("sweep task aborted");
            store.flush()?;
        }
    }

    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("installing Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("installing SIGTERM handler")?
            .recv()
            .await;
        Ok::<_, anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<anyhow::Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, shutting down...");
        }
        result = terminate => {
            result?;
            info!("Received SIGTERM, shutting down...");
        }
    }
    Ok(())
}
