//! gwg daemon entry point.
//!
//! Loads configuration, initializes logging and the sync engine, starts the
//! config watcher and web server, and handles graceful shutdown.

mod logging;
mod signals;
mod watcher;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use gwg_core::config::{self, AppConfig, DEFAULT_CONFIG_PATHS};
use gwg_core::dispatch::Dispatcher;
use gwg_core::git::Git2Vcs;
use gwg_core::live::{LiveConfig, LiveConfigHandle};
use gwg_core::reload::{auto_initialize, ReloadCoordinator};
use gwg_core::sync_engine::SyncEngine;
use gwg_web::WebServer;

/// How long in-flight syncs may run after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// Webhook-driven git working-copy mirror.
#[derive(Parser, Debug)]
#[command(
    name = "gwg",
    version,
    about = "Keeps local working copies in sync with remote git repositories"
)]
struct Args {
    /// Path to the TOML configuration file (default: /etc/gwg/config.toml,
    /// then ./config.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Validate the configuration, print a summary and exit.
    #[arg(long)]
    check: bool,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => AppConfig::find_default_path().with_context(|| {
            format!(
                "no configuration file found (searched {})",
                DEFAULT_CONFIG_PATHS.join(", ")
            )
        })?,
    };

    let config =
        AppConfig::load_and_resolve(&config_path).context("failed to load configuration")?;

    if args.check {
        return check(&config_path, &config);
    }

    let (level_handle, _log_guard) = logging::init(&config.logging, args.log_level.as_deref())?;

    // Startup banner
    info!("========================================");
    info!("  gwg v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", config_path.display());
    info!("Web listen    : {}", config.server.socket_addr());
    info!("Repositories  : {}", config.repos.len());
    for line in config.summary() {
        info!("  {}", line);
    }
    info!("========================================");
    config::log_summary(&config);

    let (initial, warnings) = LiveConfig::from_app_config(&config);
    for warning in &warnings {
        warn!(%warning, "configuration warning");
    }
    let live = LiveConfigHandle::new(initial);
    let engine = SyncEngine::new(Arc::new(Git2Vcs));

    let snapshot = live.snapshot();
    if snapshot.auto_initialize {
        let submitted = auto_initialize(&engine, &snapshot);
        info!(submitted, "startup initialization submitted");
    }

    // Config watcher -> reload coordinator
    let (reload_tx, reload_rx) = tokio::sync::mpsc::channel::<()>(16);
    let config_watcher = watcher::watch_config(&config_path, reload_tx)
        .context("failed to watch configuration file")?;

    let cli_level = args.log_level.clone();
    let coordinator = ReloadCoordinator::new(&config_path, live.clone(), Arc::clone(&engine))
        .on_publish(move |cfg| {
            if cli_level.is_none() {
                logging::set_level(&level_handle, &cfg.logging.level);
            }
        });
    let reload_handle = tokio::spawn(coordinator.run(reload_rx));

    // Web server runs until a shutdown signal arrives.
    let server = WebServer::new(Dispatcher::new(live.clone(), Arc::clone(&engine)));
    server
        .start(&snapshot.listen, signals::wait_for_shutdown())
        .await
        .context("web server failed")?;

    info!("Shutdown signal received, stopping...");

    // Dropping the watcher closes the reload channel.
    drop(config_watcher);
    if let Err(e) = reload_handle.await {
        warn!("reload task error: {}", e);
    }

    if engine.wait_idle(SHUTDOWN_GRACE).await {
        info!("in-flight syncs finished");
    } else {
        warn!(
            "syncs still running after {}s, forcing shutdown",
            SHUTDOWN_GRACE.as_secs()
        );
    }

    info!("gwg stopped.");
    Ok(())
}

/// `--check`: report what the configuration would do.
fn check(config_path: &std::path::Path, config: &AppConfig) -> Result<()> {
    let (live, warnings) = LiveConfig::from_app_config(config);
    println!("configuration OK: {}", config_path.display());
    println!("  listen          : {}", live.listen);
    println!(
        "  retry           : {} attempt(s), {}s apart",
        live.retry.max_attempts,
        live.retry.delay.as_secs()
    );
    println!("  auto-initialize : {}", live.auto_initialize);
    println!("  repositories    : {}", live.routes.len());
    for mapping in live.routes.iter() {
        println!(
            "    {} -> {} ({} {}, remote {})",
            mapping.path,
            mapping.directory.display(),
            mapping.name(),
            mapping.selector,
            mapping.remote
        );
    }
    for warning in &warnings {
        println!("  warning: {}", warning);
    }
    Ok(())
}
