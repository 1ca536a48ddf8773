//! Hot reload of the configuration file.
//!
//! Change signals come from a file watcher (see the daemon). Editors tend
//! to emit bursts of events for one save, so signals arriving within
//! [`RELOAD_DEBOUNCE`] of the last accepted reload are dropped.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, ConfigWarning};
use crate::errors::ConfigError;
use crate::live::{LiveConfig, LiveConfigHandle};
use crate::sync_engine::{decide, SyncAction, SyncEngine};

pub const RELOAD_DEBOUNCE: Duration = Duration::from_millis(250);

type PublishHook = Box<dyn Fn(&LiveConfig) + Send + Sync>;

/// What one change signal led to.
#[derive(Debug)]
pub enum ReloadOutcome {
    /// Dropped: too close to the previous reload.
    Debounced,
    /// A new generation is live.
    Published {
        repos: usize,
        warnings: Vec<ConfigWarning>,
        initializing: usize,
    },
    /// The file could not be loaded; the previous generation stays live.
    Failed(ConfigError),
}

/// Rebuilds and publishes the live configuration on change signals.
pub struct ReloadCoordinator {
    config_path: PathBuf,
    live: LiveConfigHandle,
    engine: Arc<SyncEngine>,
    debounce: Duration,
    last_reload: Option<Instant>,
    on_publish: Option<PublishHook>,
}

impl ReloadCoordinator {
    pub fn new(config_path: impl Into<PathBuf>, live: LiveConfigHandle, engine: Arc<SyncEngine>) -> Self {
        Self {
            config_path: config_path.into(),
            live,
            engine,
            debounce: RELOAD_DEBOUNCE,
            last_reload: None,
            on_publish: None,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Call `hook` with every newly published generation.
    pub fn on_publish<F>(mut self, hook: F) -> Self
    where
        F: Fn(&LiveConfig) + Send + Sync + 'static,
    {
        self.on_publish = Some(Box::new(hook));
        self
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Handle one change signal.
    pub fn handle_signal(&mut self) -> ReloadOutcome {
        let now = Instant::now();
        if let Some(last) = self.last_reload {
            if now.duration_since(last) < self.debounce {
                debug!("config change signal debounced");
                return ReloadOutcome::Debounced;
            }
        }
        self.last_reload = Some(now);

        info!(path = %self.config_path.display(), "reloading configuration");
        let (next, warnings) = match AppConfig::load_and_resolve(&self.config_path) {
            Ok(config) => LiveConfig::from_app_config(&config),
            Err(e) => {
                error!(error = %e, "configuration reload failed, keeping previous configuration");
                return ReloadOutcome::Failed(e);
            }
        };
        for warning in &warnings {
            warn!(%warning, "configuration warning");
        }

        let initializing = if next.auto_initialize {
            auto_initialize(&self.engine, &next)
        } else {
            0
        };
        let repos = next.routes.len();

        let previous = self.live.publish(next);
        let current = self.live.snapshot();
        for setting in current.restart_required_changes(&previous) {
            warn!(setting, "setting changed, restart required to apply it");
        }
        if let Some(hook) = &self.on_publish {
            hook(&current);
        }

        info!(repos, initializing, "configuration reloaded");
        ReloadOutcome::Published {
            repos,
            warnings,
            initializing,
        }
    }

    /// Consume change signals until the sender side is dropped.
    pub async fn run(mut self, mut signals: mpsc::Receiver<()>) {
        while signals.recv().await.is_some() {
            self.handle_signal();
        }
        debug!("reload coordinator stopped");
    }
}

/// Submit an Initialize run for every mapping whose directory is missing.
/// Returns how many were submitted.
pub fn auto_initialize(engine: &Arc<SyncEngine>, live: &LiveConfig) -> usize {
    let mut submitted = 0;
    for mapping in live.routes.iter() {
        if decide(&mapping.directory) == SyncAction::Initialize {
            info!(
                repo = %mapping.name(),
                directory = %mapping.directory.display(),
                "working copy missing, initializing"
            );
            engine.submit(Arc::clone(mapping), live.retry);
            submitted += 1;
        }
    }
    submitted
}
