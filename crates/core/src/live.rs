//! The published, read-only view of the running configuration.
//!
//! Request handlers and sync runs take an `Arc<LiveConfig>` snapshot and
//! keep it for their whole lifetime. The reload coordinator builds a
//! complete replacement and swaps it in; a published snapshot is never
//! modified.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::{AppConfig, ConfigWarning, LoggingConfig};
use crate::retry::RetryPolicy;
use crate::routing::RoutingTable;

/// One immutable generation of the configuration.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub routes: RoutingTable,
    pub logging: LoggingConfig,
    pub retry: RetryPolicy,
    pub auto_initialize: bool,
    /// `host:port` the HTTP server binds. Only read at startup.
    pub listen: String,
    pub loaded_at: DateTime<Utc>,
}

impl LiveConfig {
    /// Build a generation from a parsed (and validated) config.
    pub fn from_app_config(config: &AppConfig) -> (Self, Vec<ConfigWarning>) {
        let (mappings, mut warnings) = config.repo_mappings();
        let (routes, duplicates) = RoutingTable::build(mappings);
        warnings.extend(duplicates.into_iter().map(ConfigWarning::DuplicatePath));

        let live = Self {
            routes,
            logging: config.logging.clone(),
            retry: RetryPolicy::new(
                config.sync.retry_count,
                Duration::from_secs(config.sync.retry_delay_secs),
            ),
            auto_initialize: config.sync.auto_initialize,
            listen: config.server.socket_addr(),
            loaded_at: Utc::now(),
        };
        (live, warnings)
    }

    /// Replace the routing table, keeping everything else.
    pub fn with_routes(self, routes: RoutingTable) -> Self {
        Self { routes, ..self }
    }

    /// Settings that changed relative to `previous` but only take effect
    /// after a restart.
    pub fn restart_required_changes(&self, previous: &LiveConfig) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.listen != previous.listen {
            changed.push("server");
        }
        if self.logging.format != previous.logging.format {
            changed.push("logging.format");
        }
        if self.logging.output != previous.logging.output {
            changed.push("logging.output");
        }
        changed
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default()).0
    }
}

/// Shared handle to the current [`LiveConfig`].
///
/// Cloning the handle is cheap; all clones observe the same publications.
#[derive(Debug, Clone)]
pub struct LiveConfigHandle {
    current: Arc<RwLock<Arc<LiveConfig>>>,
}

impl LiveConfigHandle {
    pub fn new(initial: LiveConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    /// The generation current at the time of the call.
    pub fn snapshot(&self) -> Arc<LiveConfig> {
        // The guarded value is a single Arc, so a poisoned lock still
        // holds a complete generation.
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Make `next` current and return the generation it replaced.
    pub fn publish(&self, next: LiveConfig) -> Arc<LiveConfig> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RefSelector, RepoMapping};

    fn config_with_duplicate() -> AppConfig {
        AppConfig::parse(
            r#"
[sync]
retry_count = 4
retry_delay_secs = 7

[[repos]]
url = "git@host:org/app.git"
path = "/hooks/app"
directory = "/srv/app"
ref_kind = "banana"

[[repos]]
url = "git@host:org/app2.git"
path = "/hooks/app/"
directory = "/srv/app2"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_from_app_config_collects_warnings() {
        let (live, warnings) = LiveConfig::from_app_config(&config_with_duplicate());
        assert_eq!(live.routes.len(), 1);
        assert_eq!(live.retry, RetryPolicy::new(4, Duration::from_secs(7)));
        assert_eq!(live.listen, "0.0.0.0:8080");
        assert_eq!(warnings.len(), 2);
        assert!(matches!(warnings[0], ConfigWarning::UnknownRefKind { repo: 0, .. }));
        assert!(matches!(warnings[1], ConfigWarning::DuplicatePath(ref d) if d.dropped == 1));
    }

    #[test]
    fn test_snapshot_survives_publish() {
        let handle = LiveConfigHandle::new(LiveConfig::default());
        let before = handle.snapshot();
        assert!(before.routes.is_empty());

        let (routes, _) = RoutingTable::build(vec![RepoMapping::new(
            "git@host:org/app.git",
            "/hooks/app",
            "/srv/app",
            RefSelector::branch("main"),
        )]);
        let replaced = handle.publish(LiveConfig::default().with_routes(routes));

        assert!(Arc::ptr_eq(&before, &replaced));
        assert!(before.routes.is_empty());
        assert_eq!(handle.snapshot().routes.len(), 1);
        assert_eq!(handle.clone().snapshot().routes.len(), 1);
    }

    #[test]
    fn test_restart_required_changes() {
        let old = LiveConfig::default();
        let mut new = LiveConfig::default();
        assert!(new.restart_required_changes(&old).is_empty());

        new.listen = "127.0.0.1:9000".into();
        new.logging.level = "debug".into();
        new.logging.output = "/var/log/gwg.log".into();
        assert_eq!(
            new.restart_required_changes(&old),
            vec!["server", "logging.output"]
        );
    }
}
