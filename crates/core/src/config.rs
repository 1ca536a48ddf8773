//! TOML-based configuration for gwg.
//!
//! Secrets (webhook secrets, SSH key passphrases, HTTPS tokens) may be given
//! inline or as `_env` fields naming an environment variable; the latter are
//! resolved by [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::models::{Credentials, RefKind, RefSelector, RepoMapping};
use crate::routing::{normalize_path, DuplicatePath};

/// Ref name used when a repository does not name one.
pub const DEFAULT_REF_NAME: &str = "master";
/// Remote name used when a repository does not name one.
pub const DEFAULT_REMOTE: &str = "origin";
pub const DEFAULT_RETRY_COUNT: u32 = 1;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;

/// Served by the status API; webhook paths may not use it or anything below it.
pub const STATUS_PATH: &str = "/api/status";

/// Locations searched, in order, when no config path is given.
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["/etc/gwg/config.toml", "config.toml"];

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Fetch retry and initialization settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Values applied to repositories that leave a field unset.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Tracked repositories, in registration order.
    #[serde(default)]
    pub repos: Vec<RepoConfig>,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// HTTP listener configuration. Changes require a restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listen address (default `0.0.0.0`).
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Listen port (default 8080).
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_listen() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// `host:port`, bracketing IPv6 literals.
    pub fn socket_addr(&self) -> String {
        if self.listen.contains(':') && !self.listen.starts_with('[') {
            format!("[{}]:{}", self.listen, self.port)
        } else {
            format!("{}:{}", self.listen, self.port)
        }
    }
}

// ---------------------------------------------------------------------------
// Sync behaviour
// ---------------------------------------------------------------------------

/// Sync behaviour configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Total fetch attempts per run (default 1).
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Seconds between fetch attempts (default 2).
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Clone repositories whose directory is missing at startup and on
    /// reload, without waiting for a notification.
    #[serde(default = "default_true")]
    pub auto_initialize: bool,
}

fn default_retry_count() -> u32 {
    DEFAULT_RETRY_COUNT
}
fn default_retry_delay() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}
fn default_true() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_count: default_retry_count(),
            retry_delay_secs: default_retry_delay(),
            auto_initialize: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Log line format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration. Only `level` is applied on reload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive: trace, debug, info, warn, error, or an
    /// `EnvFilter` expression.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// `stdout`, `stderr`, or a file path.
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_output() -> String {
    "stdout".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            output: default_log_output(),
        }
    }
}

// ---------------------------------------------------------------------------
// Repository defaults
// ---------------------------------------------------------------------------

/// Fallbacks for per-repository fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DefaultsConfig {
    #[serde(default = "default_ref_kind")]
    pub ref_kind: String,

    #[serde(default = "default_ref_name")]
    pub ref_name: String,

    #[serde(default = "default_remote")]
    pub remote: String,
}

fn default_ref_kind() -> String {
    RefKind::Branch.to_string()
}
fn default_ref_name() -> String {
    DEFAULT_REF_NAME.into()
}
fn default_remote() -> String {
    DEFAULT_REMOTE.into()
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            ref_kind: default_ref_kind(),
            ref_name: default_ref_name(),
            remote: default_remote(),
        }
    }
}

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

/// One `[[repos]]` entry as written in the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Remote URL to clone and fetch from.
    pub url: String,

    /// Webhook path, e.g. `/hooks/app`.
    pub path: String,

    /// Local working-copy directory.
    pub directory: PathBuf,

    /// `branch` or `tag`.
    #[serde(default, alias = "refKind")]
    pub ref_kind: Option<String>,

    #[serde(default, alias = "refName")]
    pub ref_name: Option<String>,

    #[serde(default)]
    pub remote: Option<String>,

    /// Webhook secret, inline.
    #[serde(default)]
    pub secret: Option<String>,

    /// Environment variable holding the webhook secret.
    #[serde(default)]
    pub secret_env: Option<String>,

    /// Path to an SSH private key.
    #[serde(default, alias = "sshPrivKey")]
    pub ssh_key: Option<PathBuf>,

    /// SSH key passphrase, inline.
    #[serde(default, alias = "sshPassPhrase")]
    pub ssh_passphrase: Option<String>,

    /// Environment variable holding the SSH key passphrase.
    #[serde(default)]
    pub ssh_passphrase_env: Option<String>,

    /// Environment variable holding an HTTPS access token.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Marker file touched after every change.
    #[serde(default)]
    pub trigger: Option<PathBuf>,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

/// Non-fatal problem found while turning a config into mappings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A ref kind other than branch/tag; the default kind was used.
    UnknownRefKind { repo: usize, value: String },
    /// `[defaults].ref_kind` is neither branch nor tag; branch was used.
    UnknownDefaultRefKind { value: String },
    /// A later mapping reused an earlier mapping's webhook path.
    DuplicatePath(DuplicatePath),
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownRefKind { repo, value } => {
                write!(f, "repos[{}]: unknown ref kind '{}'", repo, value)
            }
            Self::UnknownDefaultRefKind { value } => {
                write!(f, "defaults: unknown ref kind '{}', using branch", value)
            }
            Self::DuplicatePath(d) => write!(
                f,
                "repos[{}]: webhook path '{}' already used by repos[{}]",
                d.dropped, d.path, d.kept
            ),
        }
    }
}

fn is_reserved_path(path: &str) -> bool {
    let path = normalize_path(path);
    path == STATUS_PATH
        || path
            .strip_prefix(STATUS_PATH)
            .is_some_and(|rest| rest.starts_with('/'))
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse TOML text.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        debug!(repos = config.repos.len(), "configuration parsed successfully");
        Ok(config)
    }

    /// First existing file from [`DEFAULT_CONFIG_PATHS`].
    pub fn find_default_path() -> Option<PathBuf> {
        DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.is_file())
    }

    /// Resolve all `*_env` fields from environment variables.
    ///
    /// A variable that is missing logs a warning and leaves the secret
    /// unset; an inline value is overridden when the variable is present.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        for (idx, repo) in self.repos.iter_mut().enumerate() {
            if let Some(ref env_name) = repo.secret_env {
                let field = format!("repos[{}].secret_env", idx);
                if let Some(val) = resolve_optional_env(env_name, &field) {
                    repo.secret = Some(val);
                }
            }
            if let Some(ref env_name) = repo.ssh_passphrase_env {
                let field = format!("repos[{}].ssh_passphrase_env", idx);
                if let Some(val) = resolve_optional_env(env_name, &field) {
                    repo.ssh_passphrase = Some(val);
                }
            }
            if let Some(ref env_name) = repo.token_env {
                let field = format!("repos[{}].token_env", idx);
                repo.token = resolve_optional_env(env_name, &field);
            }
        }
        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(invalid("server.port", "port must be > 0"));
        }
        if self.sync.retry_count == 0 {
            return Err(invalid("sync.retry_count", "retry count must be at least 1"));
        }
        if self.logging.level.trim().is_empty() {
            return Err(invalid("logging.level", "log level must not be empty"));
        }
        if self.defaults.ref_name.trim().is_empty() {
            return Err(invalid("defaults.ref_name", "default ref name must not be empty"));
        }
        if self.defaults.remote.trim().is_empty() {
            return Err(invalid("defaults.remote", "default remote must not be empty"));
        }

        for (idx, repo) in self.repos.iter().enumerate() {
            if repo.url.trim().is_empty() {
                return Err(invalid(&format!("repos[{}].url", idx), "URL must not be empty"));
            }
            if !repo.path.starts_with('/') {
                return Err(invalid(
                    &format!("repos[{}].path", idx),
                    "webhook path must start with '/'",
                ));
            }
            if is_reserved_path(repo.path.trim()) {
                return Err(invalid(
                    &format!("repos[{}].path", idx),
                    &format!("webhook path must not be under {}", STATUS_PATH),
                ));
            }
            if repo.directory.as_os_str().is_empty() {
                return Err(invalid(
                    &format!("repos[{}].directory", idx),
                    "directory must not be empty",
                ));
            }
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Turn the `[[repos]]` entries into mappings, applying `[defaults]`.
    ///
    /// Duplicate paths are not filtered here; see
    /// [`RoutingTable::build`](crate::routing::RoutingTable::build).
    pub fn repo_mappings(&self) -> (Vec<RepoMapping>, Vec<ConfigWarning>) {
        let mut warnings = Vec::new();
        let default_kind = match RefKind::parse(&self.defaults.ref_kind) {
            Some(kind) => kind,
            None => {
                warn!(value = %self.defaults.ref_kind, "unknown default ref kind, using branch");
                warnings.push(ConfigWarning::UnknownDefaultRefKind {
                    value: self.defaults.ref_kind.clone(),
                });
                RefKind::Branch
            }
        };

        let mappings = self
            .repos
            .iter()
            .enumerate()
            .map(|(idx, repo)| {
                let kind = match non_empty(&repo.ref_kind) {
                    None => default_kind,
                    Some(raw) => RefKind::parse(raw).unwrap_or_else(|| {
                        warn!(
                            repo = idx,
                            value = raw,
                            default = %default_kind,
                            "unknown ref kind, using default"
                        );
                        warnings.push(ConfigWarning::UnknownRefKind {
                            repo: idx,
                            value: raw.to_string(),
                        });
                        default_kind
                    }),
                };
                let name = non_empty(&repo.ref_name).unwrap_or(&self.defaults.ref_name);
                let remote = non_empty(&repo.remote).unwrap_or(&self.defaults.remote);

                RepoMapping {
                    url: repo.url.trim().to_string(),
                    path: normalize_path(repo.path.trim()).to_string(),
                    directory: repo.directory.clone(),
                    selector: RefSelector {
                        kind,
                        name: name.to_string(),
                    },
                    remote: remote.to_string(),
                    secret: non_empty(&repo.secret).map(str::to_string),
                    credentials: Credentials {
                        ssh_key: repo.ssh_key.clone(),
                        ssh_passphrase: non_empty(&repo.ssh_passphrase).map(str::to_string),
                        token: non_empty(&repo.token).map(str::to_string),
                    },
                    trigger: repo.trigger.clone(),
                }
            })
            .collect();

        (mappings, warnings)
    }

    /// One line per repository for startup banners.
    pub fn summary(&self) -> Vec<String> {
        self.repos
            .iter()
            .map(|r| format!("{} -> {} ({})", r.path, r.directory.display(), r.url))
            .collect()
    }
}

fn invalid(field: &str, detail: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        detail: detail.into(),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

/// Log the effective configuration at startup.
pub fn log_summary(config: &AppConfig) {
    info!(
        listen = %config.server.socket_addr(),
        repos = config.repos.len(),
        retry_count = config.sync.retry_count,
        retry_delay_secs = config.sync.retry_delay_secs,
        auto_initialize = config.sync.auto_initialize,
        "configuration loaded"
    );
}
