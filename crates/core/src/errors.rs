//! Error types for the gwg core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them for callers that want a single
//! error type.

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Trigger(#[from] TriggerError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from local Git (git2) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// The configured remote is not defined in the working copy.
    #[error("git remote '{0}' not found")]
    RemoteNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// The working copy handle was poisoned by a panicking thread.
    #[error("working copy at '{0}' is unusable after a panic")]
    Poisoned(String),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl GitError {
    /// Whether a fetch that failed with this error is worth repeating.
    ///
    /// Missing repositories and remotes are configuration problems; another
    /// attempt a few seconds later cannot fix them.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::RepositoryNotFound(_) | Self::RemoteNotFound(_) | Self::Poisoned(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Sync engine errors
// ---------------------------------------------------------------------------

/// Fatal failures of a single synchronization run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Cloning the remote into a fresh directory failed.
    #[error("initial clone into '{}' failed: {source}", .directory.display())]
    CloneFailed {
        directory: PathBuf,
        #[source]
        source: GitError,
    },

    /// The existing working copy could not be opened.
    #[error("cannot open working copy '{}': {source}", .directory.display())]
    OpenFailed {
        directory: PathBuf,
        #[source]
        source: GitError,
    },

    /// Every fetch attempt failed.
    #[error("fetch from '{remote}' failed after {attempts} attempt(s): {source}")]
    FetchFailed {
        remote: String,
        attempts: u32,
        #[source]
        source: GitError,
    },

    /// A ref could not be resolved to a commit.
    #[error("cannot resolve '{refname}': {source}")]
    ResolveFailed {
        refname: String,
        #[source]
        source: GitError,
    },

    /// The hard reset itself failed.
    #[error("hard reset to {target} failed: {source}")]
    ResetFailed {
        target: String,
        #[source]
        source: GitError,
    },

    /// HEAD does not point at the reset target after the reset.
    #[error("HEAD is {actual} after reset, expected {expected}")]
    HashMismatch { expected: String, actual: String },

    /// The blocking task running git work was cancelled or panicked.
    #[error("sync task aborted: {0}")]
    TaskAborted(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Webhook errors
// ---------------------------------------------------------------------------

/// Errors from validating and decoding an inbound notification.
#[derive(Debug, Error)]
pub enum HookError {
    /// The mapping has a secret but the request carried no signature.
    #[error("signature header missing")]
    SignatureMissing,

    /// The signature header is not in a recognized format.
    #[error("malformed signature: {0}")]
    SignatureMalformed(String),

    /// The signature does not match the payload.
    #[error("webhook signature verification failed")]
    SignatureInvalid,

    /// The body could not be decoded as a push payload.
    #[error("invalid webhook payload: {0}")]
    PayloadInvalid(String),
}

// ---------------------------------------------------------------------------
// Trigger errors
// ---------------------------------------------------------------------------

/// Errors from refreshing a trigger marker file.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// Updating the modification time of an existing marker failed.
    #[error("cannot touch trigger '{}': {source}", .path.display())]
    Touch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Creating a missing marker failed.
    #[error("cannot create trigger '{}': {source}", .path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Creation reported success but the marker is still absent.
    #[error("trigger '{}' does not exist after creation", .path.display())]
    Missing { path: PathBuf },
}
