//! Working-copy synchronization engine.
//!
//! Each accepted notification becomes one run of the state machine:
//!
//! 1. **Decide**: a missing local directory is initialized, an existing one
//!    is updated.
//! 2. **Initialize**: clone only the selected ref and check it out.
//! 3. **Update**: fetch (with retry), compare the tracking ref with `HEAD`,
//!    hard-reset when they differ and verify `HEAD` afterwards.
//!
//! Runs on the same directory never overlap. While one is in flight, at most
//! one further run waits; a newer submission replaces the waiting one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::{GitError, SyncError};
use crate::git::{CloneRequest, Vcs, WorkingCopy};
use crate::models::{short_sha, FetchStatus, RepoMapping, SyncOutcome};
use crate::retry::{fetch_with_retry, RetryPolicy};
use crate::trigger::ensure_marker_fresh;

// ---------------------------------------------------------------------------
// Decide
// ---------------------------------------------------------------------------

/// What a run will do with a working copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Initialize,
    Update,
}

/// Choose the action from the directory alone. A missing or empty directory
/// is cloned into; anything else goes to Update, where opening a directory
/// that is not a repository fails.
pub fn decide(directory: &Path) -> SyncAction {
    if !directory.exists() || is_empty_dir(directory) {
        SyncAction::Initialize
    } else {
        SyncAction::Update
    }
}

fn is_empty_dir(directory: &Path) -> bool {
    std::fs::read_dir(directory)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Per-directory bookkeeping
// ---------------------------------------------------------------------------

/// Result of handing a mapping to [`SyncEngine::submit`].
#[derive(Debug)]
pub enum Submission {
    /// A worker was started; it finishes after the last queued run.
    Started(JoinHandle<()>),
    /// A run is already in flight; this one will follow it.
    Coalesced,
}

/// Per-repository state exposed through the status API.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepoStatus {
    pub running: bool,
    pub pending: bool,
    pub last_outcome: Option<SyncOutcome>,
    pub last_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct Job {
    mapping: Arc<RepoMapping>,
    policy: RetryPolicy,
}

#[derive(Debug, Default)]
struct Slot {
    running: bool,
    pending: Option<Job>,
    last_outcome: Option<SyncOutcome>,
    last_run_at: Option<DateTime<Utc>>,
}

type SharedCopy = Arc<Mutex<Box<dyn WorkingCopy>>>;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Drives initialize/update runs against a [`Vcs`] backend.
pub struct SyncEngine {
    vcs: Arc<dyn Vcs>,
    slots: Mutex<HashMap<PathBuf, Slot>>,
    started_at: DateTime<Utc>,
}

impl SyncEngine {
    pub fn new(vcs: Arc<dyn Vcs>) -> Arc<Self> {
        info!("initializing sync engine");
        Arc::new(Self {
            vcs,
            slots: Mutex::new(HashMap::new()),
            started_at: Utc::now(),
        })
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Queue a run for `mapping`. Returns immediately.
    ///
    /// If no run is in flight for the mapping's directory a worker task is
    /// spawned. Otherwise the job becomes the directory's single pending run,
    /// replacing any job already waiting.
    pub fn submit(self: &Arc<Self>, mapping: Arc<RepoMapping>, policy: RetryPolicy) -> Submission {
        let directory = mapping.directory.clone();
        let job = Job { mapping, policy };

        {
            let mut slots = self.lock_slots();
            let slot = slots.entry(directory.clone()).or_default();
            if slot.running {
                let replaced = slot.pending.replace(job).is_some();
                info!(
                    directory = %directory.display(),
                    replaced,
                    "sync already running, run queued"
                );
                return Submission::Coalesced;
            }
            slot.running = true;
        }

        let engine = Arc::clone(self);
        Submission::Started(tokio::spawn(async move {
            engine.drain(directory, job).await;
        }))
    }

    /// Status of the slot for `directory`.
    pub fn status(&self, directory: &Path) -> RepoStatus {
        let slots = self.lock_slots();
        match slots.get(directory) {
            Some(slot) => RepoStatus {
                running: slot.running,
                pending: slot.pending.is_some(),
                last_outcome: slot.last_outcome.clone(),
                last_run_at: slot.last_run_at,
            },
            None => RepoStatus::default(),
        }
    }

    /// Whether any directory has a run in flight.
    pub fn is_busy(&self) -> bool {
        self.lock_slots().values().any(|s| s.running)
    }

    /// Wait until no run is in flight, for at most `timeout`.
    /// Returns `false` if runs were still active when time ran out.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.is_busy() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }

    /// Execute queued runs for one directory until none is pending.
    async fn drain(self: Arc<Self>, directory: PathBuf, mut job: Job) {
        let mut guard = SlotGuard {
            engine: &self,
            directory: &directory,
            armed: true,
        };

        loop {
            let outcome = self.run_once(&job.mapping, &job.policy).await;

            let mut slots = self.lock_slots();
            let slot = slots.entry(directory.clone()).or_default();
            slot.last_outcome = Some(outcome);
            slot.last_run_at = Some(Utc::now());
            match slot.pending.take() {
                Some(next) => {
                    debug!(directory = %directory.display(), "starting queued sync");
                    job = next;
                }
                None => {
                    slot.running = false;
                    guard.armed = false;
                    return;
                }
            }
        }
    }

    /// Run the state machine once for `mapping` and report the outcome.
    ///
    /// Never returns an error: fatal problems become
    /// [`SyncOutcome::Failed`]. The trigger marker is refreshed only when the
    /// working copy changed.
    #[instrument(
        skip_all,
        fields(
            repo = %mapping.name(),
            path = %mapping.path,
            directory = %mapping.directory.display(),
            run_id = %uuid::Uuid::new_v4(),
        )
    )]
    pub async fn run_once(&self, mapping: &RepoMapping, policy: &RetryPolicy) -> SyncOutcome {
        let action = decide(&mapping.directory);
        debug!(?action, "sync started");

        let result = match action {
            SyncAction::Initialize => self.initialize(mapping).await,
            SyncAction::Update => self.update(mapping, policy).await,
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => SyncOutcome::Failed {
                reason: e.to_string(),
            },
        };

        if outcome.changed() {
            if let Some(trigger) = &mapping.trigger {
                if let Err(e) = ensure_marker_fresh(trigger) {
                    warn!(error = %e, "failed to refresh trigger marker");
                }
            }
        }

        match &outcome {
            SyncOutcome::Failed { reason } => {
                error!(outcome = "failed", reason = %reason, "sync failed")
            }
            other => info!(outcome = %other, "sync finished"),
        }
        outcome
    }

    // -----------------------------------------------------------------------
    // Initialize
    // -----------------------------------------------------------------------

    async fn initialize(&self, mapping: &RepoMapping) -> Result<SyncOutcome, SyncError> {
        info!(selector = %mapping.selector, "cloning into new working copy");
        let req = CloneRequest {
            url: mapping.url.clone(),
            directory: mapping.directory.clone(),
            remote: mapping.remote.clone(),
            selector: mapping.selector.clone(),
            credentials: mapping.credentials.clone(),
        };

        let vcs = Arc::clone(&self.vcs);
        let head = blocking(move || vcs.clone_repo(&req))
            .await?
            .map_err(|source| SyncError::CloneFailed {
                directory: mapping.directory.clone(),
                source,
            })?;

        Ok(SyncOutcome::Initialized { head })
    }

    // -----------------------------------------------------------------------
    // Update
    // -----------------------------------------------------------------------

    async fn update(
        &self,
        mapping: &RepoMapping,
        policy: &RetryPolicy,
    ) -> Result<SyncOutcome, SyncError> {
        let vcs = Arc::clone(&self.vcs);
        let dir = mapping.directory.clone();
        let copy = blocking(move || vcs.open(&dir))
            .await?
            .map_err(|source| SyncError::OpenFailed {
                directory: mapping.directory.clone(),
                source,
            })?;
        let copy: SharedCopy = Arc::new(Mutex::new(copy));

        let status = fetch_with_retry(policy, |attempt| {
            let copy = Arc::clone(&copy);
            let remote = mapping.remote.clone();
            let selector = mapping.selector.clone();
            let credentials = mapping.credentials.clone();
            async move {
                debug!(attempt, remote = %remote, "fetching");
                tokio::task::spawn_blocking(move || {
                    let mut wc = lock_copy(&copy)?;
                    let status = wc.fetch(&remote, &selector, &credentials);
                    status
                })
                .await
                .unwrap_or_else(|e| {
                    Err(GitError::IoError(std::io::Error::other(format!(
                        "fetch task aborted: {}",
                        e
                    ))))
                })
            }
        })
        .await
        .map_err(|e| SyncError::FetchFailed {
            remote: mapping.remote.clone(),
            attempts: e.attempts,
            source: e.error,
        })?;

        if status == FetchStatus::UpToDate {
            debug!("fetch reported no changes");
            return Ok(SyncOutcome::AlreadyUpToDate {
                local: None,
                remote: None,
            });
        }

        let tracking = mapping.selector.tracking_ref(&mapping.remote);
        let (remote_head, local_head) = {
            let copy = Arc::clone(&copy);
            blocking(move || -> Result<(String, String), SyncError> {
                let wc = lock_copy(&copy).map_err(|source| SyncError::ResolveFailed {
                    refname: tracking.clone(),
                    source,
                })?;
                let remote_head =
                    wc.resolve_ref(&tracking)
                        .map_err(|source| SyncError::ResolveFailed {
                            refname: tracking.clone(),
                            source,
                        })?;
                let local_head = resolve_head(&**wc)?;
                Ok((remote_head, local_head))
            })
            .await??
        };

        if remote_head == local_head {
            return Ok(SyncOutcome::AlreadyUpToDate {
                local: Some(local_head),
                remote: Some(remote_head),
            });
        }

        info!(
            from = short_sha(&local_head),
            to = short_sha(&remote_head),
            "resetting working copy"
        );
        let target = remote_head.clone();
        let head = blocking(move || -> Result<String, SyncError> {
            let mut wc = lock_copy(&copy).map_err(|source| SyncError::ResetFailed {
                target: target.clone(),
                source,
            })?;
            wc.hard_reset(&target)
                .map_err(|source| SyncError::ResetFailed {
                    target: target.clone(),
                    source,
                })?;
            let head = resolve_head(&**wc);
            head
        })
        .await??;

        if head != remote_head {
            return Err(SyncError::HashMismatch {
                expected: remote_head,
                actual: head,
            });
        }

        Ok(SyncOutcome::Updated {
            previous: local_head,
            head,
        })
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<PathBuf, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears a directory's slot if its worker exits without finishing
/// normally, so later submissions are not queued forever.
struct SlotGuard<'a> {
    engine: &'a SyncEngine,
    directory: &'a Path,
    armed: bool,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut slots = self.engine.lock_slots();
            if let Some(slot) = slots.get_mut(self.directory) {
                slot.running = false;
                slot.pending = None;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Run blocking git work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, SyncError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SyncError::TaskAborted(e.to_string()))
}

fn lock_copy(copy: &SharedCopy) -> Result<MutexGuard<'_, Box<dyn WorkingCopy>>, GitError> {
    copy.lock()
        .map_err(|_| GitError::Poisoned("working copy".into()))
}

fn resolve_head(wc: &dyn WorkingCopy) -> Result<String, SyncError> {
    wc.resolve_ref("HEAD")
        .map_err(|source| SyncError::ResolveFailed {
            refname: "HEAD".into(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_missing_or_empty_initializes() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(decide(&dir.path().join("missing")), SyncAction::Initialize);

        let plain = dir.path().join("plain");
        std::fs::create_dir(&plain).unwrap();
        assert_eq!(decide(&plain), SyncAction::Initialize);

        // Any content, repository or not, goes to Update.
        std::fs::write(plain.join("index.html"), "hi").unwrap();
        assert_eq!(decide(&plain), SyncAction::Update);
        assert_eq!(decide(dir.path()), SyncAction::Update);
    }

    #[test]
    fn test_status_of_unknown_directory() {
        struct NoVcs;
        impl Vcs for NoVcs {
            fn open(&self, directory: &Path) -> Result<Box<dyn WorkingCopy>, GitError> {
                Err(GitError::RepositoryNotFound(directory.display().to_string()))
            }
            fn clone_repo(&self, _req: &CloneRequest) -> Result<String, GitError> {
                Err(GitError::RefNotFound("none".into()))
            }
        }
        let engine = SyncEngine::new(Arc::new(NoVcs));
        let status = engine.status(Path::new("/srv/none"));
        assert!(!status.running);
        assert!(status.last_outcome.is_none());
        assert!(!engine.is_busy());
    }
}
