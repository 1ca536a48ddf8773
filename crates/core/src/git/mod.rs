//! Version-control capability consumed by the sync engine.
//!
//! The engine only needs five primitives: open, clone, fetch, resolve and
//! hard reset. They are expressed as traits so the engine can be driven by
//! the `git2` implementation in [`client`] or by an in-memory double in
//! tests. All methods block; the engine calls them from
//! `tokio::task::spawn_blocking`.

pub mod client;
pub mod remote_url;

use std::path::{Path, PathBuf};

use crate::errors::GitError;
use crate::models::{Credentials, FetchStatus, RefSelector};

pub use client::{Git2Vcs, GitClient};

/// Everything needed to create a working copy from scratch.
#[derive(Debug, Clone)]
pub struct CloneRequest {
    pub url: String,
    pub directory: PathBuf,
    pub remote: String,
    pub selector: RefSelector,
    pub credentials: Credentials,
}

/// Entry point to a version-control backend.
pub trait Vcs: Send + Sync + 'static {
    /// Open an existing working copy.
    fn open(&self, directory: &Path) -> Result<Box<dyn WorkingCopy>, GitError>;

    /// Create a working copy restricted to `req.selector` and check it out.
    /// Returns the commit id now checked out.
    fn clone_repo(&self, req: &CloneRequest) -> Result<String, GitError>;
}

/// An opened working copy.
pub trait WorkingCopy: Send {
    /// Fetch the selected ref from `remote`.
    fn fetch(
        &mut self,
        remote: &str,
        selector: &RefSelector,
        credentials: &Credentials,
    ) -> Result<FetchStatus, GitError>;

    /// Resolve a ref name (or `HEAD`) to a commit id.
    fn resolve_ref(&self, refname: &str) -> Result<String, GitError>;

    /// Point HEAD at `commit` and force the index and worktree to match.
    fn hard_reset(&mut self, commit: &str) -> Result<(), GitError>;
}
