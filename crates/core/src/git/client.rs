//! Local Git repository operations via `git2`.

use std::cell::Cell;
use std::path::{Path, PathBuf};

use git2::build::CheckoutBuilder;
use git2::{
    AutotagOption, Cred, CredentialType, ErrorCode, FetchOptions, Oid, RemoteCallbacks,
    Repository, ResetType,
};
use tracing::{debug, info, instrument, warn};

use super::{CloneRequest, Vcs, WorkingCopy};
use crate::errors::GitError;
use crate::models::{Credentials, FetchStatus, RefKind, RefSelector};

/// How many times the credential callback may be asked before giving up.
/// libgit2 keeps asking as long as the callback returns credentials, so a
/// rejected key would otherwise loop forever.
const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;

/// High-level Git client wrapping a `git2::Repository`.
pub struct GitClient {
    repo: Repository,
    repo_path: PathBuf,
}

impl GitClient {
    /// Open an existing Git repository at `repo_path`.
    pub fn new<P: AsRef<Path>>(repo_path: P) -> Result<Self, GitError> {
        let path = repo_path.as_ref();
        debug!(path = %path.display(), "opening git repository");
        let repo = Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        Ok(Self {
            repo,
            repo_path: path.to_path_buf(),
        })
    }

    /// Create a working copy that tracks only `req.selector` and check it out.
    ///
    /// A branch is checked out as a local branch tracking `<remote>/<name>`;
    /// a tag is checked out as a detached HEAD. If anything fails, the
    /// directory created here is removed again so the next attempt starts
    /// from scratch.
    #[instrument(skip(req), fields(url = %req.url, path = %req.directory.display(), selector = %req.selector))]
    pub fn clone_selected(req: &CloneRequest) -> Result<Self, GitError> {
        info!("cloning git repository");
        let existed = req.directory.exists();
        match Self::clone_into(req) {
            Ok(client) => {
                info!("clone completed");
                Ok(client)
            }
            Err(e) => {
                // Leave a pre-created directory in place, but empty again.
                let partial = if existed {
                    req.directory.join(".git")
                } else {
                    req.directory.clone()
                };
                if partial.exists() {
                    if let Err(rm) = std::fs::remove_dir_all(&partial) {
                        warn!(error = %rm, "failed to remove partial clone");
                    }
                }
                Err(e)
            }
        }
    }

    fn clone_into(req: &CloneRequest) -> Result<Self, GitError> {
        let repo = Repository::init(&req.directory)?;
        let refspec = req.selector.fetch_refspec(&req.remote);
        {
            let mut remote = repo.remote_with_fetch(&req.remote, &req.url, &refspec)?;
            let mut fetch_opts = FetchOptions::new();
            fetch_opts.remote_callbacks(remote_callbacks(&req.credentials));
            fetch_opts.download_tags(AutotagOption::None);
            remote.fetch(&[&refspec], Some(&mut fetch_opts), None)?;
        }

        let tracking = req.selector.tracking_ref(&req.remote);
        let target = repo
            .find_reference(&tracking)
            .map_err(|_| GitError::RefNotFound(req.selector.remote_ref()))?
            .peel_to_commit()?
            .id();

        match req.selector.kind {
            RefKind::Branch => {
                let commit = repo.find_commit(target)?;
                let mut branch = repo.branch(&req.selector.name, &commit, false)?;
                branch.set_upstream(Some(&format!("{}/{}", req.remote, req.selector.name)))?;
                repo.set_head(&format!("refs/heads/{}", req.selector.name))?;
            }
            RefKind::Tag => repo.set_head_detached(target)?,
        }
        repo.checkout_head(Some(CheckoutBuilder::new().force()))?;

        Ok(Self {
            repo,
            repo_path: req.directory.clone(),
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Fetch only the selected ref from `remote_name`.
    ///
    /// Reports [`FetchStatus::UpToDate`] when no local ref moved.
    #[instrument(skip(self, credentials), fields(path = %self.repo_path.display()))]
    pub fn fetch(
        &self,
        remote_name: &str,
        selector: &RefSelector,
        credentials: &Credentials,
    ) -> Result<FetchStatus, GitError> {
        debug!("fetching");
        let mut remote = self.repo.find_remote(remote_name).map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                GitError::RemoteNotFound(remote_name.to_string())
            } else {
                GitError::Git2Error(e)
            }
        })?;

        let moved = Cell::new(0usize);
        let mut callbacks = remote_callbacks(credentials);
        callbacks.update_tips(|refname, old, new| {
            if old != new {
                debug!(refname, old = %old, new = %new, "ref updated");
                moved.set(moved.get() + 1);
            }
            true
        });
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(callbacks);
        fetch_opts.download_tags(AutotagOption::None);

        let refspec = selector.fetch_refspec(remote_name);
        remote.fetch(&[&refspec], Some(&mut fetch_opts), None)?;
        drop(fetch_opts);

        if moved.get() == 0 {
            debug!("fetch completed, nothing new");
            Ok(FetchStatus::UpToDate)
        } else {
            debug!(refs = moved.get(), "fetch completed");
            Ok(FetchStatus::Updated)
        }
    }

    /// Resolve a ref name or `HEAD` to the commit it points at. Annotated
    /// tags are peeled.
    pub fn resolve(&self, refname: &str) -> Result<Oid, GitError> {
        let object = self.repo.revparse_single(refname).map_err(|e| {
            if e.code() == ErrorCode::NotFound || e.code() == ErrorCode::UnbornBranch {
                GitError::RefNotFound(refname.to_string())
            } else {
                GitError::Git2Error(e)
            }
        })?;
        Ok(object.peel_to_commit()?.id())
    }

    /// Return the SHA of HEAD.
    pub fn get_head_sha(&self) -> Result<String, GitError> {
        Ok(self.resolve("HEAD")?.to_string())
    }

    /// `git reset --hard <sha>`.
    #[instrument(skip(self), fields(path = %self.repo_path.display()))]
    pub fn reset_hard(&self, sha: &str) -> Result<(), GitError> {
        let oid = Oid::from_str(sha)?;
        let commit = self.repo.find_commit(oid)?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        self.repo
            .reset(commit.as_object(), ResetType::Hard, Some(&mut checkout))?;
        info!(sha, "working tree reset");
        Ok(())
    }
}

/// Build remote callbacks that authenticate with `credentials`.
///
/// SSH key from file, then the SSH agent, then an HTTPS token, then the
/// libgit2 default credential.
fn remote_callbacks<'a>(credentials: &Credentials) -> RemoteCallbacks<'a> {
    let creds = credentials.clone();
    let mut asked = 0u32;
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, username, allowed| {
        asked += 1;
        if asked > MAX_CREDENTIAL_ATTEMPTS {
            return Err(git2::Error::from_str("authentication rejected by remote"));
        }
        let user = username.unwrap_or("git");
        if allowed.contains(CredentialType::USERNAME) {
            return Cred::username(user);
        }
        if allowed.contains(CredentialType::SSH_KEY) {
            return match &creds.ssh_key {
                Some(key) => Cred::ssh_key(user, None, key, creds.ssh_passphrase.as_deref()),
                None => Cred::ssh_key_from_agent(user),
            };
        }
        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            if let Some(tok) = &creds.token {
                return Cred::userpass_plaintext("x-access-token", tok);
            }
        }
        Cred::default()
    });
    callbacks
}

// ---------------------------------------------------------------------------
// Capability implementation
// ---------------------------------------------------------------------------

/// [`Vcs`] backed by libgit2.
#[derive(Debug, Default, Clone, Copy)]
pub struct Git2Vcs;

impl Vcs for Git2Vcs {
    fn open(&self, directory: &Path) -> Result<Box<dyn WorkingCopy>, GitError> {
        Ok(Box::new(GitClient::new(directory)?))
    }

    fn clone_repo(&self, req: &CloneRequest) -> Result<String, GitError> {
        GitClient::clone_selected(req)?.get_head_sha()
    }
}

impl WorkingCopy for GitClient {
    fn fetch(
        &mut self,
        remote: &str,
        selector: &RefSelector,
        credentials: &Credentials,
    ) -> Result<FetchStatus, GitError> {
        GitClient::fetch(self, remote, selector, credentials)
    }

    fn resolve_ref(&self, refname: &str) -> Result<String, GitError> {
        Ok(self.resolve(refname)?.to_string())
    }

    fn hard_reset(&mut self, commit: &str) -> Result<(), GitError> {
        self.reset_hard(commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{RepositoryInitOptions, Signature};

    fn init_origin(dir: &Path) -> Repository {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        Repository::init_opts(dir, &opts).unwrap()
    }

    fn commit_file(repo: &Repository, name: &str, content: &str) -> Oid {
        let root = repo.workdir().unwrap().to_path_buf();
        std::fs::write(root.join(name), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test", "test@test.com").unwrap();
        let parent = repo.head().ok().map(|h| h.peel_to_commit().unwrap());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, "commit", &tree, &parents)
            .unwrap()
    }

    fn clone_request(origin: &Path, dir: &Path, selector: RefSelector) -> CloneRequest {
        CloneRequest {
            url: origin.display().to_string(),
            directory: dir.to_path_buf(),
            remote: "origin".into(),
            selector,
            credentials: Credentials::default(),
        }
    }

    #[test]
    fn test_clone_branch_and_fetch() {
        let tmp = tempfile::tempdir().unwrap();
        let origin_dir = tmp.path().join("origin");
        let origin = init_origin(&origin_dir);
        let first = commit_file(&origin, "a.txt", "one");

        let work = tmp.path().join("work");
        let req = clone_request(&origin_dir, &work, RefSelector::branch("main"));
        let client = GitClient::clone_selected(&req).unwrap();
        assert_eq!(client.get_head_sha().unwrap(), first.to_string());
        assert_eq!(std::fs::read_to_string(work.join("a.txt")).unwrap(), "one");

        let status = client
            .fetch("origin", &req.selector, &Credentials::default())
            .unwrap();
        assert_eq!(status, FetchStatus::UpToDate);

        let second = commit_file(&origin, "a.txt", "two");
        let status = client
            .fetch("origin", &req.selector, &Credentials::default())
            .unwrap();
        assert_eq!(status, FetchStatus::Updated);
        assert_eq!(client.resolve("refs/remotes/origin/main").unwrap(), second);

        client.reset_hard(&second.to_string()).unwrap();
        assert_eq!(client.get_head_sha().unwrap(), second.to_string());
        assert_eq!(std::fs::read_to_string(work.join("a.txt")).unwrap(), "two");
    }

    #[test]
    fn test_clone_tag_detaches_head() {
        let tmp = tempfile::tempdir().unwrap();
        let origin_dir = tmp.path().join("origin");
        let origin = init_origin(&origin_dir);
        let tagged = commit_file(&origin, "a.txt", "release");
        let target = origin.find_object(tagged, None).unwrap();
        let sig = Signature::now("Test", "test@test.com").unwrap();
        origin.tag("v1.0", &target, &sig, "release 1.0", false).unwrap();
        commit_file(&origin, "a.txt", "after release");

        let work = tmp.path().join("work");
        let req = clone_request(&origin_dir, &work, RefSelector::tag("v1.0"));
        let client = GitClient::clone_selected(&req).unwrap();
        assert!(client.repo().head_detached().unwrap());
        assert_eq!(client.get_head_sha().unwrap(), tagged.to_string());
        // Annotated tag resolves to its commit, not the tag object.
        assert_eq!(client.resolve("refs/tags/v1.0").unwrap(), tagged);
    }

    #[test]
    fn test_failed_clone_removes_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let origin_dir = tmp.path().join("origin");
        let origin = init_origin(&origin_dir);
        commit_file(&origin, "a.txt", "one");

        let work = tmp.path().join("work");
        let req = clone_request(&origin_dir, &work, RefSelector::branch("missing"));
        assert!(GitClient::clone_selected(&req).is_err());
        assert!(!work.exists());
    }

    #[test]
    fn test_clone_into_precreated_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let origin_dir = tmp.path().join("origin");
        let origin = init_origin(&origin_dir);
        let head = commit_file(&origin, "a.txt", "one");

        let work = tmp.path().join("work");
        std::fs::create_dir(&work).unwrap();

        // A failed clone empties the directory again but keeps it.
        let bad = clone_request(&origin_dir, &work, RefSelector::branch("missing"));
        assert!(GitClient::clone_selected(&bad).is_err());
        assert!(work.exists());
        assert_eq!(std::fs::read_dir(&work).unwrap().count(), 0);

        let req = clone_request(&origin_dir, &work, RefSelector::branch("main"));
        let client = GitClient::clone_selected(&req).unwrap();
        assert_eq!(client.get_head_sha().unwrap(), head.to_string());
        assert_eq!(std::fs::read_to_string(work.join("a.txt")).unwrap(), "one");
    }

    #[test]
    fn test_fetch_unknown_remote() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = init_origin(tmp.path());
        commit_file(&repo, "a.txt", "x");
        let client = GitClient::new(tmp.path()).unwrap();
        let err = client
            .fetch("upstream", &RefSelector::branch("main"), &Credentials::default())
            .unwrap_err();
        assert!(matches!(err, GitError::RemoteNotFound(ref r) if r == "upstream"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_repo_not_found() {
        assert!(matches!(
            GitClient::new("/nonexistent"),
            Err(GitError::RepositoryNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_unknown_ref() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = init_origin(tmp.path());
        commit_file(&repo, "a.txt", "x");
        let client = GitClient::new(tmp.path()).unwrap();
        assert!(matches!(
            client.resolve("refs/remotes/origin/main"),
            Err(GitError::RefNotFound(_))
        ));
    }
}
