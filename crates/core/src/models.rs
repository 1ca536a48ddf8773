//! Domain types shared across the gwg subsystems.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::git::remote_url;
use crate::routing::normalize_path;

// ---------------------------------------------------------------------------
// Ref selector
// ---------------------------------------------------------------------------

/// Whether a repository tracks a branch or a tag.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    #[default]
    Branch,
    Tag,
}

impl RefKind {
    /// Parse a configured ref kind. Returns `None` for anything unrecognized
    /// so the caller can warn and fall back to a default.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "branch" | "branches" | "head" | "heads" => Some(Self::Branch),
            "tag" | "tags" => Some(Self::Tag),
            _ => None,
        }
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Branch => write!(f, "branch"),
            Self::Tag => write!(f, "tag"),
        }
    }
}

/// The (kind, name) pair identifying the authoritative ref of a repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RefSelector {
    pub kind: RefKind,
    pub name: String,
}

impl RefSelector {
    pub fn branch(name: impl Into<String>) -> Self {
        Self {
            kind: RefKind::Branch,
            name: name.into(),
        }
    }

    pub fn tag(name: impl Into<String>) -> Self {
        Self {
            kind: RefKind::Tag,
            name: name.into(),
        }
    }

    /// The ref name as it appears on the remote and in push notifications.
    pub fn remote_ref(&self) -> String {
        match self.kind {
            RefKind::Branch => format!("refs/heads/{}", self.name),
            RefKind::Tag => format!("refs/tags/{}", self.name),
        }
    }

    /// The local ref a fetch from `remote` updates.
    pub fn tracking_ref(&self, remote: &str) -> String {
        match self.kind {
            RefKind::Branch => format!("refs/remotes/{}/{}", remote, self.name),
            RefKind::Tag => format!("refs/tags/{}", self.name),
        }
    }

    /// A forced refspec that fetches only this ref.
    pub fn fetch_refspec(&self, remote: &str) -> String {
        format!("+{}:{}", self.remote_ref(), self.tracking_ref(remote))
    }
}

impl fmt::Display for RefSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Authentication material used when talking to a remote.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Path to an SSH private key.
    pub ssh_key: Option<PathBuf>,
    /// Passphrase for `ssh_key`.
    pub ssh_passphrase: Option<String>,
    /// HTTPS access token, sent as the password for `x-access-token`.
    pub token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssh_key", &self.ssh_key)
            .field("ssh_passphrase", &self.ssh_passphrase.as_ref().map(|_| "***"))
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Repository mapping
// ---------------------------------------------------------------------------

/// One tracked repository: where it lives remotely, where it is mirrored
/// locally, and which webhook path drives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoMapping {
    pub url: String,
    /// Webhook path, stored without a trailing slash.
    pub path: String,
    pub directory: PathBuf,
    pub selector: RefSelector,
    pub remote: String,
    pub secret: Option<String>,
    pub credentials: Credentials,
    pub trigger: Option<PathBuf>,
}

impl RepoMapping {
    /// Build a mapping with default remote and no secret, credentials or
    /// trigger. The webhook path is normalized.
    pub fn new(
        url: impl Into<String>,
        path: &str,
        directory: impl Into<PathBuf>,
        selector: RefSelector,
    ) -> Self {
        Self {
            url: url.into(),
            path: normalize_path(path).to_string(),
            directory: directory.into(),
            selector,
            remote: crate::config::DEFAULT_REMOTE.to_string(),
            secret: None,
            credentials: Credentials::default(),
            trigger: None,
        }
    }

    /// Short human-readable name for logs, e.g. `org/app`.
    pub fn name(&self) -> String {
        remote_url::short_name(&self.url)
    }

    /// The ref name a push notification must carry to concern this mapping.
    pub fn expected_notification_ref(&self) -> String {
        self.selector.remote_ref()
    }

    pub fn has_secret(&self) -> bool {
        self.secret.as_deref().is_some_and(|s| !s.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Sync results
// ---------------------------------------------------------------------------

/// Result of a single fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// No ref changed on the remote side.
    UpToDate,
    /// At least one tracked ref moved.
    Updated,
}

/// Terminal state of one synchronization run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The working copy was cloned fresh.
    Initialized { head: String },
    /// The working copy was hard-reset to a new commit.
    Updated { previous: String, head: String },
    /// Nothing to do. Ids are absent when the fetch itself reported no change.
    AlreadyUpToDate {
        local: Option<String>,
        remote: Option<String>,
    },
    /// The run ended in a fatal error.
    Failed { reason: String },
}

impl SyncOutcome {
    /// Whether the working copy content changed (and the trigger fired).
    pub fn changed(&self) -> bool {
        matches!(self, Self::Initialized { .. } | Self::Updated { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialized { head } => write!(f, "initialized at {}", short_sha(head)),
            Self::Updated { previous, head } => {
                write!(f, "updated {} -> {}", short_sha(previous), short_sha(head))
            }
            Self::AlreadyUpToDate { .. } => write!(f, "already up to date"),
            Self::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// First eight characters of a commit id.
pub fn short_sha(sha: &str) -> &str {
    &sha[..8.min(sha.len())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_kind_parse() {
        assert_eq!(RefKind::parse("branch"), Some(RefKind::Branch));
        assert_eq!(RefKind::parse(" Tag "), Some(RefKind::Tag));
        assert_eq!(RefKind::parse("tags"), Some(RefKind::Tag));
        assert_eq!(RefKind::parse("commit"), None);
        assert_eq!(RefKind::parse(""), None);
    }

    #[test]
    fn test_selector_refs() {
        let main = RefSelector::branch("main");
        assert_eq!(main.remote_ref(), "refs/heads/main");
        assert_eq!(main.tracking_ref("origin"), "refs/remotes/origin/main");
        assert_eq!(
            main.fetch_refspec("upstream"),
            "+refs/heads/main:refs/remotes/upstream/main"
        );

        let release = RefSelector::tag("v1.2.0");
        assert_eq!(release.remote_ref(), "refs/tags/v1.2.0");
        assert_eq!(release.tracking_ref("origin"), "refs/tags/v1.2.0");
        assert_eq!(
            release.fetch_refspec("origin"),
            "+refs/tags/v1.2.0:refs/tags/v1.2.0"
        );
    }

    #[test]
    fn test_mapping_normalizes_path() {
        let m = RepoMapping::new(
            "git@github.com:org/app.git",
            "/hooks/app/",
            "/srv/app",
            RefSelector::branch("main"),
        );
        assert_eq!(m.path, "/hooks/app");
        assert_eq!(m.remote, "origin");
        assert_eq!(m.name(), "org/app");
        assert_eq!(m.expected_notification_ref(), "refs/heads/main");
        assert!(!m.has_secret());
    }

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let creds = Credentials {
            ssh_key: Some("/etc/gwg/id".into()),
            ssh_passphrase: Some("hunter2".into()),
            token: Some("ghp_abc".into()),
        };
        let dbg = format!("{:?}", creds);
        assert!(!dbg.contains("hunter2"));
        assert!(!dbg.contains("ghp_abc"));
        assert!(dbg.contains("/etc/gwg/id"));
    }

    #[test]
    fn test_outcome_display() {
        let out = SyncOutcome::Updated {
            previous: "0123456789abcdef".into(),
            head: "fedcba9876543210".into(),
        };
        assert_eq!(out.to_string(), "updated 01234567 -> fedcba98");
        assert!(out.changed());
        assert!(!SyncOutcome::AlreadyUpToDate { local: None, remote: None }.changed());
        assert!(SyncOutcome::Failed { reason: "x".into() }.is_failure());
    }
}
