//! Decoding of push notification bodies.
//!
//! GitHub, Gitea and Gogs share the fields used here: `ref`, `after` and a
//! `repository` object carrying several URL flavours.

use serde::Deserialize;

use crate::errors::HookError;
use crate::git::remote_url::same_repository;

/// Header names checked for the event kind, in order of preference.
pub const EVENT_HEADERS: &[&str] = &["x-github-event", "x-gitea-event", "x-gogs-event"];

/// Event kind announced by the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Push,
    Ping,
    Other(String),
}

impl EventKind {
    /// Interpret an event header value. A missing header is taken as a push,
    /// which is what plain `curl` hooks and older Gogs versions send.
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::Push,
            Some(v) if v.eq_ignore_ascii_case("push") => Self::Push,
            Some(v) if v.eq_ignore_ascii_case("ping") => Self::Ping,
            Some(v) => Self::Other(v.to_string()),
        }
    }
}

/// Repository URLs as reported in the payload. Every field is optional
/// because each forge fills a different subset.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct RepositoryInfo {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub clone_url: Option<String>,
    #[serde(default)]
    pub ssh_url: Option<String>,
    #[serde(default)]
    pub git_url: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl RepositoryInfo {
    /// All non-empty URLs in the payload.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        [
            &self.clone_url,
            &self.ssh_url,
            &self.git_url,
            &self.html_url,
            &self.url,
        ]
        .into_iter()
        .filter_map(|u| u.as_deref())
        .filter(|u| !u.is_empty())
    }
}

/// The parts of a push payload the dispatcher needs.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Commit the ref points at after the push.
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub repository: Option<RepositoryInfo>,
}

impl PushEvent {
    /// Whether any URL in the payload names the same repository as `url`.
    /// A payload without URLs never matches.
    pub fn concerns_repository(&self, url: &str) -> bool {
        self.repository
            .as_ref()
            .is_some_and(|repo| repo.urls().any(|u| same_repository(u, url)))
    }
}

#[derive(Debug, Default, Deserialize)]
struct PingPayload {
    #[serde(default)]
    zen: Option<String>,
    #[serde(default)]
    hook_id: Option<u64>,
}

/// A decoded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    Push(PushEvent),
    Ping {
        zen: Option<String>,
        hook_id: Option<u64>,
    },
    Other(String),
}

/// Decode `body` according to `kind`. Only push bodies must be valid;
/// a ping with an unexpected body is still a ping.
pub fn decode_event(kind: &EventKind, body: &[u8]) -> Result<HookEvent, HookError> {
    match kind {
        EventKind::Push => {
            let push: PushEvent = serde_json::from_slice(body)
                .map_err(|e| HookError::PayloadInvalid(format!("invalid JSON payload: {}", e)))?;
            if push.git_ref.trim().is_empty() {
                return Err(HookError::PayloadInvalid("empty ref".into()));
            }
            Ok(HookEvent::Push(push))
        }
        EventKind::Ping => {
            let ping: PingPayload = serde_json::from_slice(body).unwrap_or_default();
            Ok(HookEvent::Ping {
                zen: ping.zen,
                hook_id: ping.hook_id,
            })
        }
        EventKind::Other(name) => Ok(HookEvent::Other(name.clone())),
    }
}
