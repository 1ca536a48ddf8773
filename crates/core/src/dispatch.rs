//! Turns inbound notifications into sync submissions.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::errors::HookError;
use crate::hook::{decode_event, verify_signature, EventKind, HookEvent};
use crate::live::LiveConfigHandle;
use crate::sync_engine::{Submission, SyncEngine};

/// One inbound notification, as received by the HTTP layer.
#[derive(Debug, Clone, Copy)]
pub struct Delivery<'a> {
    /// Request path, e.g. `/hooks/app`.
    pub path: &'a str,
    /// Value of the event-kind header, if any.
    pub event: Option<&'a str>,
    /// Value of the signature header, if any.
    pub signature: Option<&'a str>,
    pub body: &'a [u8],
}

/// Why a valid notification did not start a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    Ping,
    UnhandledEvent(String),
    RepositoryMismatch,
    RefMismatch { expected: String, received: String },
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ping => write!(f, "ping acknowledged"),
            Self::UnhandledEvent(kind) => write!(f, "event '{}' not handled", kind),
            Self::RepositoryMismatch => write!(f, "repository does not match"),
            Self::RefMismatch { expected, received } => {
                write!(f, "ref '{}' does not match '{}'", received, expected)
            }
        }
    }
}

/// What happened to a delivery.
#[derive(Debug)]
pub enum DispatchResult {
    /// A run was submitted for `repo`.
    Accepted {
        repo: String,
        submission: Submission,
    },
    Ignored(IgnoreReason),
    /// No mapping owns the path.
    NotFound,
    /// The signature or payload was unacceptable.
    Rejected(HookError),
}

/// Validates deliveries against the live configuration and hands matching
/// pushes to the [`SyncEngine`].
#[derive(Clone)]
pub struct Dispatcher {
    live: LiveConfigHandle,
    engine: Arc<SyncEngine>,
}

impl Dispatcher {
    pub fn new(live: LiveConfigHandle, engine: Arc<SyncEngine>) -> Self {
        Self { live, engine }
    }

    pub fn live(&self) -> &LiveConfigHandle {
        &self.live
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Route, authenticate, decode and match one delivery.
    ///
    /// Never waits for the sync run; an accepted delivery only means a run
    /// was submitted.
    #[instrument(skip_all, fields(path = %delivery.path, delivery_id = %uuid::Uuid::new_v4()))]
    pub fn dispatch(&self, delivery: &Delivery<'_>) -> DispatchResult {
        let snapshot = self.live.snapshot();

        let Some(mapping) = snapshot.routes.resolve(delivery.path) else {
            warn!("no repository registered for path");
            return DispatchResult::NotFound;
        };
        let repo = mapping.name();

        if let Some(secret) = mapping.secret.as_deref().filter(|s| !s.is_empty()) {
            let checked = match delivery.signature {
                Some(signature) => verify_signature(secret, delivery.body, signature),
                None => Err(HookError::SignatureMissing),
            };
            if let Err(e) = checked {
                warn!(repo = %repo, error = %e, "rejecting notification");
                return DispatchResult::Rejected(e);
            }
        }

        let kind = EventKind::from_header(delivery.event);
        let push = match decode_event(&kind, delivery.body) {
            Ok(HookEvent::Push(push)) => push,
            Ok(HookEvent::Ping { zen, hook_id }) => {
                info!(repo = %repo, ?hook_id, zen = zen.as_deref().unwrap_or(""), "ping received");
                return DispatchResult::Ignored(IgnoreReason::Ping);
            }
            Ok(HookEvent::Other(name)) => {
                info!(repo = %repo, event = %name, "unhandled event");
                return DispatchResult::Ignored(IgnoreReason::UnhandledEvent(name));
            }
            Err(e) => {
                warn!(repo = %repo, error = %e, "rejecting notification");
                return DispatchResult::Rejected(e);
            }
        };

        if !push.concerns_repository(&mapping.url) {
            info!(
                repo = %repo,
                payload_repo = push
                    .repository
                    .as_ref()
                    .and_then(|r| r.full_name.as_deref())
                    .unwrap_or("unknown"),
                "notification is for another repository"
            );
            return DispatchResult::Ignored(IgnoreReason::RepositoryMismatch);
        }

        let expected = mapping.expected_notification_ref();
        if push.git_ref != expected {
            info!(
                repo = %repo,
                expected = %expected,
                received = %push.git_ref,
                "notification is for another ref"
            );
            return DispatchResult::Ignored(IgnoreReason::RefMismatch {
                expected,
                received: push.git_ref,
            });
        }

        debug!(after = push.after.as_deref().unwrap_or(""), "push matches");
        let submission = self.engine.submit(Arc::clone(&mapping), snapshot.retry);
        info!(
            repo = %repo,
            git_ref = %push.git_ref,
            coalesced = matches!(submission, Submission::Coalesced),
            "sync submitted"
        );
        DispatchResult::Accepted { repo, submission }
    }
}
