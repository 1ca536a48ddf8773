//! Inbound notification handling: signature checks and payload decoding.

pub mod payload;
pub mod signature;

pub use payload::{decode_event, EventKind, HookEvent, PushEvent, RepositoryInfo, EVENT_HEADERS};
pub use signature::{sign, verify_signature, SIGNATURE_HEADERS};
