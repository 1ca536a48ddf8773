//! gwg core library.
//!
//! Keeps local working copies in step with remote git repositories, driven
//! by push notifications: configuration, routing of webhook paths to
//! repositories, notification validation, the sync engine with its retry
//! and trigger side effects, and hot reload of the live configuration.

pub mod config;
pub mod dispatch;
pub mod errors;
pub mod git;
pub mod hook;
pub mod live;
pub mod models;
pub mod reload;
pub mod retry;
pub mod routing;
pub mod sync_engine;
pub mod trigger;

// Re-exports for convenience.
pub use config::AppConfig;
pub use dispatch::{Delivery, DispatchResult, Dispatcher, IgnoreReason};
pub use live::{LiveConfig, LiveConfigHandle};
pub use models::{RefKind, RefSelector, RepoMapping, SyncOutcome};
pub use reload::ReloadCoordinator;
pub use retry::RetryPolicy;
pub use routing::RoutingTable;
pub use sync_engine::{Submission, SyncEngine};
