//! gwg web server.
//!
//! Provides an Axum-based HTTP server with:
//! - Status and health endpoints
//! - A webhook receiver on every configured repository path

pub mod api;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use tower_http::trace::TraceLayer;
use tracing::info;

use gwg_core::dispatch::Dispatcher;

/// Request bodies larger than this are refused.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub started_at: DateTime<Utc>,
}

/// Build the application router.
///
/// Webhook paths come from the live configuration and change on reload, so
/// they are served by the fallback handler rather than registered routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(api::status::routes())
        .fallback(api::webhooks::handle_webhook)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The web server.
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            state: Arc::new(AppState {
                dispatcher,
                started_at: Utc::now(),
            }),
        }
    }

    /// Serve on `listen_addr` until `shutdown` resolves.
    pub async fn start<F>(self, listen_addr: &str, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = router(self.state);

        let listener = tokio::net::TcpListener::bind(listen_addr).await?;
        let addr: SocketAddr = listener.local_addr()?;
        info!(addr = %addr, "starting web server");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("web server stopped");
        Ok(())
    }
}
