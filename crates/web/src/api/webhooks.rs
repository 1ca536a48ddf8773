//! Webhook receiver for every configured repository path.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::debug;

use gwg_core::dispatch::{Delivery, DispatchResult};
use gwg_core::errors::HookError;
use gwg_core::hook::{EVENT_HEADERS, SIGNATURE_HEADERS};
use gwg_core::sync_engine::Submission;

use crate::api::status::AppError;
use crate::AppState;

#[derive(Serialize)]
struct WebhookResponse {
    ok: bool,
    message: String,
}

/// Fallback handler: any request not matched by another route is treated
/// as a notification for the repository owning its path.
pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let path = uri.path();

    if method != Method::POST {
        let known = state.dispatcher.live().snapshot().routes.resolve(path).is_some();
        return Err(if known {
            AppError::MethodNotAllowed(format!("{} not allowed on webhook path", method))
        } else {
            AppError::NotFound(format!("no repository registered for '{}'", path))
        });
    }

    let delivery = Delivery {
        path,
        event: first_header(&headers, EVENT_HEADERS),
        signature: first_header(&headers, SIGNATURE_HEADERS),
        body: &body,
    };

    match state.dispatcher.dispatch(&delivery) {
        DispatchResult::Accepted { repo, submission } => {
            let message = match submission {
                Submission::Started(_) => format!("sync started for {}", repo),
                Submission::Coalesced => format!("sync queued for {}", repo),
            };
            Ok((
                StatusCode::ACCEPTED,
                Json(WebhookResponse { ok: true, message }),
            )
                .into_response())
        }
        DispatchResult::Ignored(reason) => Ok((
            StatusCode::OK,
            Json(WebhookResponse {
                ok: true,
                message: reason.to_string(),
            }),
        )
            .into_response()),
        DispatchResult::NotFound => Err(AppError::NotFound(format!(
            "no repository registered for '{}'",
            path
        ))),
        DispatchResult::Rejected(e @ HookError::PayloadInvalid(_)) => {
            Err(AppError::BadRequest(e.to_string()))
        }
        DispatchResult::Rejected(e) => Err(AppError::Unauthorized(format!(
            "webhook verification failed: {}",
            e
        ))),
    }
}

/// Value of the first present header in `names`.
fn first_header<'a>(headers: &'a HeaderMap, names: &[&str]) -> Option<&'a str> {
    names.iter().find_map(|name| {
        let value = headers.get(*name)?.to_str().ok()?;
        debug!(header = *name, "using header");
        Some(value)
    })
}
