//! Web server module for handling inbound webhooks.
//!
//! Routes:
//! - `POST /webhooks/inbound-email`: raw MIME message in a multipart form
//! - `POST /webhooks/sendgrid-events`: JSON array of delivery events
//! - `POST /webhooks/generic`: any JSON document
//! - `GET /health`

pub mod decode;
pub mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use decode::{decode_email, DecodeError, PayloadSource, RawEmailSubmission, EMAIL_FIELD};
pub use handlers::{generic_webhook, health, inbound_email, sendgrid_events, AppState};

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_body_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/webhooks/inbound-email", post(inbound_email))
        .route("/webhooks/sendgrid-events", post(sendgrid_events))
        .route("/webhooks/generic", post(generic_webhook))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
