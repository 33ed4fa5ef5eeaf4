//! Webhook endpoint handlers.
//!
//! Responses are short plain-text bodies; the providers only look at the
//! status code. Any non-2xx makes the provider retry the whole delivery, so
//! the inbound email endpoint only answers with an error when no payload
//! could be decoded at all.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, Multipart, State},
    http::{header, HeaderMap, StatusCode},
};
use chrono::Utc;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::process::{Pipeline, PipelineOutcome};
use crate::store::{EmailStore, GenericWebhook};
use crate::web::decode::decode_email;
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<Pipeline>,
    pub store: Arc<dyn EmailStore>,
}

impl AppState {
    pub fn new(config: Config, pipeline: Pipeline, store: Arc<dyn EmailStore>) -> Self {
        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            store,
        }
    }
}

type TextResponse = (StatusCode, String);

fn text(status: StatusCode, body: &str) -> TextResponse {
    (status, body.to_string())
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}

// =============================================================================
// Inbound Parse Webhook
// =============================================================================

/// Inbound email endpoint.
///
/// 1. Decodes the raw message from the `email` form entry (400 if absent)
/// 2. Runs the pipeline to completion in its own task
/// 3. Returns 200 whether or not the message parsed
pub async fn inbound_email(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> TextResponse {
    let decoded = match multipart {
        Ok(mut multipart) => decode_email(&mut multipart).await,
        Err(rejection) => {
            warn!(error = %rejection, "inbound_email_not_multipart");
            return text(StatusCode::BAD_REQUEST, "Missing email payload");
        }
    };

    let raw = match decoded {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "inbound_email_missing_payload");
            return text(StatusCode::BAD_REQUEST, "Missing email payload");
        }
    };

    info!(raw_length = raw.len(), "inbound_email_received");

    // Spawned so a dropped connection cannot cancel side effects half way.
    let pipeline = state.pipeline.clone();
    let task = tokio::spawn(async move { pipeline.run(&raw).await });

    match task.await {
        Ok(PipelineOutcome::Processed(report)) => {
            info!(
                correlation_id = %report.correlation_id,
                failed_steps = report.failed_steps().len(),
                "inbound_email_acknowledged"
            );
            text(StatusCode::OK, "OK")
        }
        Ok(PipelineOutcome::Unparseable { correlation_id, .. }) => {
            warn!(correlation_id = %correlation_id, "inbound_email_unparseable_acknowledged");
            text(StatusCode::OK, "Unparseable email ignored")
        }
        Err(e) => {
            error!(error = %e, "inbound_email_task_failed");
            text(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

// =============================================================================
// Event Webhook
// =============================================================================

/// Delivery event endpoint. Accepts a JSON array with any content type.
pub async fn sendgrid_events(State(state): State<AppState>, body: Bytes) -> TextResponse {
    let events = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Array(events)) => events,
        Ok(_) => {
            warn!(body_length = body.len(), "sendgrid_events_not_array");
            return text(StatusCode::BAD_REQUEST, "Payload must be array");
        }
        Err(e) => {
            warn!(error = %e, body_length = body.len(), "sendgrid_events_invalid_json");
            return text(StatusCode::BAD_REQUEST, "Payload must be array");
        }
    };

    info!(event_count = events.len(), "sendgrid_events_received");

    match state.store.insert_events(&events).await {
        Ok(inserted) => (StatusCode::OK, format!("Stored {} events", inserted)),
        Err(e) => {
            error!(error = %e, event_count = events.len(), "sendgrid_events_store_failed");
            text(StatusCode::INTERNAL_SERVER_ERROR, "DB error")
        }
    }
}

// =============================================================================
// Generic Webhook
// =============================================================================

/// Stores any JSON payload together with a few request headers.
pub async fn generic_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> TextResponse {
    let payload = match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, body_length = body.len(), "generic_webhook_invalid_json");
            return text(StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let webhook = GenericWebhook {
        received_at: Utc::now(),
        user_agent: header_value(header::USER_AGENT),
        content_type: header_value(header::CONTENT_TYPE),
        payload,
    };

    match state.store.insert_webhook(&webhook).await {
        Ok(id) => {
            info!(id = %id, user_agent = ?webhook.user_agent, "generic_webhook_stored");
            text(StatusCode::OK, "OK")
        }
        Err(e) => {
            error!(error = %e, "generic_webhook_store_failed");
            text(StatusCode::INTERNAL_SERVER_ERROR, "DB error")
        }
    }
}
