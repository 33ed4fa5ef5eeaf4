//! Append-only document store for everything the webhooks receive.
//!
//! Three collections are written:
//! - `inbound_emails`: one document per successfully parsed inbound email
//! - `sendgrid_events`: one document per delivery event
//! - `generic_webhooks`: one document per generic webhook call
//!
//! Documents are never updated or deleted by the service.

pub mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::process::{Attachment, Mailbox, ParsedEmail};

pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("document serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Collections held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    InboundEmails,
    SendgridEvents,
    GenericWebhooks,
}

impl Collection {
    pub fn table(self) -> &'static str {
        match self {
            Collection::InboundEmails => "inbound_emails",
            Collection::SendgridEvents => "sendgrid_events",
            Collection::GenericWebhooks => "generic_webhooks",
        }
    }
}

/// Attachment as persisted: metadata plus base64 content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredAttachment {
    pub filename: String,
    pub content_type: String,
    pub disposition: String,
    pub content_id: Option<String>,
    pub size: usize,
    pub content_base64: String,
}

impl From<&Attachment> for StoredAttachment {
    fn from(attachment: &Attachment) -> Self {
        Self {
            filename: attachment.filename.clone(),
            content_type: attachment.content_type.clone(),
            disposition: attachment.disposition.clone(),
            content_id: attachment.content_id.clone(),
            size: attachment.content.len(),
            content_base64: STANDARD.encode(&attachment.content),
        }
    }
}

/// Body of an inbound email document, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailDocument {
    pub received_at: DateTime<Utc>,
    pub from: Mailbox,
    pub to: Mailbox,
    pub subject: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub attachments: Vec<StoredAttachment>,
    pub raw_length: usize,
    pub raw_sha256: String,
}

impl EmailDocument {
    pub fn new(email: &ParsedEmail, received_at: DateTime<Utc>) -> Self {
        Self {
            received_at,
            from: email.from.clone(),
            to: email.to.clone(),
            subject: email.subject.clone(),
            text: email.text.clone(),
            html: email.html.clone(),
            headers: email.headers.clone(),
            attachments: email.attachments.iter().map(StoredAttachment::from).collect(),
            raw_length: email.raw.len(),
            raw_sha256: hex::encode(Sha256::digest(&email.raw)),
        }
    }
}

/// An inbound email document as written to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistedEmailRecord {
    pub id: Uuid,
    #[serde(flatten)]
    pub document: EmailDocument,
}

/// A call to the generic webhook endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenericWebhook {
    pub received_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub content_type: Option<String>,
    pub payload: serde_json::Value,
}

/// Append-only persistence used by the webhook handlers and the pipeline.
#[async_trait]
pub trait EmailStore: Send + Sync {
    /// Insert one inbound email; the store assigns the id.
    async fn insert_email(
        &self,
        document: EmailDocument,
    ) -> Result<PersistedEmailRecord, StoreError>;

    /// Insert a batch of provider events, returning how many were written.
    async fn insert_events(&self, events: &[serde_json::Value]) -> Result<u64, StoreError>;

    /// Insert one generic webhook payload.
    async fn insert_webhook(&self, webhook: &GenericWebhook) -> Result<Uuid, StoreError>;
}
