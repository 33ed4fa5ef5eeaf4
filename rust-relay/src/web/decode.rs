//! Raw email extraction from the inbound parse multipart form.
//!
//! The provider posts the full MIME message under the `email` field, either
//! as an uploaded file or as a plain text field. Only the first occurrence of
//! each kind is kept; a file part wins over a text field.

use axum::extract::multipart::{Multipart, MultipartError};
use thiserror::Error;
use tracing::{debug, info};

/// Form field carrying the raw message.
pub const EMAIL_FIELD: &str = "email";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no email payload in request")]
    MissingPayload,

    #[error("malformed multipart body: {0}")]
    Malformed(#[from] MultipartError),
}

/// Where the raw message came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadSource {
    File(Vec<u8>),
    Field(Vec<u8>),
    Absent,
}

impl PayloadSource {
    pub fn kind(&self) -> &'static str {
        match self {
            PayloadSource::File(_) => "file",
            PayloadSource::Field(_) => "field",
            PayloadSource::Absent => "absent",
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>, DecodeError> {
        match self {
            PayloadSource::File(bytes) | PayloadSource::Field(bytes) => Ok(bytes),
            PayloadSource::Absent => Err(DecodeError::MissingPayload),
        }
    }
}

/// The `email` entries of one form submission.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RawEmailSubmission {
    /// First uploaded file named `email`
    pub file: Option<Vec<u8>>,
    /// First text field named `email`
    pub field: Option<String>,
}

impl RawEmailSubmission {
    /// Read the form, keeping the first file part and the first text field.
    pub async fn read(multipart: &mut Multipart) -> Result<Self, DecodeError> {
        let mut submission = Self::default();

        while let Some(field) = multipart.next_field().await? {
            if field.name() != Some(EMAIL_FIELD) {
                debug!(field = ?field.name(), "inbound_form_field_ignored");
                continue;
            }

            if field.file_name().is_some() {
                if submission.file.is_none() {
                    submission.file = Some(field.bytes().await?.to_vec());
                }
            } else if submission.field.is_none() {
                submission.field = Some(field.text().await?);
            }
        }

        Ok(submission)
    }

    /// Resolve the payload. Empty entries count as absent.
    pub fn source(self) -> PayloadSource {
        match (self.file, self.field) {
            (Some(file), _) if !file.is_empty() => PayloadSource::File(file),
            (_, Some(field)) if !field.is_empty() => PayloadSource::Field(field.into_bytes()),
            _ => PayloadSource::Absent,
        }
    }
}

/// Decode a multipart submission into raw message bytes.
pub async fn decode_email(multipart: &mut Multipart) -> Result<Vec<u8>, DecodeError> {
    let source = RawEmailSubmission::read(multipart).await?.source();

    info!(source = source.kind(), "inbound_email_payload_source");

    source.into_bytes()
}
