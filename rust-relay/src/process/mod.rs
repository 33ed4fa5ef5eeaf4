//! Inbound email processing pipeline.
//!
//! ## Processing Flow
//!
//! ```text
//! raw bytes → parse → extract recipient → register → confirm → forward → persist
//! ```
//!
//! Only a parse failure stops the run. Registration, confirmation, forwarding
//! and persistence are each attempted once; a failure is recorded in the
//! [`PipelineReport`] and the next step still runs.

pub mod email_parser;
pub mod recipient;
pub mod report;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::services::{Notifier, OutboundEmail, RecipientRegistrar};
use crate::store::{EmailDocument, EmailStore};
use crate::Config;

pub use email_parser::{
    parse_raw_email, Attachment, EmailParser, Mailbox, MimeParser, ParseError, ParsedEmail,
};
pub use recipient::{ExtractedRecipient, MarkerGrammar, RecipientExtractor, MARKER_GRAMMAR_V1};
pub use report::{PipelineReport, Step, StepError, StepOutcome};

/// Addresses and subjects used for outgoing messages.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub from_address: String,
    pub forward_to_address: String,
    pub forward_subject_prefix: String,
    pub confirmation_subject: String,
}

impl From<&Config> for RelaySettings {
    fn from(config: &Config) -> Self {
        Self {
            from_address: config.notify_from_address.clone(),
            forward_to_address: config.forward_to_address.clone(),
            forward_subject_prefix: config.forward_subject_prefix.clone(),
            confirmation_subject: config.confirmation_subject.clone(),
        }
    }
}

/// Result of one pipeline run.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// The message parsed; side-effect outcomes are in the report.
    Processed(PipelineReport),
    /// The parser rejected the payload. Nothing else ran.
    Unparseable {
        correlation_id: String,
        error: ParseError,
    },
}

/// Sequences the collaborators for a single inbound email.
pub struct Pipeline {
    parser: Arc<dyn EmailParser>,
    extractor: RecipientExtractor,
    registrar: Arc<dyn RecipientRegistrar>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn EmailStore>,
    settings: RelaySettings,
}

impl Pipeline {
    pub fn new(
        parser: Arc<dyn EmailParser>,
        extractor: RecipientExtractor,
        registrar: Arc<dyn RecipientRegistrar>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn EmailStore>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            parser,
            extractor,
            registrar,
            notifier,
            store,
            settings,
        }
    }

    /// Run every step for one raw message.
    pub async fn run(&self, raw: &[u8]) -> PipelineOutcome {
        let received_at = Utc::now();
        let correlation_id = correlation_id(received_at, raw);

        info!(
            correlation_id = %correlation_id,
            raw_length = raw.len(),
            "inbound_email_pipeline_start"
        );

        let email = match self.parser.parse(raw) {
            Ok(email) => email,
            Err(e) => {
                error!(
                    correlation_id = %correlation_id,
                    raw_length = raw.len(),
                    error = %e,
                    "inbound_email_parse_failed"
                );
                return PipelineOutcome::Unparseable {
                    correlation_id,
                    error: e,
                };
            }
        };

        let mut report = PipelineReport::new(correlation_id, email.subject_or_empty().to_string());
        report.recipient = email
            .text
            .as_deref()
            .and_then(|text| self.extractor.extract(text));

        let outcome: StepOutcome = match &report.recipient {
            Some(recipient) => self.register(recipient).await.into(),
            None => StepOutcome::Skipped("no recipient in body"),
        };
        report.record(Step::RegisterRecipient, outcome);

        let outcome: StepOutcome = match (&report.recipient, email.from.address.as_deref()) {
            (None, _) => StepOutcome::Skipped("no recipient in body"),
            (Some(_), None) => StepOutcome::Skipped("sender address unresolved"),
            (Some(recipient), Some(sender)) => self.confirm(sender, recipient).await.into(),
        };
        report.record(Step::SendConfirmation, outcome);

        let outcome: StepOutcome = self.forward(&email).await.into();
        report.record(Step::ForwardMessage, outcome);

        let outcome = match self.persist(&email, received_at).await {
            Ok(id) => {
                report.record_id = Some(id);
                StepOutcome::Succeeded
            }
            Err(e) => StepOutcome::Failed(e),
        };
        report.record(Step::PersistEmail, outcome);

        report.log_summary();
        PipelineOutcome::Processed(report)
    }

    async fn register(&self, recipient: &ExtractedRecipient) -> Result<(), StepError> {
        self.registrar.add_recipient(recipient).await?;
        Ok(())
    }

    async fn confirm(&self, sender: &str, recipient: &ExtractedRecipient) -> Result<(), StepError> {
        let message = OutboundEmail::confirmation(
            sender,
            &self.settings.from_address,
            &self.settings.confirmation_subject,
            recipient,
        );
        self.notifier.send(&message).await?;
        Ok(())
    }

    async fn forward(&self, email: &ParsedEmail) -> Result<(), StepError> {
        let message = OutboundEmail::forward_of(
            email,
            &self.settings.forward_to_address,
            &self.settings.from_address,
            &self.settings.forward_subject_prefix,
        );
        self.notifier.send(&message).await?;
        Ok(())
    }

    async fn persist(
        &self,
        email: &ParsedEmail,
        received_at: DateTime<Utc>,
    ) -> Result<uuid::Uuid, StepError> {
        let record = self
            .store
            .insert_email(EmailDocument::new(email, received_at))
            .await?;
        Ok(record.id)
    }
}

/// Receipt time plus the first 12 hex digits of the payload digest.
fn correlation_id(received_at: DateTime<Utc>, raw: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(raw));
    format!("{}-{}", received_at.format("%Y%m%dT%H%M%S%.3fZ"), &digest[..12])
}
