//! Step outcomes for one run of the inbound email pipeline.

use std::fmt;

use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::process::ExtractedRecipient;
use crate::services::{NotifierError, RegistrarError};
use crate::store::StoreError;

/// Side-effecting steps, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    RegisterRecipient,
    SendConfirmation,
    ForwardMessage,
    PersistEmail,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::RegisterRecipient => "register_recipient",
            Step::SendConfirmation => "send_confirmation",
            Step::ForwardMessage => "forward_message",
            Step::PersistEmail => "persist_email",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single best-effort step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Registrar(#[from] RegistrarError),

    #[error(transparent)]
    Notifier(#[from] NotifierError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub enum StepOutcome {
    Succeeded,
    Skipped(&'static str),
    Failed(StepError),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StepOutcome::Skipped(_))
    }
}

impl From<Result<(), StepError>> for StepOutcome {
    fn from(result: Result<(), StepError>) -> Self {
        match result {
            Ok(()) => StepOutcome::Succeeded,
            Err(e) => StepOutcome::Failed(e),
        }
    }
}

/// Everything that happened after a message parsed successfully.
#[derive(Debug)]
pub struct PipelineReport {
    /// Receipt timestamp plus a digest prefix of the raw bytes
    pub correlation_id: String,
    pub subject: String,
    pub recipient: Option<ExtractedRecipient>,
    /// Store id of the persisted email, when persistence succeeded
    pub record_id: Option<Uuid>,
    steps: Vec<(Step, StepOutcome)>,
}

impl PipelineReport {
    pub fn new(correlation_id: String, subject: String) -> Self {
        Self {
            correlation_id,
            subject,
            recipient: None,
            record_id: None,
            steps: Vec::with_capacity(4),
        }
    }

    /// Record a step outcome, logging failures and skips as they happen.
    pub fn record(&mut self, step: Step, outcome: StepOutcome) {
        match &outcome {
            StepOutcome::Succeeded => info!(
                step = %step,
                correlation_id = %self.correlation_id,
                "pipeline_step_succeeded"
            ),
            StepOutcome::Skipped(reason) => info!(
                step = %step,
                reason = *reason,
                correlation_id = %self.correlation_id,
                "pipeline_step_skipped"
            ),
            StepOutcome::Failed(e) => error!(
                step = %step,
                error = %e,
                correlation_id = %self.correlation_id,
                subject = %self.subject,
                "pipeline_step_failed"
            ),
        }
        self.steps.push((step, outcome));
    }

    pub fn steps(&self) -> &[(Step, StepOutcome)] {
        &self.steps
    }

    pub fn outcome(&self, step: Step) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, outcome)| outcome)
    }

    pub fn failed_steps(&self) -> Vec<Step> {
        self.steps
            .iter()
            .filter(|(_, outcome)| outcome.is_failure())
            .map(|(step, _)| *step)
            .collect()
    }

    /// Emit one summary event for the whole run.
    pub fn log_summary(&self) {
        let failed: Vec<&str> = self.failed_steps().into_iter().map(Step::as_str).collect();
        let succeeded = self.steps.iter().filter(|(_, o)| o.is_success()).count();
        let skipped = self.steps.iter().filter(|(_, o)| o.is_skipped()).count();

        if failed.is_empty() {
            info!(
                correlation_id = %self.correlation_id,
                subject = %self.subject,
                has_recipient = self.recipient.is_some(),
                record_id = ?self.record_id,
                succeeded = succeeded,
                skipped = skipped,
                "inbound_email_pipeline_complete"
            );
        } else {
            warn!(
                correlation_id = %self.correlation_id,
                subject = %self.subject,
                has_recipient = self.recipient.is_some(),
                record_id = ?self.record_id,
                succeeded = succeeded,
                skipped = skipped,
                failed_steps = ?failed,
                "inbound_email_pipeline_partial"
            );
        }
    }
}
