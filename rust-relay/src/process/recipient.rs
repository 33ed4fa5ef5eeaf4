//! Recipient extraction from plain-text email bodies.
//!
//! Senders fill in a small form inside the message body:
//!
//! ```text
//! delightname: Jane Doe
//! delightemail: jane@example.com
//! ```
//!
//! Both markers are matched case-insensitively anywhere on a line, with
//! optional spaces or tabs around the colon. The email marker captures one
//! `local@domain.tld` token; the name marker captures the rest of its line.
//! The HTML body is never scanned.

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tracing::debug;

/// Labels and version of the marker grammar understood by the extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerGrammar {
    pub version: u32,
    pub email_label: &'static str,
    pub name_label: &'static str,
}

/// The grammar currently published to senders.
pub const MARKER_GRAMMAR_V1: MarkerGrammar = MarkerGrammar {
    version: 1,
    email_label: "delightemail",
    name_label: "delightname",
};

/// A contact found in the body of an inbound email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedRecipient {
    pub first_name: String,
    /// Empty when the name marker held a single word
    pub last_name: String,
    pub email_address: String,
}

/// Compiled form of a [`MarkerGrammar`].
#[derive(Debug, Clone)]
pub struct RecipientExtractor {
    version: u32,
    email: Regex,
    name: Regex,
}

impl RecipientExtractor {
    /// Compile the current grammar.
    pub fn new() -> Result<Self, regex::Error> {
        Self::from_grammar(&MARKER_GRAMMAR_V1)
    }

    pub fn from_grammar(grammar: &MarkerGrammar) -> Result<Self, regex::Error> {
        let email = RegexBuilder::new(&format!(
            r"{}[ \t]*:[ \t]*([^\s@]+@[^\s@]+\.[^\s@]+)",
            regex::escape(grammar.email_label)
        ))
        .case_insensitive(true)
        .build()?;

        // `.` stops at '\n', so the capture never spills into the next line.
        let name = RegexBuilder::new(&format!(
            r"{}[ \t]*:[ \t]*(.*)",
            regex::escape(grammar.name_label)
        ))
        .case_insensitive(true)
        .build()?;

        Ok(Self {
            version: grammar.version,
            email,
            name,
        })
    }

    pub fn grammar_version(&self) -> u32 {
        self.version
    }

    /// Extract a recipient from a plain-text body.
    ///
    /// Returns `None` unless both markers are present with non-empty values.
    pub fn extract(&self, text: &str) -> Option<ExtractedRecipient> {
        let email_address = self
            .email
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string());

        let full_name = self
            .name
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|name| !name.is_empty());

        let (email_address, full_name) = match (email_address, full_name) {
            (Some(email), Some(name)) => (email, name),
            (email, name) => {
                debug!(
                    grammar_version = self.version,
                    has_email_marker = email.is_some(),
                    has_name_marker = name.is_some(),
                    "recipient_markers_incomplete"
                );
                return None;
            }
        };

        let (first_name, last_name) = split_name(&full_name);

        debug!(
            grammar_version = self.version,
            email_address = %email_address,
            first_name = %first_name,
            "recipient_extracted"
        );

        Some(ExtractedRecipient {
            first_name,
            last_name,
            email_address,
        })
    }
}

/// Split on the first whitespace run: the head is the first name, the rest the last name.
fn split_name(full_name: &str) -> (String, String) {
    match full_name.split_once(char::is_whitespace) {
        Some((first, rest)) => (first.trim().to_string(), rest.trim().to_string()),
        None => (full_name.to_string(), String::new()),
    }
}
