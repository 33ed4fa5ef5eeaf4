//! RFC 5322 Email Parser using mailparse.
//!
//! Converts the raw bytes delivered by the inbound parse webhook into a
//! [`ParsedEmail`]: addresses, subject, text and HTML bodies, headers and
//! attachments. MIME decoding itself is delegated to `mailparse`.

use std::collections::BTreeMap;

use mailparse::{
    addrparse_header, parse_mail, DispositionType, MailAddr, MailHeaderMap, ParsedMail,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised when the raw payload cannot be turned into a message.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("MIME parse failed: {0}")]
    Mime(#[from] mailparse::MailParseError),

    #[error("payload has no header section")]
    NoHeaders,
}

/// A mailbox taken from an address header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Mailbox {
    /// Bare address of the first mailbox in the header, if one could be parsed
    pub address: Option<String>,
    /// Header value as it appeared in the message
    pub display: String,
}

/// A non-body MIME part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    /// `attachment` or `inline`
    pub disposition: String,
    /// `Content-ID` without its angle brackets, referenced by `cid:` URLs in the HTML body
    pub content_id: Option<String>,
    pub content: Vec<u8>,
}

/// Parsed email result.
#[derive(Debug, Clone, Default)]
pub struct ParsedEmail {
    pub from: Mailbox,
    pub to: Mailbox,
    pub subject: Option<String>,
    /// First `text/plain` body part
    pub text: Option<String>,
    /// First `text/html` body part
    pub html: Option<String>,
    /// Header values keyed by lower-cased name; the last occurrence wins
    pub headers: BTreeMap<String, String>,
    pub attachments: Vec<Attachment>,
    /// The bytes this message was parsed from
    pub raw: Vec<u8>,
}

impl ParsedEmail {
    /// Subject, or an empty string when the header is absent.
    pub fn subject_or_empty(&self) -> &str {
        self.subject.as_deref().unwrap_or("")
    }
}

/// Seam for the MIME parser so the pipeline can run against a substitute.
pub trait EmailParser: Send + Sync {
    fn parse(&self, raw: &[u8]) -> Result<ParsedEmail, ParseError>;
}

/// Production parser backed by `mailparse`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MimeParser;

impl EmailParser for MimeParser {
    fn parse(&self, raw: &[u8]) -> Result<ParsedEmail, ParseError> {
        parse_raw_email(raw)
    }
}

/// Parse raw RFC 5322 email content.
pub fn parse_raw_email(raw: &[u8]) -> Result<ParsedEmail, ParseError> {
    info!(raw_length = raw.len(), "email_parse_start");

    let mail = parse_mail(raw)?;

    if mail.headers.is_empty() {
        warn!(raw_length = raw.len(), "email_parse_no_headers");
        return Err(ParseError::NoHeaders);
    }

    let from = mailbox(&mail, "From");
    let to = mailbox(&mail, "To");
    let subject = mail.headers.get_first_value("Subject");
    let headers = collect_headers(&mail);

    let mut bodies = Bodies::default();
    let mut attachments = Vec::new();
    walk_parts(&mail, &mut bodies, &mut attachments);

    info!(
        from = %from.display,
        subject = ?subject,
        has_text = bodies.text.is_some(),
        has_html = bodies.html.is_some(),
        header_count = headers.len(),
        attachment_count = attachments.len(),
        "email_parse_complete"
    );

    Ok(ParsedEmail {
        from,
        to,
        subject,
        text: bodies.text,
        html: bodies.html,
        headers,
        attachments,
        raw: raw.to_vec(),
    })
}

/// Read an address header, keeping the raw value and the first bare address.
fn mailbox(mail: &ParsedMail, name: &str) -> Mailbox {
    let Some(header) = mail.headers.get_first_header(name) else {
        return Mailbox::default();
    };

    let display = header.get_value();
    let address = match addrparse_header(header) {
        Ok(list) => list.iter().find_map(|addr| match addr {
            MailAddr::Single(single) => Some(single.addr.clone()),
            MailAddr::Group(group) => group.addrs.first().map(|single| single.addr.clone()),
        }),
        Err(e) => {
            warn!(header = name, error = %e, "email_address_parse_failed");
            None
        }
    };

    Mailbox {
        address: address.filter(|a| !a.is_empty()),
        display,
    }
}

/// Collect headers into a lower-cased map. Later duplicates replace earlier ones.
fn collect_headers(mail: &ParsedMail) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for header in &mail.headers {
        map.insert(header.get_key().to_ascii_lowercase(), header.get_value());
    }
    map
}

#[derive(Default)]
struct Bodies {
    text: Option<String>,
    html: Option<String>,
}

/// Depth-first walk of the MIME tree, filling bodies and attachments in order.
fn walk_parts(part: &ParsedMail, bodies: &mut Bodies, attachments: &mut Vec<Attachment>) {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            walk_parts(sub, bodies, attachments);
        }
        return;
    }

    let mimetype = part.ctype.mimetype.to_ascii_lowercase();
    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned();

    let is_attachment = matches!(disposition.disposition, DispositionType::Attachment)
        || filename.is_some();

    // Only the first plain and first HTML part are bodies; any other leaf is
    // kept as an attachment so nothing is dropped from the forward.
    if !is_attachment {
        let slot = match mimetype.as_str() {
            "text/plain" => Some(&mut bodies.text),
            "text/html" => Some(&mut bodies.html),
            _ => None,
        };
        if let Some(slot) = slot.filter(|slot| slot.is_none()) {
            match part.get_body() {
                Ok(body) => *slot = Some(body),
                Err(e) => {
                    warn!(content_type = %mimetype, error = %e, "email_body_extraction_failed")
                }
            }
            return;
        }
    }

    let content = match part.get_body_raw() {
        Ok(content) => content,
        Err(e) => {
            warn!(content_type = %mimetype, error = %e, "email_attachment_decode_failed");
            return;
        }
    };

    let content_id = part
        .headers
        .get_first_value("Content-ID")
        .map(|id| id.trim().trim_start_matches('<').trim_end_matches('>').to_string())
        .filter(|id| !id.is_empty());

    let disposition = match disposition.disposition {
        DispositionType::Inline => "inline",
        _ => "attachment",
    };

    attachments.push(Attachment {
        filename: filename.unwrap_or_else(|| default_filename(attachments.len() + 1, &mimetype)),
        content_type: mimetype,
        disposition: disposition.to_string(),
        content_id,
        content,
    });
}

/// Name for a part that carries none, with an extension for common types.
fn default_filename(index: usize, mimetype: &str) -> String {
    let extension = match mimetype {
        "text/calendar" => ".ics",
        "text/plain" => ".txt",
        "text/html" => ".html",
        "text/csv" => ".csv",
        "message/rfc822" => ".eml",
        _ => "",
    };
    format!("attachment-{}{}", index, extension)
}
