//! Transactional email client (SendGrid v3 mail send API).
//!
//! Two messages are produced per inbound email:
//! - a confirmation back to the sender when a recipient was extracted
//! - a forwarded copy of the original, attachments included, to the
//!   operations mailbox

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::process::{Attachment, ExtractedRecipient, ParsedEmail};

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("invalid mail API endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("mail API request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("mail API rejected message with status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Attachment ready for the mail API: base64 content plus its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundAttachment {
    pub content: String,
    pub filename: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub disposition: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

impl From<&Attachment> for OutboundAttachment {
    fn from(attachment: &Attachment) -> Self {
        // Inline parts must carry a content id; without one they go as plain attachments.
        let disposition = match (&attachment.content_id, attachment.disposition.as_str()) {
            (None, "inline") => "attachment".to_string(),
            (_, disposition) => disposition.to_string(),
        };

        Self {
            content: STANDARD.encode(&attachment.content),
            filename: attachment.filename.clone(),
            content_type: attachment.content_type.clone(),
            disposition,
            content_id: attachment.content_id.clone(),
        }
    }
}

/// Provider-neutral description of an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub from: String,
    pub reply_to: Option<String>,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<OutboundAttachment>,
}

impl OutboundEmail {
    /// Thank-you note sent to the person who wrote in.
    pub fn confirmation(
        to: &str,
        from: &str,
        subject: &str,
        recipient: &ExtractedRecipient,
    ) -> Self {
        let text = format!(
            "Hi {},\n\nThanks for getting in touch. \
             We received your message and {} has been added to our list.\n",
            recipient.first_name, recipient.email_address
        );

        Self {
            to: to.to_string(),
            from: from.to_string(),
            reply_to: None,
            subject: subject.to_string(),
            text: Some(text),
            html: None,
            attachments: Vec::new(),
        }
    }

    /// Copy of the inbound message for the operations mailbox.
    pub fn forward_of(email: &ParsedEmail, to: &str, from: &str, subject_prefix: &str) -> Self {
        Self {
            to: to.to_string(),
            from: from.to_string(),
            reply_to: email.from.address.clone(),
            subject: format!("{}{}", subject_prefix, email.subject_or_empty()),
            text: email.text.clone(),
            html: email.html.clone(),
            attachments: email.attachments.iter().map(OutboundAttachment::from).collect(),
        }
    }
}

/// Sends transactional email.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), NotifierError>;
}

// =============================================================================
// SendGrid wire format
// =============================================================================

#[derive(Debug, Serialize)]
struct SendGridAddress<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<SendGridAddress<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct SendGridMail<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: SendGridAddress<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<SendGridAddress<'a>>,
    subject: &'a str,
    content: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "no_attachments")]
    attachments: &'a [OutboundAttachment],
}

fn no_attachments(attachments: &&[OutboundAttachment]) -> bool {
    attachments.is_empty()
}

impl<'a> From<&'a OutboundEmail> for SendGridMail<'a> {
    fn from(email: &'a OutboundEmail) -> Self {
        let mut content = Vec::with_capacity(2);
        if let Some(text) = email.text.as_deref().filter(|t| !t.is_empty()) {
            content.push(Content {
                content_type: "text/plain",
                value: text,
            });
        }
        if let Some(html) = email.html.as_deref().filter(|h| !h.is_empty()) {
            content.push(Content {
                content_type: "text/html",
                value: html,
            });
        }
        // The API refuses messages without at least one content block.
        if content.is_empty() {
            content.push(Content {
                content_type: "text/plain",
                value: " ",
            });
        }

        Self {
            personalizations: vec![Personalization {
                to: vec![SendGridAddress { email: &email.to }],
            }],
            from: SendGridAddress { email: &email.from },
            reply_to: email
                .reply_to
                .as_deref()
                .map(|address| SendGridAddress { email: address }),
            subject: &email.subject,
            content,
            attachments: &email.attachments,
        }
    }
}

/// Notifier backed by the SendGrid v3 `mail/send` endpoint.
#[derive(Debug, Clone)]
pub struct SendGridNotifier {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl SendGridNotifier {
    pub fn new(
        client: Client,
        base_url: &str,
        api_key: Option<String>,
    ) -> Result<Self, NotifierError> {
        Ok(Self {
            client,
            endpoint: send_endpoint(base_url)?,
            api_key,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Append the send path to the base URL, keeping any path prefix it already has.
fn send_endpoint(base_url: &str) -> Result<Url, NotifierError> {
    let mut url =
        Url::parse(base_url).map_err(|e| NotifierError::InvalidEndpoint(e.to_string()))?;

    url.path_segments_mut()
        .map_err(|_| NotifierError::InvalidEndpoint(base_url.to_string()))?
        .pop_if_empty()
        .extend(["v3", "mail", "send"]);

    Ok(url)
}

#[async_trait]
impl Notifier for SendGridNotifier {
    async fn send(&self, email: &OutboundEmail) -> Result<(), NotifierError> {
        let body = SendGridMail::from(email);

        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                to = %email.to,
                subject = %email.subject,
                status_code = status.as_u16(),
                "notifier_send_rejected"
            );
            return Err(NotifierError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        info!(
            to = %email.to,
            subject = %email.subject,
            attachment_count = email.attachments.len(),
            status_code = status.as_u16(),
            "notifier_send_complete"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{parse_raw_email, Mailbox};

    fn forward(parsed: &ParsedEmail) -> OutboundEmail {
        OutboundEmail::forward_of(parsed, "ops@example.org", "relay@example.org", "Fwd: ")
    }

    fn parsed_with_attachments(count: usize) -> ParsedEmail {
        ParsedEmail {
            from: Mailbox {
                address: Some("jane@example.com".to_string()),
                display: "Jane <jane@example.com>".to_string(),
            },
            subject: Some("Order".to_string()),
            text: Some("body".to_string()),
            attachments: (0..count)
                .map(|i| Attachment {
                    filename: format!("file-{}.pdf", i),
                    content_type: "application/pdf".to_string(),
                    disposition: "attachment".to_string(),
                    content_id: None,
                    content: vec![i as u8; 3],
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_forward_preserves_every_attachment() {
        let parsed = parsed_with_attachments(3);

        let forward = forward(&parsed);

        assert_eq!(forward.subject, "Fwd: Order");
        assert_eq!(forward.reply_to.as_deref(), Some("jane@example.com"));
        assert_eq!(forward.attachments.len(), 3);
        for (i, attachment) in forward.attachments.iter().enumerate() {
            assert_eq!(attachment.filename, format!("file-{}.pdf", i));
            assert_eq!(attachment.content_type, "application/pdf");
            assert_eq!(STANDARD.decode(&attachment.content).unwrap(), vec![i as u8; 3]);
        }
    }

    #[test]
    fn test_confirmation_addresses_first_name() {
        let recipient = ExtractedRecipient {
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            email_address: "a@b.com".to_string(),
        };

        let email = OutboundEmail::confirmation(
            "jane@example.com",
            "relay@example.org",
            "Thanks",
            &recipient,
        );

        assert_eq!(email.to, "jane@example.com");
        assert!(email.text.unwrap().starts_with("Hi Jane,"));
        assert!(email.attachments.is_empty());
    }

    #[test]
    fn test_sendgrid_body_shape() {
        let forward = forward(&parsed_with_attachments(1));

        let body = serde_json::to_value(SendGridMail::from(&forward)).unwrap();

        assert_eq!(body["personalizations"][0]["to"][0]["email"], "ops@example.org");
        assert_eq!(body["from"]["email"], "relay@example.org");
        assert_eq!(body["reply_to"]["email"], "jane@example.com");
        assert_eq!(body["content"][0]["type"], "text/plain");
        assert_eq!(body["attachments"][0]["type"], "application/pdf");
        assert_eq!(body["attachments"][0]["filename"], "file-0.pdf");
        assert_eq!(body["attachments"][0]["disposition"], "attachment");
        assert!(body["attachments"][0].get("content_id").is_none());
    }

    #[test]
    fn test_inline_image_forwarded_with_content_id() {
        let raw = concat!(
            "From: news@example.test\r\n",
            "Subject: Logo\r\n",
            "Content-Type: multipart/related; boundary=REL\r\n",
            "\r\n",
            "--REL\r\n",
            "Content-Type: text/html\r\n\r\n",
            "<img src=\"cid:logo1\">\r\n",
            "--REL\r\n",
            "Content-Type: image/png; name=\"logo.png\"\r\n",
            "Content-Disposition: inline; filename=\"logo.png\"\r\n",
            "Content-ID: <logo1>\r\n",
            "Content-Transfer-Encoding: base64\r\n\r\n",
            "AAEC\r\n",
            "--REL--\r\n",
        );
        let parsed = parse_raw_email(raw.as_bytes()).unwrap();

        let body = serde_json::to_value(SendGridMail::from(&forward(&parsed))).unwrap();

        assert_eq!(
            body["attachments"],
            serde_json::json!([{
                "content": "AAEC",
                "filename": "logo.png",
                "type": "image/png",
                "disposition": "inline",
                "content_id": "logo1"
            }])
        );
        assert_eq!(body["content"][0]["type"], "text/html");
    }

    #[test]
    fn test_inline_part_without_content_id_sent_as_attachment() {
        let attachment = Attachment {
            filename: "photo.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            disposition: "inline".to_string(),
            content_id: None,
            content: vec![1, 2, 3],
        };

        let outbound = OutboundAttachment::from(&attachment);

        assert_eq!(outbound.disposition, "attachment");
        assert!(outbound.content_id.is_none());
    }

    #[test]
    fn test_sendgrid_body_without_content_or_attachments() {
        let email = OutboundEmail {
            to: "ops@example.org".to_string(),
            from: "relay@example.org".to_string(),
            reply_to: None,
            subject: "Fwd: ".to_string(),
            text: None,
            html: None,
            attachments: Vec::new(),
        };

        let body = serde_json::to_value(SendGridMail::from(&email)).unwrap();

        assert_eq!(body["content"].as_array().unwrap().len(), 1);
        assert!(body.get("attachments").is_none());
        assert!(body.get("reply_to").is_none());
    }

    #[test]
    fn test_endpoint_joins_api_path() {
        let notifier =
            SendGridNotifier::new(Client::new(), "https://api.sendgrid.com", None).unwrap();

        assert_eq!(notifier.endpoint().as_str(), "https://api.sendgrid.com/v3/mail/send");
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        assert_eq!(
            send_endpoint("https://proxy.example.com/sendgrid").unwrap().as_str(),
            "https://proxy.example.com/sendgrid/v3/mail/send"
        );
        assert_eq!(
            send_endpoint("https://proxy.example.com/sendgrid/").unwrap().as_str(),
            "https://proxy.example.com/sendgrid/v3/mail/send"
        );
    }

    #[test]
    fn test_endpoint_invalid_base() {
        assert!(matches!(
            send_endpoint("mailto:ops@example.com"),
            Err(NotifierError::InvalidEndpoint(_))
        ));
    }
}
