//! Recipient registrar client - adds extracted contacts to a campaign.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::process::ExtractedRecipient;

#[derive(Debug, Error)]
pub enum RegistrarError {
    #[error("invalid registrar endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("registrar request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("registrar rejected recipient with status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Adds a recipient to the configured outreach campaign.
#[async_trait]
pub trait RecipientRegistrar: Send + Sync {
    async fn add_recipient(&self, recipient: &ExtractedRecipient) -> Result<(), RegistrarError>;
}

/// Wire format expected by the registrar API.
#[derive(Debug, Serialize, PartialEq)]
pub struct AddRecipientsRequest {
    pub recipients: Vec<RegistrarRecipient>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrarRecipient {
    pub first_name: String,
    pub last_name: String,
    pub mail_id: String,
}

impl From<&ExtractedRecipient> for AddRecipientsRequest {
    fn from(recipient: &ExtractedRecipient) -> Self {
        Self {
            recipients: vec![RegistrarRecipient {
                first_name: recipient.first_name.clone(),
                last_name: recipient.last_name.clone(),
                mail_id: recipient.email_address.clone(),
            }],
        }
    }
}

/// HTTP implementation posting to `{base}/campaigns/{campaign}/recipients`.
#[derive(Debug, Clone)]
pub struct HttpRegistrar {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl HttpRegistrar {
    pub fn new(
        client: Client,
        base_url: &str,
        campaign_id: &str,
        api_key: Option<String>,
    ) -> Result<Self, RegistrarError> {
        Ok(Self {
            client,
            endpoint: campaign_endpoint(base_url, campaign_id)?,
            api_key,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Build the recipients endpoint, percent-encoding the campaign id as one path segment.
fn campaign_endpoint(base_url: &str, campaign_id: &str) -> Result<Url, RegistrarError> {
    let mut url =
        Url::parse(base_url).map_err(|e| RegistrarError::InvalidEndpoint(e.to_string()))?;

    url.path_segments_mut()
        .map_err(|_| RegistrarError::InvalidEndpoint(base_url.to_string()))?
        .pop_if_empty()
        .extend(["campaigns", campaign_id, "recipients"]);

    Ok(url)
}

#[async_trait]
impl RecipientRegistrar for HttpRegistrar {
    async fn add_recipient(&self, recipient: &ExtractedRecipient) -> Result<(), RegistrarError> {
        let body = AddRecipientsRequest::from(recipient);

        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                endpoint = %self.endpoint,
                status_code = status.as_u16(),
                "registrar_add_rejected"
            );
            return Err(RegistrarError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        info!(
            endpoint = %self.endpoint,
            status_code = status.as_u16(),
            "registrar_add_complete"
        );
        debug!(mail_id = %recipient.email_address, "registrar_add_recipient_detail");

        Ok(())
    }
}
