//! Configuration module for environment variable parsing.
//!
//! Every setting has a default so the server can boot in development with an
//! empty environment; outbound calls simply fail (and are logged) until the
//! API settings are provided.

use std::env;
use std::time::Duration;
use tracing::warn;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// sqlx connection URL for the email store
    pub database_url: String,

    /// HTTP request timeout in milliseconds for outbound API calls
    pub request_timeout_ms: u64,

    /// Largest accepted request body; inbound emails carry their attachments
    pub max_body_bytes: usize,

    // =========================================================================
    // Notifier (transactional email API)
    // =========================================================================
    /// Base URL of the SendGrid-compatible mail API
    pub sendgrid_api_url: String,

    /// API key used as a bearer token for the mail API
    pub sendgrid_api_key: Option<String>,

    /// Sender address for confirmations and forwards
    pub notify_from_address: String,

    /// Operations mailbox that receives every forwarded message
    pub forward_to_address: String,

    /// Prefix prepended to the subject of forwarded messages
    pub forward_subject_prefix: String,

    /// Subject of the confirmation sent back to the original sender
    pub confirmation_subject: String,

    // =========================================================================
    // Recipient registrar (campaign API)
    // =========================================================================
    /// Base URL of the recipient registrar API
    pub registrar_api_url: String,

    /// Optional bearer token for the registrar API
    pub registrar_api_key: Option<String>,

    /// Campaign that extracted recipients are added to
    pub registrar_campaign_id: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            port: parse_number("PORT", 4000),

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:mailhook.db?mode=rwc".to_string()),

            request_timeout_ms: parse_number("REQUEST_TIMEOUT_MS", 10_000),

            max_body_bytes: parse_number("MAX_BODY_BYTES", 30 * 1024 * 1024),

            sendgrid_api_url: env::var("SENDGRID_API_URL")
                .unwrap_or_else(|_| "https://api.sendgrid.com".to_string()),

            sendgrid_api_key: non_empty("SENDGRID_API_KEY"),

            notify_from_address: env::var("NOTIFY_FROM_ADDRESS")
                .unwrap_or_else(|_| "no-reply@localhost".to_string()),

            forward_to_address: env::var("FORWARD_TO_ADDRESS")
                .unwrap_or_else(|_| "operations@localhost".to_string()),

            forward_subject_prefix: env::var("FORWARD_SUBJECT_PREFIX")
                .unwrap_or_else(|_| "Fwd: ".to_string()),

            confirmation_subject: env::var("CONFIRMATION_SUBJECT")
                .unwrap_or_else(|_| "We received your message".to_string()),

            registrar_api_url: env::var("REGISTRAR_API_URL")
                .unwrap_or_else(|_| "http://localhost:9000".to_string()),

            registrar_api_key: non_empty("REGISTRAR_API_KEY"),

            registrar_campaign_id: env::var("REGISTRAR_CAMPAIGN_ID")
                .unwrap_or_else(|_| "default".to_string()),
        }
    }

    /// Outbound request timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Parse a numeric variable, falling back to `default` when unset or invalid.
fn parse_number<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid numeric value, using default");
            default
        }
    }
}

/// Read a variable, treating an empty value as unset.
fn non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number_valid() {
        env::set_var("MAILHOOK_TEST_PORT", "8081");
        let result: u16 = parse_number("MAILHOOK_TEST_PORT", 0);
        assert_eq!(result, 8081);
        env::remove_var("MAILHOOK_TEST_PORT");
    }

    #[test]
    fn test_parse_number_invalid_uses_default() {
        env::set_var("MAILHOOK_TEST_TIMEOUT", "soon");
        let result: u64 = parse_number("MAILHOOK_TEST_TIMEOUT", 42);
        assert_eq!(result, 42);
        env::remove_var("MAILHOOK_TEST_TIMEOUT");
    }

    #[test]
    fn test_parse_number_default() {
        let result: u64 = parse_number("MAILHOOK_NONEXISTENT_VAR", 10);
        assert_eq!(result, 10);
    }

    #[test]
    fn test_non_empty_treats_blank_as_unset() {
        env::set_var("MAILHOOK_TEST_KEY", "   ");
        assert_eq!(non_empty("MAILHOOK_TEST_KEY"), None);
        env::set_var("MAILHOOK_TEST_KEY", " secret ");
        assert_eq!(non_empty("MAILHOOK_TEST_KEY"), Some("secret".to_string()));
        env::remove_var("MAILHOOK_TEST_KEY");
    }
}
