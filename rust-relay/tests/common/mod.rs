#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::Router;
use mailhook::process::{
    EmailParser, ExtractedRecipient, MimeParser, ParseError, ParsedEmail, Pipeline,
    RecipientExtractor, RelaySettings,
};
use mailhook::services::{
    Notifier, NotifierError, OutboundEmail, RecipientRegistrar, RegistrarError,
};
use mailhook::store::{
    EmailDocument, EmailStore, GenericWebhook, PersistedEmailRecord, SqliteStore, StoreError,
};
use mailhook::{build_router, AppState, Config};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const FROM_ADDRESS: &str = "relay@mailhook.test";
pub const OPS_ADDRESS: &str = "ops@mailhook.test";

pub const SIGNUP_EMAIL: &str = concat!(
    "From: Jane Doe <jane@example.com>\r\n",
    "To: inbox@mailhook.test\r\n",
    "Subject: Sign me up\r\n",
    "Content-Type: text/plain\r\n",
    "\r\n",
    "Hello!\r\n",
    "  DelightEmail: a@b.com\r\n",
    "delightname: Jane Doe\r\n",
);

pub const EMAIL_MARKER_ONLY: &str = concat!(
    "From: jane@example.com\r\n",
    "Subject: Question\r\n",
    "Content-Type: text/plain\r\n",
    "\r\n",
    "delightemail: a@b.com\r\n",
    "No name given.\r\n",
);

pub const NO_SENDER: &str = concat!(
    "Subject: Anonymous signup\r\n",
    "Content-Type: text/plain\r\n",
    "\r\n",
    "delightemail: anon@b.com\r\n",
    "delightname: Anon\r\n",
);

pub const WITH_ATTACHMENTS: &str = concat!(
    "From: jane@example.com\r\n",
    "Subject: Documents\r\n",
    "MIME-Version: 1.0\r\n",
    "Content-Type: multipart/mixed; boundary=BOUND\r\n",
    "\r\n",
    "--BOUND\r\n",
    "Content-Type: text/plain\r\n\r\n",
    "delightemail: a@b.com\r\n",
    "delightname: Jane Doe\r\n",
    "--BOUND\r\n",
    "Content-Type: application/pdf; name=\"invoice.pdf\"\r\n",
    "Content-Disposition: attachment; filename=\"invoice.pdf\"\r\n",
    "Content-Transfer-Encoding: base64\r\n\r\n",
    "JVBERi0xLjQ=\r\n",
    "--BOUND\r\n",
    "Content-Type: text/csv; name=\"rows.csv\"\r\n",
    "Content-Disposition: attachment; filename=\"rows.csv\"\r\n\r\n",
    "a,b\r\n",
    "--BOUND--\r\n",
);

// =============================================================================
// Collaborator fakes
// =============================================================================

#[derive(Default)]
pub struct RecordingRegistrar {
    pub fail: bool,
    pub calls: Mutex<Vec<ExtractedRecipient>>,
}

impl RecordingRegistrar {
    pub fn calls(&self) -> Vec<ExtractedRecipient> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecipientRegistrar for RecordingRegistrar {
    async fn add_recipient(&self, recipient: &ExtractedRecipient) -> Result<(), RegistrarError> {
        self.calls.lock().unwrap().push(recipient.clone());
        if self.fail {
            return Err(RegistrarError::Status {
                status: 503,
                body: "connection reset".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub fail: bool,
    pub sent: Mutex<Vec<OutboundEmail>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, email: &OutboundEmail) -> Result<(), NotifierError> {
        self.sent.lock().unwrap().push(email.clone());
        if self.fail {
            return Err(NotifierError::Status {
                status: 500,
                body: "mail API down".to_string(),
            });
        }
        Ok(())
    }
}

/// Store whose every write fails.
pub struct FailingStore;

#[async_trait]
impl EmailStore for FailingStore {
    async fn insert_email(&self, _: EmailDocument) -> Result<PersistedEmailRecord, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolClosed))
    }

    async fn insert_events(&self, _: &[serde_json::Value]) -> Result<u64, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolClosed))
    }

    async fn insert_webhook(&self, _: &GenericWebhook) -> Result<Uuid, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolClosed))
    }
}

/// Parser that rejects every payload.
pub struct RejectingParser;

impl EmailParser for RejectingParser {
    fn parse(&self, _: &[u8]) -> Result<ParsedEmail, ParseError> {
        Err(ParseError::NoHeaders)
    }
}

// =============================================================================
// Harness
// =============================================================================

#[derive(Default, Clone, Copy)]
pub struct Faults {
    pub parser: bool,
    pub registrar: bool,
    pub notifier: bool,
    pub store: bool,
}

pub struct Harness {
    pub registrar: Arc<RecordingRegistrar>,
    pub notifier: Arc<RecordingNotifier>,
    pub sqlite: SqliteStore,
    faults: Faults,
}

impl Harness {
    pub async fn new(faults: Faults) -> Self {
        Self {
            registrar: Arc::new(RecordingRegistrar {
                fail: faults.registrar,
                ..Default::default()
            }),
            notifier: Arc::new(RecordingNotifier {
                fail: faults.notifier,
                ..Default::default()
            }),
            sqlite: SqliteStore::connect("sqlite::memory:").await.unwrap(),
            faults,
        }
    }

    pub fn settings() -> RelaySettings {
        RelaySettings {
            from_address: FROM_ADDRESS.to_string(),
            forward_to_address: OPS_ADDRESS.to_string(),
            forward_subject_prefix: "Fwd: ".to_string(),
            confirmation_subject: "Thanks for writing".to_string(),
        }
    }

    pub fn store(&self) -> Arc<dyn EmailStore> {
        if self.faults.store {
            Arc::new(FailingStore)
        } else {
            Arc::new(self.sqlite.clone())
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        let parser: Arc<dyn EmailParser> = if self.faults.parser {
            Arc::new(RejectingParser)
        } else {
            Arc::new(MimeParser)
        };

        Pipeline::new(
            parser,
            RecipientExtractor::new().unwrap(),
            self.registrar.clone(),
            self.notifier.clone(),
            self.store(),
            Self::settings(),
        )
    }

    pub fn router(&self) -> Router {
        let state = AppState::new(Config::from_env(), self.pipeline(), self.store());
        build_router(state)
    }

    /// Serve the router on an ephemeral port.
    pub async fn serve(&self) -> (String, JoinHandle<()>) {
        serve_router(self.router()).await
    }
}

pub async fn serve_router(app: Router) -> (String, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), handle)
}

/// Base URL of a port nothing listens on.
pub async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

// =============================================================================
// Remote API stub
// =============================================================================

/// One request seen by [`StubApi`].
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub path: String,
    pub authorization: Option<String>,
    pub body: serde_json::Value,
}

/// HTTP server answering every request with a fixed status and recording it.
#[derive(Clone)]
pub struct StubApi {
    status: StatusCode,
    received: Arc<Mutex<Vec<ReceivedRequest>>>,
}

impl StubApi {
    pub async fn start(status: StatusCode) -> (Self, String, JoinHandle<()>) {
        let stub = Self {
            status,
            received: Arc::default(),
        };
        let app = Router::new().fallback(record_request).with_state(stub.clone());
        let (base, handle) = serve_router(app).await;
        (stub, base, handle)
    }

    pub fn received(&self) -> Vec<ReceivedRequest> {
        self.received.lock().unwrap().clone()
    }
}

async fn record_request(
    State(stub): State<StubApi>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    stub.received.lock().unwrap().push(ReceivedRequest {
        path: uri.path().to_string(),
        authorization,
        body: serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null),
    });
    (stub.status, "stub response")
}
