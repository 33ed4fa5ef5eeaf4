//! Mailhook - webhook receiver and inbound email relay.
//!
//! Modules used by the `mailhook-web` binary:
//! - `web`: axum router, multipart decoding and webhook handlers
//! - `process`: MIME parsing, recipient extraction and the inbound pipeline
//! - `services`: registrar and transactional email clients
//! - `store`: append-only document store
//!
//! ## Architecture
//!
//! ```text
//! Inbound parse webhook → decode → Pipeline → registrar / notifier / store
//! Event + generic webhooks → store
//! ```

pub mod config;
pub mod process;
pub mod services;
pub mod store;
pub mod util;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use process::{ParsedEmail, Pipeline, PipelineOutcome, PipelineReport};
pub use store::{EmailStore, SqliteStore};
pub use util::init_tracing;
pub use web::{build_router, AppState};
