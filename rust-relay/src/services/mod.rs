//! Clients for the outbound HTTP services the pipeline calls.
//!
//! Each client sits behind a trait so the pipeline can be driven against
//! substitutes; the production implementations share one `reqwest::Client`.

pub mod notifier;
pub mod registrar;

pub use notifier::{Notifier, NotifierError, OutboundAttachment, OutboundEmail, SendGridNotifier};
pub use registrar::{HttpRegistrar, RecipientRegistrar, RegistrarError};
