//! Mailhook Web Server - webhook receiver and inbound email relay.
//!
//! This binary:
//! - Receives inbound parse, delivery event and generic webhooks
//! - Runs the inbound email pipeline (register, confirm, forward, persist)
//! - Stores every payload in the document store
//!
//! The store pool and HTTP client are built once here and shared by all
//! requests.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use tokio::{net::TcpListener, signal};
use tracing::info;

use mailhook::process::{MimeParser, Pipeline, RecipientExtractor, RelaySettings};
use mailhook::services::{HttpRegistrar, SendGridNotifier};
use mailhook::store::SqliteStore;
use mailhook::web::{build_router, AppState};
use mailhook::{init_tracing, Config};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("web_server_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        port = config.port,
        sendgrid_key_configured = config.sendgrid_api_key.is_some(),
        registrar_key_configured = config.registrar_api_key.is_some(),
        registrar_campaign_id = %config.registrar_campaign_id,
        forward_to = %config.forward_to_address,
        request_timeout_ms = config.request_timeout_ms,
        "config_loaded"
    );

    let store = SqliteStore::connect(&config.database_url)
        .await
        .context("Failed to open email store")?;
    info!("email_store_ready");

    let client = Client::builder()
        .timeout(config.request_timeout())
        .build()
        .context("Failed to create HTTP client")?;

    let registrar = HttpRegistrar::new(
        client.clone(),
        &config.registrar_api_url,
        &config.registrar_campaign_id,
        config.registrar_api_key.clone(),
    )
    .context("Invalid REGISTRAR_API_URL")?;
    info!(endpoint = %registrar.endpoint(), "registrar_client_created");

    let notifier = SendGridNotifier::new(
        client,
        &config.sendgrid_api_url,
        config.sendgrid_api_key.clone(),
    )
    .context("Invalid SENDGRID_API_URL")?;

    let extractor = RecipientExtractor::new().context("Failed to compile recipient markers")?;
    info!(grammar_version = extractor.grammar_version(), "recipient_extractor_ready");

    let store_handle = Arc::new(store.clone());
    let pipeline = Pipeline::new(
        Arc::new(MimeParser),
        extractor,
        Arc::new(registrar),
        Arc::new(notifier),
        store_handle.clone(),
        RelaySettings::from(&config),
    );

    let state = AppState::new(config.clone(), pipeline, store_handle);
    let app = build_router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    store.close().await;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
