//! SQLite-backed document store.
//!
//! Each collection is a table of `(id, received_at, document)` rows where
//! `document` is the JSON body of the record.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;
use uuid::Uuid;

use super::{
    Collection, EmailDocument, EmailStore, GenericWebhook, PersistedEmailRecord, StoreError,
};

/// Store over a shared `SqlitePool`, safe to clone across requests.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `database_url` and create the collections if absent.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        // An in-memory database lives only as long as its single connection.
        let in_memory = database_url.contains(":memory:");
        let mut options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            options = options
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>);
        }

        info!(in_memory = in_memory, "store_connecting");
        let pool = options.connect(database_url).await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create the collection tables. Safe to run on every start.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        for collection in [
            Collection::InboundEmails,
            Collection::SendgridEvents,
            Collection::GenericWebhooks,
        ] {
            sqlx::query(&format!(
                r#"CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    received_at TEXT NOT NULL,
                    document TEXT NOT NULL
                )"#,
                collection.table()
            ))
            .execute(&self.pool)
            .await?;
        }

        info!("store_migrations_complete");
        Ok(())
    }

    /// Number of documents in a collection.
    pub async fn count(&self, collection: Collection) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", collection.table()))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Raw JSON documents of a collection in insertion order.
    pub async fn documents(
        &self,
        collection: Collection,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        let rows: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT document FROM {} ORDER BY rowid",
            collection.table()
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| serde_json::from_str(row).map_err(StoreError::from))
            .collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl EmailStore for SqliteStore {
    async fn insert_email(
        &self,
        document: EmailDocument,
    ) -> Result<PersistedEmailRecord, StoreError> {
        let record = PersistedEmailRecord {
            id: Uuid::new_v4(),
            document,
        };
        let json = serde_json::to_string(&record)?;

        sqlx::query("INSERT INTO inbound_emails (id, received_at, document) VALUES (?, ?, ?)")
            .bind(record.id.hyphenated())
            .bind(record.document.received_at)
            .bind(json)
            .execute(&self.pool)
            .await?;

        info!(id = %record.id, "store_email_inserted");
        Ok(record)
    }

    async fn insert_events(&self, events: &[serde_json::Value]) -> Result<u64, StoreError> {
        let received_at = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for event in events {
            let result = sqlx::query(
                "INSERT INTO sendgrid_events (id, received_at, document) VALUES (?, ?, ?)",
            )
            .bind(Uuid::new_v4().hyphenated())
            .bind(received_at)
            .bind(serde_json::to_string(event)?)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;

        info!(inserted = inserted, "store_events_inserted");
        Ok(inserted)
    }

    async fn insert_webhook(&self, webhook: &GenericWebhook) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();

        sqlx::query("INSERT INTO generic_webhooks (id, received_at, document) VALUES (?, ?, ?)")
            .bind(id.hyphenated())
            .bind(webhook.received_at)
            .bind(serde_json::to_string(webhook)?)
            .execute(&self.pool)
            .await?;

        info!(id = %id, "store_webhook_inserted");
        Ok(id)
    }
}
