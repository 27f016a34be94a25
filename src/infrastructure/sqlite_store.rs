use crate::infrastructure::document_store::{
    Document, DocumentSubscription, Patch, RemoteDocumentStore, SubscriptionHub, shallow_merge,
};
use crate::infrastructure::error::SyncError;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Durable store for a single process: documents live in SQLite, pushes fan
/// out to subscribers inside this process only.
#[derive(Debug)]
pub struct SqliteDocumentStore {
    db_path: PathBuf,
    hub: SubscriptionHub,
    write_guard: Mutex<()>,
}

impl SqliteDocumentStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            hub: SubscriptionHub::default(),
            write_guard: Mutex::new(()),
        }
    }

    fn connect(&self) -> Result<Connection, SyncError> {
        Connection::open(&self.db_path).map_err(SyncError::from)
    }

    fn load(connection: &Connection, key: &str) -> Result<Option<Document>, SyncError> {
        let body: Option<String> = connection
            .query_row(
                "SELECT body FROM documents WHERE doc_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        let Some(body) = body else {
            return Ok(None);
        };
        match serde_json::from_str::<Document>(&body) {
            Ok(document) => Ok(Some(document)),
            Err(error) => {
                log::warn!("stored document key={key} is not valid JSON: {error}");
                Ok(Some(Document::Null))
            }
        }
    }
}

#[async_trait]
impl RemoteDocumentStore for SqliteDocumentStore {
    async fn read(&self, key: &str) -> Result<Option<Document>, SyncError> {
        let connection = self.connect()?;
        Self::load(&connection, key)
    }

    async fn write(&self, key: &str, patch: Patch) -> Result<(), SyncError> {
        let merged = {
            let _guard = self
                .write_guard
                .lock()
                .map_err(|error| SyncError::poisoned("sqlite store", error))?;
            let connection = self.connect()?;
            let merged = shallow_merge(Self::load(&connection, key)?, patch);
            connection.execute(
                "INSERT INTO documents (doc_key, body, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(doc_key) DO UPDATE SET
                   body = excluded.body,
                   updated_at = excluded.updated_at",
                params![key, serde_json::to_string(&merged)?, Utc::now().to_rfc3339()],
            )?;
            merged
        };
        self.hub.publish(key, &merged)?;
        Ok(())
    }

    fn subscribe(&self, key: &str) -> Result<DocumentSubscription, SyncError> {
        self.hub.subscribe(key)
    }
}
