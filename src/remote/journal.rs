//! Optional record of executed commands in a [`DocumentStore`].

use std::sync::Arc;

use futures::stream::BoxStream;
use serde_json::{Value, json};
use tracing::debug;

use super::collab::{Document, DocumentStore, StoreError};
use super::types::{CommandResult, ConnectionInfo};

/// Default collection for command records
pub const DEFAULT_COLLECTION: &str = "command_history";

/// Writes one document per completed command.
pub struct CommandJournal {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl CommandJournal {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_collection(store, DEFAULT_COLLECTION)
    }

    pub fn with_collection(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Store `result` for `command` run over `connection`. Returns the id the
    /// store assigned.
    pub async fn record(
        &self,
        connection: &ConnectionInfo,
        command: &str,
        result: &CommandResult,
    ) -> Result<Value, StoreError> {
        let doc = command_document(connection, command, result);
        let id = self.store.insert(&self.collection, doc).await?;
        debug!(
            "Recorded command on {}@{} in {}",
            connection.username, connection.host, self.collection
        );
        Ok(id)
    }

    /// Records for `host`, in store order, read lazily from the store.
    pub fn history(&self, host: &str) -> BoxStream<'_, Result<Document, StoreError>> {
        let mut filter = Document::new();
        filter.insert("host".to_string(), Value::String(host.to_string()));
        self.store.find_many(&self.collection, filter)
    }
}

fn command_document(
    connection: &ConnectionInfo,
    command: &str,
    result: &CommandResult,
) -> Document {
    let value = json!({
        "connection_id": connection.connection_id,
        "host": connection.host,
        "port": connection.port,
        "username": connection.username,
        "command": command,
        "exit_code": result.exit_code,
        "exit_signal": result.exit_signal,
        "stdout": result.stdout_lossy(),
        "stderr": result.stderr_lossy(),
        "recorded_at": chrono::Utc::now().to_rfc3339(),
    });
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}
