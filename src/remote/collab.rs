//! Collaborator interfaces consumed by the session layer.
//!
//! Neither is implemented here. The crypto provider protects credentials at
//! rest (see [`Credentials::from_sealed_password`]); the document store
//! receives command records through [`CommandJournal`].
//!
//! [`Credentials::from_sealed_password`]: crate::remote::auth::Credentials::from_sealed_password
//! [`CommandJournal`]: crate::remote::journal::CommandJournal

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use thiserror::Error;

/// PEM-encoded asymmetric key pair.
#[derive(Clone)]
pub struct KeyPair {
    pub private_pem: String,
    pub public_pem: String,
}

#[derive(Debug, Error)]
#[error("crypto provider failure: {0}")]
pub struct CryptoError(pub String);

/// Asymmetric encryption primitives (RSA-OAEP with SHA-256 in practice).
pub trait CryptoProvider: Send + Sync {
    fn generate_key_pair(&self) -> Result<KeyPair, CryptoError>;

    fn encrypt(&self, public_key: &str, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn decrypt(&self, private_key: &str, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Ordered key/value document with unique keys.
pub type Document = Map<String, Value>;

#[derive(Debug, Error)]
#[error("document store failure: {0}")]
pub struct StoreError(pub String);

/// Collection-scoped CRUD over documents, keyed by filter documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, collection: &str, doc: Document) -> Result<Value, StoreError>;

    async fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Document>,
    ) -> Result<Vec<Value>, StoreError>;

    async fn find_one(
        &self,
        collection: &str,
        filter: &Document,
    ) -> Result<Option<Document>, StoreError>;

    /// Matching documents, fetched as the stream is polled. A failure while
    /// paging ends the stream with an `Err` item.
    fn find_many(
        &self,
        collection: &str,
        filter: Document,
    ) -> BoxStream<'_, Result<Document, StoreError>>;

    async fn update_one(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> Result<u64, StoreError>;

    async fn update_many(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> Result<u64, StoreError>;

    async fn delete_one(&self, collection: &str, filter: &Document) -> Result<u64, StoreError>;

    async fn delete_many(&self, collection: &str, filter: &Document) -> Result<u64, StoreError>;

    async fn drop_collection(&self, collection: &str) -> Result<(), StoreError>;

    async fn drop_database(&self) -> Result<(), StoreError>;

    async fn list_collections(&self) -> Result<Vec<String>, StoreError>;

    async fn list_databases(&self) -> Result<Vec<String>, StoreError>;
}
