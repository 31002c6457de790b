//! Seams to the hosted data service.
//!
//! The store only talks to these three traits. `rest`, `storage` and
//! `realtime` implement them over HTTPS and WebSocket; tests plug in fakes.

pub mod realtime;
pub mod rest;
pub mod storage;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

pub use realtime::RealtimeClient;
pub use rest::RestClient;
pub use storage::StorageClient;

/// Row queries against the relational service
#[async_trait]
pub trait RowService: Send + Sync {
    /// All rows of `table`, newest first
    async fn select_all(&self, table: &str) -> Result<Vec<Value>>;

    /// Insert a row and return it as stored, with its assigned id
    async fn insert(&self, table: &str, row: Value) -> Result<Value>;

    /// Update the row with `id` and return it as stored
    async fn update(&self, table: &str, id: &str, row: Value) -> Result<Value>;

    async fn delete(&self, table: &str, id: &str) -> Result<()>;
}

/// Object storage for uploaded images
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Upload `bytes` at `path` and return its public URL
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;
}

/// Row-level change notification
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    Insert(Value),
    Update(Value),
    /// Deletes only carry the old row's id
    Delete { id: String },
}

/// Change-data-capture subscriptions, one per table
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Start receiving changes for `table`. The receiver ends when the
    /// subscription is dropped by either side.
    async fn subscribe(&self, table: &str) -> Result<mpsc::Receiver<RowChange>>;

    async fn unsubscribe(&self, table: &str) -> Result<()>;

    /// Release the underlying connection
    async fn close(&self) {}
}
