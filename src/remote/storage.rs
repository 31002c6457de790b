//! Object storage backend
//!
//! Images are uploaded into one public bucket, namespaced by record type.
//! The returned reference is the bucket's public URL for the object.

use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::info;

use super::rest::{auth_headers, ensure_success};
use super::ObjectStorage;
use crate::config::ServiceConfig;
use crate::error::{Result, SyncError};

/// Storage client for `{url}/storage/v1`
pub struct StorageClient {
    base_url: String,
    bucket: String,
    client: Client,
}

impl StorageClient {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = Client::builder()
            .default_headers(auth_headers(&config.anon_key)?)
            .build()?;

        Ok(Self {
            base_url: format!("{}/storage/v1", config.base_url()),
            bucket: config.storage_bucket.clone(),
            client,
        })
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/object/{}/{}", self.base_url, self.bucket, path)
    }

    /// Publicly addressable URL of an uploaded object
    pub fn public_url(&self, path: &str) -> String {
        format!("{}/object/public/{}/{}", self.base_url, self.bucket, path)
    }
}

#[async_trait]
impl ObjectStorage for StorageClient {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let size = bytes.len();
        let response = self
            .client
            .post(self.object_url(path))
            .header(header::CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .map_err(|e| SyncError::upload(path, e))?;

        ensure_success(response)
            .await
            .map_err(|e| SyncError::upload(path, e))?;

        info!(path, size, "uploaded image");
        Ok(self.public_url(path))
    }
}
