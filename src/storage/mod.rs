// ABOUTME: Object storage seam used by backups to enumerate buckets and sign file URLs
// ABOUTME: HTTP backend for the hosted storage API plus an in-memory backend for tests

pub mod http;
pub mod memory;

pub use http::HttpObjectStorage;
pub use memory::MemoryObjectStorage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metadata for one stored file as recorded in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    /// Path within the bucket
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Short-lived signed download URL; empty when signing failed
    #[serde(default)]
    pub url: Option<String>,
}

impl StoredFile {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: None,
            updated_at: None,
            url: None,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("storage request failed with HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("storage network error: {0}")]
    Network(String),

    #[error("bucket or object not found: {0}")]
    NotFound(String),

    #[error("unexpected storage response: {0}")]
    Decode(String),
}

/// Binary object storage grouped into buckets
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn list_buckets(&self) -> Result<Vec<String>, StorageError>;

    /// Every file in a bucket, without URLs
    async fn list_files(&self, bucket: &str) -> Result<Vec<StoredFile>, StorageError>;

    async fn signed_url(
        &self,
        bucket: &str,
        path: &str,
        ttl: Duration,
    ) -> Result<String, StorageError>;
}
