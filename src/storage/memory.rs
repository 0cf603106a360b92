// ABOUTME: In-memory object storage for tests and offline backups
// ABOUTME: Buckets can be made unlistable and individual files unsignable

use super::{ObjectStorage, StorageError, StoredFile};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
struct Inner {
    buckets: BTreeMap<String, Vec<StoredFile>>,
    unlistable: HashSet<String>,
    unsignable: HashSet<(String, String)>,
}

#[derive(Debug, Default)]
pub struct MemoryObjectStorage {
    inner: Mutex<Inner>,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, bucket: &str, file: StoredFile) {
        self.lock()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .push(file);
    }

    pub fn add_bucket(&self, bucket: &str) {
        self.lock().buckets.entry(bucket.to_string()).or_default();
    }

    /// Listing this bucket fails
    pub fn fail_listing(&self, bucket: &str) {
        self.lock().unlistable.insert(bucket.to_string());
    }

    /// Signing this file fails
    pub fn fail_signing(&self, bucket: &str, path: &str) {
        self.lock()
            .unsignable
            .insert((bucket.to_string(), path.to_string()));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn list_buckets(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.lock().buckets.keys().cloned().collect())
    }

    async fn list_files(&self, bucket: &str) -> Result<Vec<StoredFile>, StorageError> {
        let inner = self.lock();
        if inner.unlistable.contains(bucket) {
            return Err(StorageError::Http {
                status: 403,
                message: format!("listing '{}' is not permitted", bucket),
            });
        }
        inner
            .buckets
            .get(bucket)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(bucket.to_string()))
    }

    async fn signed_url(
        &self,
        bucket: &str,
        path: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        let inner = self.lock();
        if inner
            .unsignable
            .contains(&(bucket.to_string(), path.to_string()))
        {
            return Err(StorageError::Http {
                status: 500,
                message: format!("could not sign '{}/{}'", bucket, path),
            });
        }
        Ok(format!(
            "memory://{}/{}?expires_in={}",
            bucket,
            path,
            ttl.as_secs()
        ))
    }
}
