// ABOUTME: Object storage client for a hosted storage REST API
// ABOUTME: Lists buckets and objects (walking folders) and creates signed download URLs

use super::{ObjectStorage, StorageError, StoredFile};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const LIST_PAGE_SIZE: usize = 1000;

#[derive(Debug, Deserialize)]
struct BucketEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ObjectEntry {
    name: String,
    /// Folders come back without an id
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    metadata: Option<ObjectMetadata>,
}

#[derive(Debug, Deserialize)]
struct ObjectMetadata {
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    mimetype: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    #[serde(rename = "signedURL", alias = "signedUrl")]
    signed_url: String,
}

/// Storage REST client authenticated with a service key
#[derive(Debug, Clone)]
pub struct HttpObjectStorage {
    client: reqwest::Client,
    /// Project URL, e.g. `https://project.example.co`
    base_url: String,
    api_key: String,
}

impl HttpObjectStorage {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/storage/v1/{}", self.base_url, path)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        subject: &str,
    ) -> Result<T, StorageError> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(subject.to_string()));
        }
        if !status.is_success() {
            return Err(StorageError::Http {
                status: status.as_u16(),
                message: body,
            });
        }
        serde_json::from_str(&body).map_err(|e| StorageError::Decode(e.to_string()))
    }

    async fn list_prefix(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectEntry>, StorageError> {
        let mut entries = Vec::new();
        let mut offset = 0;
        loop {
            let page: Vec<ObjectEntry> = self
                .send(
                    self.client
                        .post(self.endpoint(&format!("object/list/{}", bucket)))
                        .json(&json!({
                            "prefix": prefix,
                            "limit": LIST_PAGE_SIZE,
                            "offset": offset,
                            "sortBy": {"column": "name", "order": "asc"},
                        })),
                    bucket,
                )
                .await?;
            let len = page.len();
            entries.extend(page);
            if len < LIST_PAGE_SIZE {
                return Ok(entries);
            }
            offset += len;
        }
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn list_buckets(&self) -> Result<Vec<String>, StorageError> {
        let buckets: Vec<BucketEntry> = self
            .send(self.client.get(self.endpoint("bucket")), "buckets")
            .await?;
        Ok(buckets.into_iter().map(|b| b.name).collect())
    }

    async fn list_files(&self, bucket: &str) -> Result<Vec<StoredFile>, StorageError> {
        let mut files = Vec::new();
        let mut prefixes = vec![String::new()];

        while let Some(prefix) = prefixes.pop() {
            for entry in self.list_prefix(bucket, &prefix).await? {
                let path = if prefix.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{}/{}", prefix, entry.name)
                };
                if entry.id.is_none() {
                    prefixes.push(path);
                    continue;
                }
                let (size, mime_type) = match entry.metadata {
                    Some(meta) => (meta.size.unwrap_or(0), meta.mimetype),
                    None => (0, None),
                };
                files.push(StoredFile {
                    name: path,
                    size,
                    mime_type,
                    updated_at: entry.updated_at,
                    url: None,
                });
            }
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn signed_url(
        &self,
        bucket: &str,
        path: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        let signed: SignResponse = self
            .send(
                self.client
                    .post(self.endpoint(&format!("object/sign/{}/{}", bucket, path)))
                    .json(&json!({ "expiresIn": ttl.as_secs() })),
                path,
            )
            .await?;
        if signed.signed_url.starts_with("http") {
            Ok(signed.signed_url)
        } else {
            Ok(format!(
                "{}/storage/v1/{}",
                self.base_url,
                signed.signed_url.trim_start_matches('/')
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_ignore_trailing_slash() {
        let storage = HttpObjectStorage::new("https://project.example.co/", "key");
        assert_eq!(
            storage.endpoint("bucket"),
            "https://project.example.co/storage/v1/bucket"
        );
    }

    #[test]
    fn folder_entries_have_no_id() {
        let entries: Vec<ObjectEntry> = serde_json::from_str(
            r#"[
                {"name": "avatars", "id": null},
                {"name": "a.png", "id": "1", "updated_at": "2024-01-01T00:00:00Z",
                 "metadata": {"size": 42, "mimetype": "image/png"}}
            ]"#,
        )
        .unwrap();
        assert!(entries[0].id.is_none());
        assert_eq!(entries[1].metadata.as_ref().unwrap().size, Some(42));
    }

    #[test]
    fn sign_response_accepts_both_spellings() {
        let a: SignResponse = serde_json::from_str(r#"{"signedURL": "/object/sign/x"}"#).unwrap();
        let b: SignResponse = serde_json::from_str(r#"{"signedUrl": "/object/sign/x"}"#).unwrap();
        assert_eq!(a.signed_url, b.signed_url);
    }
}
