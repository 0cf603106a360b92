// ABOUTME: HTTP client for the drive's v3 REST API and resumable upload endpoint
// ABOUTME: Session URL comes from the Location header of the initiating POST

use super::{DriveApi, DriveError, DriveFile, UploadMetadata};
use async_trait::async_trait;

const API_URL: &str = "https://www.googleapis.com/drive/v3";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3";
const FILE_FIELDS: &str = "id,name,parents,mimeType";

#[derive(Debug, Clone)]
pub struct DriveClient {
    client: reqwest::Client,
    api_url: String,
    upload_url: String,
}

impl Default for DriveClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DriveClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: API_URL.to_string(),
            upload_url: UPLOAD_URL.to_string(),
        }
    }

    /// Point at another host (proxies, local fakes)
    pub fn with_base_urls(mut self, api_url: impl Into<String>, upload_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self.upload_url = upload_url.into().trim_end_matches('/').to_string();
        self
    }

    fn file_url(&self, file_id: &str) -> String {
        format!("{}/files/{}", self.api_url, file_id)
    }

    fn network_error(e: reqwest::Error) -> DriveError {
        DriveError::Network(e.to_string())
    }

    async fn check(response: reqwest::Response, subject: &str) -> Result<reqwest::Response, DriveError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            reqwest::StatusCode::UNAUTHORIZED => DriveError::Unauthorized,
            reqwest::StatusCode::NOT_FOUND => DriveError::NotFound(subject.to_string()),
            _ => DriveError::Http {
                status: status.as_u16(),
                message: body,
            },
        })
    }

    async fn decode_file(response: reqwest::Response) -> Result<DriveFile, DriveError> {
        let body = response.text().await.map_err(Self::network_error)?;
        serde_json::from_str(&body).map_err(|e| DriveError::Decode(e.to_string()))
    }
}

#[async_trait]
impl DriveApi for DriveClient {
    async fn get_file(&self, token: &str, file_id: &str) -> Result<DriveFile, DriveError> {
        let response = self
            .client
            .get(self.file_url(file_id))
            .bearer_auth(token)
            .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")])
            .send()
            .await
            .map_err(Self::network_error)?;
        Self::decode_file(Self::check(response, file_id).await?).await
    }

    async fn start_session(&self, token: &str, metadata: &UploadMetadata) -> Result<String, DriveError> {
        let response = self
            .client
            .post(format!("{}/files", self.upload_url))
            .bearer_auth(token)
            .query(&[("uploadType", "resumable"), ("supportsAllDrives", "true")])
            .header("X-Upload-Content-Type", metadata.mime_type.as_str())
            .json(metadata)
            .send()
            .await
            .map_err(Self::network_error)?;
        let response = Self::check(response, &metadata.name).await?;
        response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(DriveError::MissingSessionUrl)
    }

    async fn upload_content(
        &self,
        token: &str,
        session_url: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<DriveFile, DriveError> {
        let response = self
            .client
            .put(session_url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(Self::network_error)?;
        Self::decode_file(Self::check(response, session_url).await?).await
    }

    async fn update_parents(
        &self,
        token: &str,
        file_id: &str,
        add_parent: &str,
        remove_parents: &[String],
    ) -> Result<DriveFile, DriveError> {
        let remove = remove_parents.join(",");
        let response = self
            .client
            .patch(self.file_url(file_id))
            .bearer_auth(token)
            .query(&[
                ("addParents", add_parent),
                ("removeParents", remove.as_str()),
                ("fields", FILE_FIELDS),
                ("supportsAllDrives", "true"),
            ])
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(Self::network_error)?;
        Self::decode_file(Self::check(response, file_id).await?).await
    }
}
