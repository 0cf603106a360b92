// ABOUTME: Remote snapshot replication to an external drive via resumable upload
// ABOUTME: Defines the drive API seam, its HTTP client, a simulator and the uploader

pub mod drive;
pub mod sim;
pub mod uploader;

pub use drive::DriveClient;
pub use sim::SimDrive;
pub use uploader::{SnapshotUploader, UploadOptions, UploadReceipt};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// File metadata as reported by the drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME_TYPE)
    }
}

/// Metadata sent when opening an upload session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub name: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriveError {
    #[error("drive request failed with HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("drive network error: {0}")]
    Network(String),

    #[error("access token was rejected")]
    Unauthorized,

    #[error("file or folder not found: {0}")]
    NotFound(String),

    #[error("upload session response had no Location header")]
    MissingSessionUrl,

    #[error("unexpected drive response: {0}")]
    Decode(String),
}

impl DriveError {
    /// Worth retrying: network failures, throttling and server errors
    pub fn is_transient(&self) -> bool {
        match self {
            DriveError::Network(_) => true,
            DriveError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Resumable-upload endpoints of a remote drive
#[async_trait]
pub trait DriveApi: Send + Sync {
    async fn get_file(&self, token: &str, file_id: &str) -> Result<DriveFile, DriveError>;

    /// Open an upload session; returns the session URL
    async fn start_session(&self, token: &str, metadata: &UploadMetadata) -> Result<String, DriveError>;

    /// Send the whole payload to an open session
    async fn upload_content(
        &self,
        token: &str,
        session_url: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<DriveFile, DriveError>;

    /// Move a file: add one parent and drop others
    async fn update_parents(
        &self,
        token: &str,
        file_id: &str,
        add_parent: &str,
        remove_parents: &[String],
    ) -> Result<DriveFile, DriveError>;
}
