// ABOUTME: Pushes a serialized snapshot to a remote drive and verifies where it landed
// ABOUTME: Session start and content upload retry with backoff; placement is corrected by reparenting

use super::{DriveApi, DriveError, DriveFile, UploadMetadata};
use crate::backup::BackupSnapshot;
use crate::result::{ErrorKind, OperationResult};
use crate::utils::retry_with_backoff;
use serde::Serialize;
use std::time::Duration;

const SNAPSHOT_MIME_TYPE: &str = "application/json";

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Bearer token for the drive
    pub access_token: String,
    /// Folder the snapshot must end up in
    pub target_folder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub file_id: String,
    pub name: String,
    pub size: u64,
    pub parents: Vec<String>,
    /// A PATCH was needed to move the file into the target folder
    pub reparented: bool,
    /// Final placement matched the target folder
    pub verified: bool,
}

pub struct SnapshotUploader<D: DriveApi> {
    drive: D,
    max_retries: u32,
    initial_delay: Duration,
}

fn upload_failure(stage: &str, error: DriveError) -> OperationResult<UploadReceipt> {
    let kind = match error {
        DriveError::Unauthorized => ErrorKind::Rejected,
        DriveError::NotFound(_) => ErrorKind::NotFound,
        _ => ErrorKind::Store,
    };
    OperationResult::failure(kind, format!("Snapshot upload failed while {}", stage), error.to_string())
}

impl<D: DriveApi> SnapshotUploader<D> {
    pub fn new(drive: D) -> Self {
        Self {
            drive,
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
        }
    }

    pub fn with_retry(mut self, max_retries: u32, initial_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_delay = initial_delay;
        self
    }

    pub fn drive(&self) -> &D {
        &self.drive
    }

    /// Upload a snapshot
    ///
    /// 1. Check the target folder (failures are warnings only)
    /// 2. POST to open a resumable session, PUT the payload
    /// 3. Re-fetch the file; if the target folder is not a parent, PATCH it
    ///    in and verify again. A failed verification is a warning since the
    ///    file exists either way.
    pub async fn upload(
        &self,
        snapshot: &BackupSnapshot,
        options: &UploadOptions,
    ) -> OperationResult<UploadReceipt> {
        let token = options.access_token.as_str();
        let body = match snapshot.to_json() {
            Ok(json) => json.into_bytes(),
            Err(e) => {
                return OperationResult::failure(
                    ErrorKind::Structural,
                    "Snapshot could not be serialized",
                    format!("{:#}", e),
                )
            }
        };
        let size = body.len() as u64;
        let mut warnings = Vec::new();

        if let Some(folder) = &options.target_folder {
            match self.drive.get_file(token, folder).await {
                Ok(f) if !f.is_folder() => {
                    warnings.push(format!("Target '{}' does not look like a folder", folder))
                }
                Ok(_) => {}
                Err(e) => {
                    let warning = format!(
                        "Could not verify target folder '{}' before upload: {}",
                        folder, e
                    );
                    tracing::warn!("⚠ {}", warning);
                    warnings.push(warning);
                }
            }
        }

        let metadata = UploadMetadata {
            name: snapshot.file_name(),
            mime_type: SNAPSHOT_MIME_TYPE.to_string(),
            parents: options.target_folder.iter().cloned().collect(),
        };

        tracing::info!("Uploading snapshot '{}' ({} bytes)", metadata.name, size);
        let session_url = match retry_with_backoff(
            || self.drive.start_session(token, &metadata),
            self.max_retries,
            self.initial_delay,
            DriveError::is_transient,
        )
        .await
        {
            Ok(url) => url,
            Err(e) => return upload_failure("starting the upload session", e).with_warnings(warnings),
        };

        let uploaded = match retry_with_backoff(
            || {
                self.drive
                    .upload_content(token, &session_url, SNAPSHOT_MIME_TYPE, body.clone())
            },
            self.max_retries,
            self.initial_delay,
            DriveError::is_transient,
        )
        .await
        {
            Ok(file) => file,
            Err(e) => return upload_failure("sending the snapshot", e).with_warnings(warnings),
        };
        tracing::info!("✓ Uploaded snapshot as file {}", uploaded.id);

        let mut receipt = UploadReceipt {
            file_id: uploaded.id.clone(),
            name: uploaded.name.clone(),
            size,
            parents: uploaded.parents.clone(),
            reparented: false,
            verified: options.target_folder.is_none(),
        };

        if let Some(folder) = &options.target_folder {
            self.ensure_placement(token, &uploaded, folder, &mut receipt, &mut warnings)
                .await;
        }

        OperationResult::ok(format!("Uploaded {} ({} bytes)", receipt.name, size))
            .with_warnings(warnings)
            .with_data(receipt)
    }

    async fn ensure_placement(
        &self,
        token: &str,
        uploaded: &DriveFile,
        folder: &str,
        receipt: &mut UploadReceipt,
        warnings: &mut Vec<String>,
    ) {
        let current = match self.drive.get_file(token, &uploaded.id).await {
            Ok(f) => f,
            Err(e) => {
                warnings.push(format!("Could not re-read uploaded file {}: {}", uploaded.id, e));
                uploaded.clone()
            }
        };
        receipt.parents = current.parents.clone();
        if current.parents.iter().any(|p| p == folder) {
            receipt.verified = true;
            return;
        }

        tracing::warn!(
            "⚠ Uploaded file {} landed in {:?}, moving it to '{}'",
            current.id,
            current.parents,
            folder
        );
        let remove: Vec<String> = current
            .parents
            .iter()
            .filter(|p| p.as_str() != folder)
            .cloned()
            .collect();
        if let Err(e) = self
            .drive
            .update_parents(token, &current.id, folder, &remove)
            .await
        {
            warnings.push(format!(
                "Could not move uploaded file into '{}': {}",
                folder, e
            ));
            return;
        }
        receipt.reparented = true;

        match self.drive.get_file(token, &current.id).await {
            Ok(f) => {
                receipt.verified = f.parents.iter().any(|p| p == folder);
                receipt.parents = f.parents;
                if !receipt.verified {
                    warnings.push(format!(
                        "Uploaded file {} is still not in '{}'",
                        current.id, folder
                    ));
                }
            }
            Err(e) => warnings.push(format!(
                "Could not verify final placement of {}: {}",
                current.id, e
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::SnapshotMetadata;
    use crate::remote::SimDrive;
    use std::collections::BTreeMap;

    fn snapshot() -> BackupSnapshot {
        BackupSnapshot {
            version: "2.0".into(),
            timestamp: chrono::Utc::now(),
            tables: BTreeMap::new(),
            storage: BTreeMap::new(),
            settings: Vec::new(),
            metadata: SnapshotMetadata::default(),
        }
    }

    fn options(folder: Option<&str>) -> UploadOptions {
        UploadOptions {
            access_token: "token".into(),
            target_folder: folder.map(str::to_string),
        }
    }

    fn uploader(drive: SimDrive) -> SnapshotUploader<SimDrive> {
        SnapshotUploader::new(drive).with_retry(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn readable_folder_needs_no_patch() {
        let drive = SimDrive::new("token");
        drive.add_folder("backups");
        let up = uploader(drive);
        let result = up.upload(&snapshot(), &options(Some("backups"))).await;
        assert!(result.success);
        assert!(result.warnings.is_empty());
        let receipt = result.data.unwrap();
        assert!(receipt.verified);
        assert!(!receipt.reparented);
        assert!(!up.drive().requests().iter().any(|r| r.starts_with("PATCH")));
    }

    #[tokio::test]
    async fn transient_session_failures_are_retried() {
        let drive = SimDrive::new("token");
        drive.fail_next_sessions(2);
        let up = uploader(drive);
        let result = up.upload(&snapshot(), &options(None)).await;
        assert!(result.success);
        let posts = up
            .drive()
            .requests()
            .iter()
            .filter(|r| r.starts_with("POST"))
            .count();
        assert_eq!(posts, 3);
    }

    #[tokio::test]
    async fn bad_token_fails_without_retry() {
        let up = uploader(SimDrive::new("other"));
        let result = up.upload(&snapshot(), &options(None)).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Rejected));
    }

    #[tokio::test]
    async fn uploaded_bytes_are_the_snapshot_json() {
        let up = uploader(SimDrive::new("token"));
        let snap = snapshot();
        let result = up.upload(&snap, &options(None)).await;
        let receipt = result.data.unwrap();
        let stored = up.drive().content(&receipt.file_id).unwrap();
        assert_eq!(stored, snap.to_json().unwrap().into_bytes());
        assert_eq!(receipt.size, stored.len() as u64);
    }
}
