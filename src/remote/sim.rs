// ABOUTME: Simulated drive implementing the resumable upload protocol in memory
// ABOUTME: Supports shared folders the token cannot read and transient session failures

use super::{DriveApi, DriveError, DriveFile, UploadMetadata, FOLDER_MIME_TYPE};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

const ROOT: &str = "root";

#[derive(Debug, Default)]
struct SimState {
    files: HashMap<String, DriveFile>,
    contents: HashMap<String, Vec<u8>>,
    sessions: HashMap<String, UploadMetadata>,
    /// Folders whose metadata the token cannot read
    unreadable: HashSet<String>,
    failing_sessions: usize,
    next_id: u64,
    requests: Vec<String>,
}

/// In-memory drive
///
/// Uploads into an unreadable folder land in `root`, the way a drive treats
/// a parent the caller cannot see, until the file is reparented.
#[derive(Debug, Default)]
pub struct SimDrive {
    token: String,
    state: Mutex<SimState>,
}

impl SimDrive {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            state: Mutex::new(SimState::default()),
        }
    }

    pub fn add_folder(&self, id: &str) {
        self.lock().files.insert(
            id.to_string(),
            DriveFile {
                id: id.to_string(),
                name: id.to_string(),
                parents: vec![ROOT.to_string()],
                mime_type: Some(FOLDER_MIME_TYPE.to_string()),
            },
        );
    }

    /// Folder exists but metadata reads for it fail
    pub fn add_unreadable_folder(&self, id: &str) {
        self.add_folder(id);
        self.lock().unreadable.insert(id.to_string());
    }

    /// The next `n` session requests fail with HTTP 503
    pub fn fail_next_sessions(&self, n: usize) {
        self.lock().failing_sessions = n;
    }

    pub fn file(&self, id: &str) -> Option<DriveFile> {
        self.lock().files.get(id).cloned()
    }

    pub fn content(&self, id: &str) -> Option<Vec<u8>> {
        self.lock().contents.get(id).cloned()
    }

    /// Method and target of every request, in order
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn authorize(&self, token: &str) -> Result<(), DriveError> {
        if token == self.token {
            Ok(())
        } else {
            Err(DriveError::Unauthorized)
        }
    }
}

#[async_trait]
impl DriveApi for SimDrive {
    async fn get_file(&self, token: &str, file_id: &str) -> Result<DriveFile, DriveError> {
        self.authorize(token)?;
        let mut state = self.lock();
        state.requests.push(format!("GET {}", file_id));
        if state.unreadable.contains(file_id) {
            return Err(DriveError::NotFound(file_id.to_string()));
        }
        state
            .files
            .get(file_id)
            .cloned()
            .ok_or_else(|| DriveError::NotFound(file_id.to_string()))
    }

    async fn start_session(&self, token: &str, metadata: &UploadMetadata) -> Result<String, DriveError> {
        self.authorize(token)?;
        let mut state = self.lock();
        state.requests.push(format!("POST {}", metadata.name));
        if state.failing_sessions > 0 {
            state.failing_sessions -= 1;
            return Err(DriveError::Http {
                status: 503,
                message: "backend unavailable".to_string(),
            });
        }
        state.next_id += 1;
        let url = format!("sim://upload/session-{}", state.next_id);
        state.sessions.insert(url.clone(), metadata.clone());
        Ok(url)
    }

    async fn upload_content(
        &self,
        token: &str,
        session_url: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<DriveFile, DriveError> {
        self.authorize(token)?;
        let mut state = self.lock();
        state.requests.push(format!("PUT {}", session_url));
        let metadata = state
            .sessions
            .remove(session_url)
            .ok_or_else(|| DriveError::NotFound(session_url.to_string()))?;

        let parents: Vec<String> = metadata
            .parents
            .iter()
            .map(|p| {
                if state.unreadable.contains(p) || !state.files.contains_key(p) {
                    ROOT.to_string()
                } else {
                    p.clone()
                }
            })
            .collect();
        state.next_id += 1;
        let file = DriveFile {
            id: format!("file-{}", state.next_id),
            name: metadata.name,
            parents: if parents.is_empty() {
                vec![ROOT.to_string()]
            } else {
                parents
            },
            mime_type: Some(content_type.to_string()),
        };
        state.contents.insert(file.id.clone(), body);
        state.files.insert(file.id.clone(), file.clone());
        Ok(file)
    }

    async fn update_parents(
        &self,
        token: &str,
        file_id: &str,
        add_parent: &str,
        remove_parents: &[String],
    ) -> Result<DriveFile, DriveError> {
        self.authorize(token)?;
        let mut state = self.lock();
        state.requests.push(format!("PATCH {}", file_id));
        if !state.files.contains_key(add_parent) {
            return Err(DriveError::NotFound(add_parent.to_string()));
        }
        let file = state
            .files
            .get_mut(file_id)
            .ok_or_else(|| DriveError::NotFound(file_id.to_string()))?;
        file.parents.retain(|p| !remove_parents.contains(p));
        if !file.parents.iter().any(|p| p == add_parent) {
            file.parents.push(add_parent.to_string());
        }
        Ok(file.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(parent: &str) -> UploadMetadata {
        UploadMetadata {
            name: "snap.json".into(),
            mime_type: "application/json".into(),
            parents: vec![parent.into()],
        }
    }

    #[tokio::test]
    async fn rejects_wrong_token() {
        let drive = SimDrive::new("t");
        assert_eq!(
            drive.get_file("nope", "x").await.unwrap_err(),
            DriveError::Unauthorized
        );
    }

    #[tokio::test]
    async fn unreadable_folder_uploads_land_in_root() {
        let drive = SimDrive::new("t");
        drive.add_unreadable_folder("shared");
        let url = drive.start_session("t", &metadata("shared")).await.unwrap();
        let file = drive
            .upload_content("t", &url, "application/json", b"{}".to_vec())
            .await
            .unwrap();
        assert_eq!(file.parents, vec!["root".to_string()]);

        let moved = drive
            .update_parents("t", &file.id, "shared", &file.parents)
            .await
            .unwrap();
        assert_eq!(moved.parents, vec!["shared".to_string()]);
    }

    #[tokio::test]
    async fn sessions_are_single_use() {
        let drive = SimDrive::new("t");
        drive.add_folder("f");
        let url = drive.start_session("t", &metadata("f")).await.unwrap();
        drive.upload_content("t", &url, "application/json", Vec::new()).await.unwrap();
        assert!(drive
            .upload_content("t", &url, "application/json", Vec::new())
            .await
            .is_err());
    }
}
