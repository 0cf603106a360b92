// ABOUTME: Snapshot commands: full backup to a file, restore from a file, upload to a drive
// ABOUTME: Replace-mode restores ask for confirmation unless --yes is given

use super::{confirm_destructive, finish, open_vault, ConnectionArgs};
use crate::backup::{read_snapshot, write_snapshot, RestoreOptions};
use crate::migration::ImportMode;
use crate::remote::{DriveClient, SnapshotUploader, UploadOptions};
use crate::result::OperationResult;
use anyhow::Result;
use std::path::{Path, PathBuf};

pub async fn backup(
    args: &ConnectionArgs,
    output: Option<&Path>,
    description: Option<&str>,
) -> Result<()> {
    let vault = open_vault(args).await?;
    let result = vault.create_full_backup(description).await;
    let Some(snapshot) = &result.data else {
        return finish(&result);
    };

    let path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(snapshot.file_name()));
    write_snapshot(snapshot, &path)?;

    let summary: OperationResult = result.cast();
    finish(&summary)
}

pub async fn restore(
    args: &ConnectionArgs,
    input: &Path,
    mode: ImportMode,
    tables: Option<Vec<String>>,
    include_settings: bool,
    yes: bool,
) -> Result<()> {
    let snapshot = read_snapshot(input)?;
    tracing::info!(
        "Snapshot from {} holds {} rows in {} tables",
        snapshot.timestamp,
        snapshot.metadata.total_rows,
        snapshot.metadata.total_tables
    );

    let confirm_replace = if mode == ImportMode::Replace {
        confirm_destructive(
            "Replace restore deletes existing rows in every restored table. Continue?",
            yes,
        )?;
        true
    } else {
        false
    };

    let vault = open_vault(args).await?;
    let options = RestoreOptions {
        mode,
        tables,
        confirm_replace,
        include_settings,
    };
    finish(&vault.restore(&snapshot, &options).await)
}

pub async fn upload(input: &Path, access_token: &str, folder: Option<&str>) -> Result<()> {
    let snapshot = read_snapshot(input)?;
    let uploader = SnapshotUploader::new(DriveClient::new());
    let options = UploadOptions {
        access_token: access_token.to_string(),
        target_folder: folder.map(str::to_string),
    };
    finish(&uploader.upload(&snapshot, &options).await)
}
