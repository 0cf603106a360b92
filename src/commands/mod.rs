// ABOUTME: Command implementations behind the seren-vault CLI
// ABOUTME: Shared setup (store, storage, config), confirmation prompts and result printing

pub mod data;
pub mod snapshot;
pub mod tables;

pub use data::{clear, export, import, validate};
pub use snapshot::{backup, restore, upload};
pub use tables::tables;

use crate::config::{load_engine_config, EngineConfig};
use crate::postgres::PostgresStore;
use crate::result::OperationResult;
use crate::storage::HttpObjectStorage;
use crate::utils;
use crate::vault::Vault;
use anyhow::{Context, Result};
use dialoguer::{theme::ColorfulTheme, Confirm};
use serde::Serialize;
use std::sync::Arc;

/// Connection settings shared by every command that touches the store
#[derive(Debug, Clone, Default)]
pub struct ConnectionArgs {
    pub database_url: String,
    pub config: Option<String>,
    pub storage_url: Option<String>,
    pub storage_key: Option<String>,
}

pub fn load_config(path: Option<&str>) -> Result<EngineConfig> {
    match path {
        Some(path) => load_engine_config(path),
        None => Ok(EngineConfig::default()),
    }
}

/// Connect to the database (and storage, when configured) and build the engine
pub async fn open_vault(args: &ConnectionArgs) -> Result<Vault> {
    let config = load_config(args.config.as_deref())?;
    utils::validate_connection_string(&args.database_url)?;

    tracing::info!("Connecting to database...");
    let store = PostgresStore::connect(&args.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("✓ Connected");

    let mut vault = Vault::new(Arc::new(store), config);
    if let (Some(url), Some(key)) = (&args.storage_url, &args.storage_key) {
        utils::validate_http_url(url)?;
        vault = vault.with_storage(Arc::new(HttpObjectStorage::new(url, key)));
    }
    Ok(vault)
}

/// Ask before a destructive operation unless `--yes` was given
pub fn confirm_destructive(prompt: &str, yes: bool) -> Result<()> {
    if yes {
        return Ok(());
    }
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Failed to get confirmation")?;
    if !confirmed {
        tracing::warn!("⚠ User cancelled operation");
        anyhow::bail!("Operation cancelled by user");
    }
    Ok(())
}

/// Print a result as JSON and turn failure into an error exit
pub fn finish<T: Serialize>(result: &OperationResult<T>) -> Result<()> {
    let json = serde_json::to_string_pretty(result).context("Failed to serialize result")?;
    println!("{}", json);
    for warning in &result.warnings {
        tracing::warn!("⚠ {}", warning);
    }
    if result.success {
        tracing::info!("✓ {}", result.summary());
        Ok(())
    } else {
        anyhow::bail!(result.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ErrorKind;

    #[test]
    fn confirmation_is_skipped_with_yes() {
        assert!(confirm_destructive("Delete everything?", true).is_ok());
    }

    #[test]
    fn failed_results_become_errors() {
        let ok: OperationResult = OperationResult::ok("done");
        assert!(finish(&ok).is_ok());
        let failed: OperationResult =
            OperationResult::failure(ErrorKind::Store, "Export failed", "connection reset");
        let err = finish(&failed).unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn missing_config_path_uses_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.export.page_size, 1000);
    }
}
