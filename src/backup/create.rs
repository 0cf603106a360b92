// ABOUTME: Backup orchestrator walking registry tables, storage buckets and settings tables
// ABOUTME: Per-table and per-file failures degrade to warnings; only a fully failed export fails

use super::snapshot::{
    tables_checksum, BackupSnapshot, SettingRecord, SettingsDump, SnapshotMetadata,
    SNAPSHOT_VERSION,
};
use crate::migration;
use crate::registry::{self, TableCategory, TableDescriptor};
use crate::result::{ErrorKind, OperationResult};
use crate::storage::{ObjectStorage, StoredFile};
use crate::store::Record;
use crate::utils::format_bytes;
use crate::vault::Vault;
use chrono::Utc;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Storage section of a snapshot plus what went wrong collecting it
#[derive(Debug, Default)]
struct StorageDump {
    buckets: BTreeMap<String, Vec<StoredFile>>,
    files: usize,
    bytes: u64,
    warnings: Vec<String>,
}

async fn dump_storage(storage: &dyn ObjectStorage, ttl: Duration) -> StorageDump {
    let mut dump = StorageDump::default();
    let buckets = match storage.list_buckets().await {
        Ok(b) => b,
        Err(e) => {
            dump.warnings.push(format!("Could not list storage buckets: {}", e));
            return dump;
        }
    };

    for bucket in buckets {
        let mut files = match storage.list_files(&bucket).await {
            Ok(f) => f,
            Err(e) => {
                dump.warnings
                    .push(format!("Could not list files in bucket '{}': {}", bucket, e));
                continue;
            }
        };
        for file in files.iter_mut() {
            match storage.signed_url(&bucket, &file.name, ttl).await {
                Ok(url) => file.url = Some(url),
                Err(e) => {
                    file.url = None;
                    dump.warnings.push(format!(
                        "Could not sign '{}/{}': {}",
                        bucket, file.name, e
                    ));
                }
            }
            dump.bytes += file.size;
        }
        tracing::info!("  Bucket '{}': {} file(s)", bucket, files.len());
        dump.files += files.len();
        dump.buckets.insert(bucket, files);
    }
    dump
}

fn settings_descriptor(name: &'static str) -> TableDescriptor {
    TableDescriptor {
        key: name,
        physical: name,
        display: name,
        category: TableCategory::Operational,
        id_column: "id",
        recency_column: None,
    }
}

impl Vault {
    /// Build a snapshot of every registered table, storage bucket and settings table
    pub async fn create_full_backup(&self, description: Option<&str>) -> OperationResult<BackupSnapshot> {
        let started = Instant::now();
        tracing::info!("Creating full backup of {} tables", registry::TABLES.len());

        let mut tables: BTreeMap<String, Vec<Record>> = BTreeMap::new();
        let mut failed_tables = Vec::new();
        let mut warnings = Vec::new();

        for table in registry::TABLES {
            match migration::export_table(self.store(), table, &self.config().export).await {
                Ok(outcome) => {
                    tables.insert(table.key.to_string(), outcome.rows);
                }
                Err(e) => {
                    tracing::warn!("⚠ Backup of '{}' failed: {}", table.key, e);
                    warnings.push(format!("Table '{}' was not backed up: {}", table.key, e));
                    failed_tables.push(table.key.to_string());
                }
            }
        }

        if tables.is_empty() {
            return OperationResult::failure(
                ErrorKind::Store,
                "Backup failed: no table could be exported",
                warnings.join("; "),
            )
            .with_warnings(warnings);
        }

        let storage = match self.storage() {
            Some(storage) => {
                let ttl = Duration::from_secs(self.config().storage.signed_url_ttl_secs);
                dump_storage(storage, ttl).await
            }
            None => StorageDump::default(),
        };
        warnings.extend(storage.warnings);

        let mut settings = Vec::new();
        for name in registry::SETTINGS_TABLES {
            let descriptor = settings_descriptor(name);
            match migration::export_table(self.store(), &descriptor, &self.config().export).await {
                Ok(outcome) => settings.push(SettingsDump {
                    table: name.to_string(),
                    records: outcome
                        .rows
                        .into_iter()
                        .map(SettingRecord::from_stored)
                        .collect(),
                }),
                Err(e) => warnings.push(format!("Settings table '{}' was not backed up: {}", name, e)),
            }
        }

        let total_rows: u64 = tables.values().map(|rows| rows.len() as u64).sum();
        let partial = !failed_tables.is_empty();
        let metadata = SnapshotMetadata {
            total_tables: tables.len(),
            total_rows,
            total_files: storage.files,
            total_bytes: storage.bytes,
            description: description.map(str::to_string),
            failed_tables,
            partial,
            warnings: warnings.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            checksum: Some(tables_checksum(&tables)),
        };
        let snapshot = BackupSnapshot {
            version: SNAPSHOT_VERSION.to_string(),
            timestamp: Utc::now(),
            tables,
            storage: storage.buckets,
            settings,
            metadata,
        };

        let message = format!(
            "Backed up {} rows from {} tables and {} files ({})",
            total_rows,
            snapshot.metadata.total_tables,
            snapshot.metadata.total_files,
            format_bytes(snapshot.metadata.total_bytes)
        );
        tracing::info!("✓ {}", message);

        let mut result = OperationResult::ok(message)
            .with_affected_rows(total_rows)
            .with_warnings(warnings);
        if partial {
            result = result.with_kind(ErrorKind::PartialFailure);
        }
        result.with_data(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::storage::MemoryObjectStorage;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new().with_registry_tables();
        store.seed("activities", vec![record(json!({"name": "Calls"}))]);
        store.seed_generated("audit_log", 3);
        store.seed(
            "app_settings",
            vec![
                record(json!({"key": "locale", "value": "en"})),
                record(json!({"key": "override:theme", "value": "dark"})),
            ],
        );
        store
    }

    #[tokio::test]
    async fn snapshot_counts_match_content() {
        let vault = Vault::new(Arc::new(store()), EngineConfig::default());
        let result = vault.create_full_backup(Some("nightly")).await;
        assert!(result.success);
        assert!(result.error_kind.is_none());
        let snapshot = result.data.unwrap();
        assert_eq!(snapshot.metadata.total_tables, registry::TABLES.len());
        assert_eq!(snapshot.metadata.total_rows, 4);
        assert_eq!(snapshot.metadata.description.as_deref(), Some("nightly"));
        assert!(snapshot.verify().is_ok());

        let app = snapshot
            .settings
            .iter()
            .find(|d| d.table == "app_settings")
            .unwrap();
        assert!(app
            .records
            .iter()
            .any(|r| matches!(r, SettingRecord::OverrideRow { key, .. } if key == "theme")));
    }

    #[tokio::test]
    async fn failed_table_marks_snapshot_partial() {
        let store = store().with_failing_select("audit_log");
        let vault = Vault::new(Arc::new(store), EngineConfig::default());
        let result = vault.create_full_backup(None).await;
        assert!(result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::PartialFailure));
        let snapshot = result.data.unwrap();
        assert!(snapshot.metadata.partial);
        assert_eq!(snapshot.metadata.failed_tables, vec!["audit_log".to_string()]);
        assert!(!snapshot.tables.contains_key("audit_log"));
    }

    #[tokio::test]
    async fn fails_when_nothing_exports() {
        let mut store = MemoryStore::new();
        for table in registry::TABLES {
            store = store.with_failing_select(table.physical);
        }
        let vault = Vault::new(Arc::new(store), EngineConfig::default());
        let result = vault.create_full_backup(None).await;
        assert!(!result.success);
        assert!(result.data.is_none());
    }

    #[tokio::test]
    async fn storage_failures_become_warnings() {
        let storage = MemoryObjectStorage::new();
        storage.add_file("avatars", StoredFile::new("a.png", 100));
        storage.add_file("avatars", StoredFile::new("b.png", 50));
        storage.add_file("exports", StoredFile::new("x.csv", 10));
        storage.fail_signing("avatars", "b.png");
        storage.fail_listing("exports");

        let vault = Vault::new(Arc::new(store()), EngineConfig::default())
            .with_storage(Arc::new(storage));
        let result = vault.create_full_backup(None).await;
        assert!(result.success);
        assert_eq!(result.warnings.len(), 2);

        let snapshot = result.data.unwrap();
        assert_eq!(snapshot.metadata.total_files, 2);
        assert_eq!(snapshot.metadata.total_bytes, 150);
        let avatars = &snapshot.storage["avatars"];
        assert!(avatars[0].url.is_some());
        assert!(avatars[1].url.is_none());
        assert!(!snapshot.storage.contains_key("exports"));
    }
}
