// ABOUTME: Restore orchestrator replaying snapshot tables through the chunked importer
// ABOUTME: Tables restore independently in registry order; one success makes the restore succeed

use super::snapshot::BackupSnapshot;
use crate::migration::ImportMode;
use crate::registry;
use crate::result::{ErrorKind, OperationResult};
use crate::store::Record;
use crate::vault::Vault;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub mode: ImportMode,
    /// Restrict to these table keys; `None` restores every snapshot table
    pub tables: Option<Vec<String>>,
    /// Must be set for replace mode
    pub confirm_replace: bool,
    /// Also write the snapshot's settings records back
    pub include_settings: bool,
}

/// Per-table outcome of a restore
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub tables: BTreeMap<String, OperationResult>,
    pub restored_tables: usize,
    pub failed_tables: usize,
    pub total_rows: u64,
    pub settings_restored: u64,
}

/// Selected keys sorted so referenced tables load before referencing ones
fn restore_order(snapshot: &BackupSnapshot, selected: Option<&[String]>) -> Vec<String> {
    let mut keys: Vec<String> = match selected {
        Some(keys) => keys.to_vec(),
        None => snapshot.tables.keys().cloned().collect(),
    };
    keys.sort_by(|a, b| (registry::position(a), a).cmp(&(registry::position(b), b)));
    keys.dedup();
    keys
}

impl Vault {
    /// Replay a snapshot into the store
    pub async fn restore(
        &self,
        snapshot: &BackupSnapshot,
        options: &RestoreOptions,
    ) -> OperationResult<RestoreReport> {
        if options.mode == ImportMode::Replace && !options.confirm_replace {
            return OperationResult::failure(
                ErrorKind::Rejected,
                "Replace restore requires explicit confirmation",
                "confirm_replace was not set",
            );
        }

        let keys = restore_order(snapshot, options.tables.as_deref());
        if keys.is_empty() {
            return OperationResult::failure(
                ErrorKind::Rejected,
                "Nothing to restore",
                "the snapshot holds no tables matching the selection",
            );
        }

        tracing::info!(
            "Restoring {} table(s) from snapshot {} ({:?})",
            keys.len(),
            snapshot.timestamp,
            options.mode
        );

        let mut report = RestoreReport::default();
        let mut warnings = Vec::new();

        for key in &keys {
            let result: OperationResult = match (registry::lookup(key), snapshot.tables.get(key)) {
                (None, _) => OperationResult::failure(
                    ErrorKind::NotFound,
                    format!("Unknown table '{}'", key),
                    format!("'{}' is not a registered table", key),
                ),
                (Some(table), None) => OperationResult::failure(
                    ErrorKind::NotFound,
                    format!("{} is not in the snapshot", table.display),
                    format!("snapshot has no rows for '{}'", key),
                ),
                (Some(table), Some(rows)) => {
                    let imported = self.import_rows(key, rows.clone(), options.mode).await;
                    warnings.extend(imported.warnings.iter().map(|w| format!("{}: {}", key, w)));
                    if imported.affected_rows.unwrap_or(0) > 0 {
                        // Restored rows keep their ids; later inserts must not reuse them
                        if let Err(e) = self.store().sync_identity(table.physical, table.id_column).await {
                            let warning = format!(
                                "{}: could not advance the '{}' sequence: {}",
                                key, table.id_column, e
                            );
                            tracing::warn!("⚠ {}", warning);
                            warnings.push(warning);
                        }
                    }
                    imported.cast()
                }
            };

            if result.success {
                report.restored_tables += 1;
                report.total_rows += result.affected_rows.unwrap_or(0);
                tracing::info!("  ✓ {}", result.summary());
            } else {
                report.failed_tables += 1;
                tracing::warn!("  ⚠ {}", result.summary());
            }
            report.tables.insert(key.clone(), result);
        }

        if options.include_settings {
            report.settings_restored = self
                .restore_settings(snapshot, options.mode, &mut warnings)
                .await;
        }

        let message = format!(
            "Restored {} of {} table(s), {} rows",
            report.restored_tables,
            keys.len(),
            report.total_rows
        );
        let result = if report.restored_tables == 0 {
            OperationResult::failure(ErrorKind::Store, message, "no table was restored")
        } else if report.failed_tables > 0 {
            OperationResult::ok(message).with_kind(ErrorKind::PartialFailure)
        } else {
            tracing::info!("✓ {}", message);
            OperationResult::ok(message)
        };
        result
            .with_affected_rows(report.total_rows)
            .with_warnings(warnings)
            .with_data(report)
    }

    async fn restore_settings(
        &self,
        snapshot: &BackupSnapshot,
        mode: ImportMode,
        warnings: &mut Vec<String>,
    ) -> u64 {
        let mut restored = 0;
        for dump in &snapshot.settings {
            if !registry::SETTINGS_TABLES.contains(&dump.table.as_str()) {
                warnings.push(format!("Skipped unknown settings table '{}'", dump.table));
                continue;
            }
            if mode == ImportMode::Replace {
                if let Err(e) = self.store().delete_all(&dump.table).await {
                    warnings.push(format!("Could not clear settings table '{}': {}", dump.table, e));
                    continue;
                }
            }
            let rows: Vec<Record> = dump.records.iter().map(|r| r.to_stored()).collect();
            if rows.is_empty() {
                continue;
            }
            match self.store().insert(&dump.table, &rows).await {
                Ok(n) => restored += n,
                Err(e) => warnings.push(format!(
                    "Could not restore settings table '{}': {}",
                    dump.table, e
                )),
            }
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::store::{MemoryStore, TableStore};
    use serde_json::json;
    use std::sync::Arc;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    async fn snapshot_of(store: MemoryStore) -> BackupSnapshot {
        let vault = Vault::new(Arc::new(store), EngineConfig::default());
        vault.create_full_backup(None).await.data.unwrap()
    }

    fn populated() -> MemoryStore {
        let store = MemoryStore::new().with_registry_tables();
        store.seed(
            "activities",
            vec![record(json!({"name": "Calls"})), record(json!({"name": "Visits"}))],
        );
        store.seed("employees", vec![record(json!({"employee_code": "E1"}))]);
        store.seed(
            "kpi_records",
            vec![record(json!({"employee_code": "E1", "activity_name": "Calls", "value": 4}))],
        );
        store.seed(
            "app_settings",
            vec![record(json!({"key": "override:theme", "value": "dark"}))],
        );
        store
    }

    #[tokio::test]
    async fn replace_requires_confirmation() {
        let snapshot = snapshot_of(populated()).await;
        let vault = Vault::new(Arc::new(MemoryStore::new().with_registry_tables()), EngineConfig::default());
        let options = RestoreOptions {
            mode: ImportMode::Replace,
            ..Default::default()
        };
        let result = vault.restore(&snapshot, &options).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Rejected));
    }

    #[tokio::test]
    async fn restores_every_table_into_an_empty_store() {
        let snapshot = snapshot_of(populated()).await;
        let target = Arc::new(MemoryStore::new().with_registry_tables());
        let vault = Vault::new(target.clone(), EngineConfig::default());
        let options = RestoreOptions {
            mode: ImportMode::Replace,
            confirm_replace: true,
            include_settings: true,
            ..Default::default()
        };
        let result = vault.restore(&snapshot, &options).await;
        assert!(result.success, "{}", result.summary());
        let report = result.data.unwrap();
        assert_eq!(report.failed_tables, 0);
        assert_eq!(report.total_rows, 4);
        assert_eq!(report.settings_restored, 1);
        assert_eq!(target.row_count("activities"), 2);
        assert_eq!(target.row_count("kpi_records"), 1);
        assert_eq!(target.rows("app_settings")[0]["key"], json!("override:theme"));
    }

    #[tokio::test]
    async fn identity_generators_are_synced_for_restored_tables() {
        let snapshot = snapshot_of(populated()).await;
        let target = Arc::new(MemoryStore::new().with_registry_tables());
        let vault = Vault::new(target.clone(), EngineConfig::default());
        let result = vault.restore(&snapshot, &RestoreOptions::default()).await;
        assert!(result.success, "{}", result.summary());
        assert_eq!(
            target.identity_syncs(),
            vec!["activities", "employees", "kpi_records"]
        );

        target
            .insert("activities", &[record(json!({"name": "Emails"}))])
            .await
            .unwrap();
        let ids: Vec<_> = target
            .rows("activities")
            .iter()
            .map(|r| r["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn unknown_and_absent_tables_fail_individually() {
        let mut snapshot = snapshot_of(populated()).await;
        snapshot.tables.remove("employees");
        let target = Arc::new(MemoryStore::new().with_registry_tables());
        let vault = Vault::new(target.clone(), EngineConfig::default());
        let options = RestoreOptions {
            tables: Some(vec![
                "kpi".to_string(),
                "employees".to_string(),
                "ghosts".to_string(),
            ]),
            ..Default::default()
        };
        let result = vault.restore(&snapshot, &options).await;
        assert!(result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::PartialFailure));
        let report = result.data.unwrap();
        assert_eq!(report.restored_tables, 1);
        assert_eq!(report.failed_tables, 2);
        assert_eq!(
            report.tables["ghosts"].error_kind,
            Some(ErrorKind::NotFound)
        );
        assert_eq!(target.row_count("kpi_records"), 1);
    }

    #[test]
    fn referenced_tables_restore_first() {
        let snapshot = BackupSnapshot {
            version: "2.0".into(),
            timestamp: chrono::Utc::now(),
            tables: BTreeMap::new(),
            storage: BTreeMap::new(),
            settings: Vec::new(),
            metadata: Default::default(),
        };
        let selected = vec![
            "kpi".to_string(),
            "departments".to_string(),
            "employees".to_string(),
            "kpi".to_string(),
        ];
        assert_eq!(
            restore_order(&snapshot, Some(&selected)),
            vec!["departments", "employees", "kpi"]
        );
    }
}
