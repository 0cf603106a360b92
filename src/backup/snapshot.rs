// ABOUTME: Versioned backup snapshot document and its structural validation
// ABOUTME: Carries table rows, storage file listings, tagged settings records and checked metadata

use crate::storage::StoredFile;
use crate::store::{value_as_text, Record};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const SNAPSHOT_VERSION: &str = "2.0";

/// Top-level fields a snapshot document must contain
const REQUIRED_FIELDS: &[&str] = &["version", "timestamp", "tables", "metadata"];

/// Key prefix older snapshots used to mark override rows inside settings tables
const LEGACY_OVERRIDE_PREFIX: &str = "override:";

/// A full-database backup
///
/// Built once by the backup orchestrator and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    /// Logical table key -> rows in export order
    pub tables: BTreeMap<String, Vec<Record>>,
    /// Bucket name -> file descriptors
    #[serde(default)]
    pub storage: BTreeMap<String, Vec<StoredFile>>,
    #[serde(default)]
    pub settings: Vec<SettingsDump>,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotMetadata {
    pub total_tables: usize,
    pub total_rows: u64,
    pub total_files: usize,
    pub total_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub failed_tables: Vec<String>,
    pub partial: bool,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
    /// SHA-256 of the serialized `tables` section
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// All records of one settings table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsDump {
    pub table: String,
    pub records: Vec<SettingRecord>,
}

/// One settings entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SettingRecord {
    /// A plain settings table row
    TableRow { row: Record },
    /// A per-key override of a default setting
    OverrideRow { key: String, value: Value },
}

impl SettingRecord {
    /// Decode a stored row, recognizing legacy `override:<key>` rows
    pub fn from_stored(row: Record) -> Self {
        let override_key = row
            .get("key")
            .and_then(Value::as_str)
            .and_then(|k| k.strip_prefix(LEGACY_OVERRIDE_PREFIX))
            .map(str::to_string);
        match override_key {
            Some(key) => SettingRecord::OverrideRow {
                key,
                value: row.get("value").cloned().unwrap_or(Value::Null),
            },
            None => SettingRecord::TableRow { row },
        }
    }

    /// Encode back into the row shape the settings table stores
    pub fn to_stored(&self) -> Record {
        match self {
            SettingRecord::TableRow { row } => row.clone(),
            SettingRecord::OverrideRow { key, value } => {
                let mut row = Record::new();
                row.insert(
                    "key".to_string(),
                    Value::String(format!("{}{}", LEGACY_OVERRIDE_PREFIX, key)),
                );
                row.insert("value".to_string(), value.clone());
                row
            }
        }
    }

    /// Key identifying the record, when it has one
    pub fn key(&self) -> Option<String> {
        match self {
            SettingRecord::TableRow { row } => row.get("key").and_then(value_as_text),
            SettingRecord::OverrideRow { key, .. } => Some(key.clone()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot must be a JSON object")]
    NotAnObject,

    #[error("snapshot is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("metadata.totalRows is {declared} but tables hold {actual} rows")]
    RowCountMismatch { declared: u64, actual: u64 },

    #[error("metadata.totalTables is {declared} but the snapshot holds {actual} tables")]
    TableCountMismatch { declared: usize, actual: usize },

    #[error("tables checksum mismatch (expected {expected}, computed {actual})")]
    ChecksumMismatch { expected: String, actual: String },
}

/// Hex SHA-256 of the serialized tables section
pub fn tables_checksum(tables: &BTreeMap<String, Vec<Record>>) -> String {
    let mut hasher = Sha256::new();
    // Serializing plain maps of JSON values cannot fail
    if let Ok(bytes) = serde_json::to_vec(tables) {
        hasher.update(&bytes);
    }
    format!("{:x}", hasher.finalize())
}

impl BackupSnapshot {
    pub fn row_count(&self) -> u64 {
        self.tables.values().map(|rows| rows.len() as u64).sum()
    }

    /// Check the metadata against the content
    pub fn verify(&self) -> Result<(), SnapshotError> {
        let actual = self.row_count();
        if self.metadata.total_rows != actual {
            return Err(SnapshotError::RowCountMismatch {
                declared: self.metadata.total_rows,
                actual,
            });
        }
        if self.metadata.total_tables != self.tables.len() {
            return Err(SnapshotError::TableCountMismatch {
                declared: self.metadata.total_tables,
                actual: self.tables.len(),
            });
        }
        if let Some(expected) = &self.metadata.checksum {
            let actual = tables_checksum(&self.tables);
            if &actual != expected {
                return Err(SnapshotError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Pretty JSON as written to disk and uploaded
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize backup snapshot")
    }

    /// Suggested file name, e.g. `backup-20240115T103000Z.json`
    pub fn file_name(&self) -> String {
        format!("backup-{}.json", self.timestamp.format("%Y%m%dT%H%M%SZ"))
    }
}

/// Parse and structurally validate a snapshot document
pub fn parse_snapshot(text: &str) -> Result<BackupSnapshot, SnapshotError> {
    let value: Value = serde_json::from_str(text)?;
    let object = value.as_object().ok_or(SnapshotError::NotAnObject)?;
    for field in REQUIRED_FIELDS {
        if !object.contains_key(*field) {
            return Err(SnapshotError::MissingField(field));
        }
    }
    let snapshot: BackupSnapshot = serde_json::from_value(value)?;
    snapshot.verify()?;
    Ok(snapshot)
}

/// Write a snapshot atomically: temp file in the target directory, then rename
pub fn write_snapshot(snapshot: &BackupSnapshot, path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create snapshot directory {}", parent.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp snapshot in {}", parent.display()))?;
    serde_json::to_writer_pretty(tmp.as_file_mut(), snapshot)
        .with_context(|| format!("Failed to serialize snapshot to {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("Failed to persist snapshot at {}", path.display()))?;

    tracing::info!("✓ Snapshot written to {}", path.display());
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<BackupSnapshot> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot at {}", path.display()))?;
    parse_snapshot(&content)
        .with_context(|| format!("Invalid snapshot at {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn sample() -> BackupSnapshot {
        let mut tables = BTreeMap::new();
        tables.insert(
            "activities".to_string(),
            vec![record(json!({"id": 1, "name": "Calls"}))],
        );
        tables.insert(
            "kpi".to_string(),
            vec![
                record(json!({"id": 1, "value": 2.5})),
                record(json!({"id": 2, "value": null})),
            ],
        );
        let checksum = tables_checksum(&tables);
        BackupSnapshot {
            version: SNAPSHOT_VERSION.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap(),
            tables,
            storage: BTreeMap::new(),
            settings: vec![SettingsDump {
                table: "app_settings".to_string(),
                records: vec![SettingRecord::OverrideRow {
                    key: "theme".to_string(),
                    value: json!("dark"),
                }],
            }],
            metadata: SnapshotMetadata {
                total_tables: 2,
                total_rows: 3,
                checksum: Some(checksum),
                ..Default::default()
            },
        }
    }

    #[test]
    fn parses_its_own_output() {
        let snapshot = sample();
        let parsed = parse_snapshot(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn double_precision_values_keep_their_checksum() {
        let mut tables = BTreeMap::new();
        tables.insert(
            "kpi".to_string(),
            vec![
                record(json!({"id": 1, "value": 12874.560591713891_f64})),
                record(json!({"id": 2, "value": 1.0715660391465826e-75_f64})),
                record(json!({"id": 3, "value": 0.1_f64 + 0.2_f64})),
            ],
        );
        let mut snapshot = sample();
        snapshot.metadata.total_tables = 1;
        snapshot.metadata.total_rows = 3;
        snapshot.metadata.checksum = Some(tables_checksum(&tables));
        snapshot.tables = tables;

        let parsed = parse_snapshot(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(parsed.tables, snapshot.tables);

        let dir = tempdir().unwrap();
        let path = dir.path().join("floats.json");
        write_snapshot(&snapshot, &path).unwrap();
        assert!(read_snapshot(&path).is_ok());
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value.as_object_mut().unwrap().remove("metadata");
        let err = parse_snapshot(&value.to_string()).unwrap_err();
        assert!(matches!(err, SnapshotError::MissingField("metadata")));
    }

    #[test]
    fn row_count_mismatch_is_rejected() {
        let mut snapshot = sample();
        snapshot.metadata.total_rows = 4;
        let err = parse_snapshot(&snapshot.to_json().unwrap()).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::RowCountMismatch {
                declared: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn tampered_rows_fail_checksum() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value["tables"]["kpi"][0]["value"] = json!(99);
        let err = parse_snapshot(&value.to_string()).unwrap_err();
        assert!(matches!(err, SnapshotError::ChecksumMismatch { .. }));
    }

    #[test]
    fn setting_records_are_tagged() {
        let value = serde_json::to_value(SettingRecord::OverrideRow {
            key: "theme".into(),
            value: json!("dark"),
        })
        .unwrap();
        assert_eq!(value["kind"], json!("override-row"));

        let row = SettingRecord::TableRow {
            row: record(json!({"key": "locale"})),
        };
        assert_eq!(serde_json::to_value(&row).unwrap()["kind"], json!("table-row"));
    }

    #[test]
    fn legacy_override_rows_are_decoded() {
        let legacy = record(json!({"key": "override:theme", "value": "dark"}));
        let decoded = SettingRecord::from_stored(legacy.clone());
        assert_eq!(
            decoded,
            SettingRecord::OverrideRow {
                key: "theme".into(),
                value: json!("dark")
            }
        );
        assert_eq!(decoded.to_stored(), legacy);

        let plain = SettingRecord::from_stored(record(json!({"key": "locale", "value": "en"})));
        assert!(matches!(plain, SettingRecord::TableRow { .. }));
        assert_eq!(plain.key().as_deref(), Some("locale"));
    }

    #[test]
    fn write_then_read_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("snap.json");
        let snapshot = sample();
        write_snapshot(&snapshot, &path).unwrap();
        assert_eq!(read_snapshot(&path).unwrap(), snapshot);
    }

    #[test]
    fn file_name_uses_timestamp() {
        assert_eq!(sample().file_name(), "backup-20240115T103000Z.json");
    }
}
