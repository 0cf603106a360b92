// ABOUTME: Whole-database backup and restore built on the table-level migration routines
// ABOUTME: Snapshots bundle table rows, storage file listings and settings records

pub mod create;
pub mod restore;
pub mod snapshot;

pub use restore::{RestoreOptions, RestoreReport};
pub use snapshot::{
    parse_snapshot, read_snapshot, tables_checksum, write_snapshot, BackupSnapshot, SettingRecord,
    SettingsDump, SnapshotError, SnapshotMetadata, SNAPSHOT_VERSION,
};
