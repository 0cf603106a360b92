// ABOUTME: Chunked row insertion with automatic split-and-retry of failing chunks
// ABOUTME: Uses an explicit work queue with a depth guard instead of recursion

use crate::config::ImportConfig;
use crate::registry::TableDescriptor;
use crate::store::{value_as_text, Record, TableStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

const MAX_ERROR_MESSAGES: usize = 20;

/// How imported rows combine with existing rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    #[default]
    Append,
    /// Clear the table first
    Replace,
}

impl std::str::FromStr for ImportMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "append" => Ok(ImportMode::Append),
            "replace" => Ok(ImportMode::Replace),
            other => anyhow::bail!("Unknown import mode '{}': expected append or replace", other),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertOutcome {
    pub inserted: u64,
    pub failed_rows: u64,
    /// Chunks that had to be split
    pub splits: usize,
    pub errors: Vec<String>,
    /// Distinct values of `key_column` among committed rows
    #[serde(skip)]
    pub committed_keys: BTreeSet<String>,
}

/// One unit of pending insert work
struct PendingBatch {
    /// Offset of the first row in the caller's input
    start: usize,
    depth: usize,
    rows: Vec<Record>,
}

fn split_rows(rows: Vec<Record>, size: usize) -> Vec<Vec<Record>> {
    let size = size.max(1);
    let mut out = Vec::with_capacity(rows.len() / size + 1);
    let mut iter = rows.into_iter().peekable();
    while iter.peek().is_some() {
        out.push(iter.by_ref().take(size).collect());
    }
    out
}

/// Insert rows in `chunk_size` batches
///
/// A failed batch is split into `len / split_factor` sub-batches that go to
/// the front of the queue. Batches at `max_split_depth` (or of a single row)
/// that still fail count as failed rows; everything else commits.
pub async fn insert_in_chunks(
    store: &dyn TableStore,
    table: &TableDescriptor,
    rows: Vec<Record>,
    config: &ImportConfig,
    key_column: Option<&str>,
) -> InsertOutcome {
    let mut outcome = InsertOutcome::default();
    let mut queue: VecDeque<PendingBatch> = VecDeque::new();
    let mut start = 0;
    for chunk in split_rows(rows, config.chunk_size) {
        let len = chunk.len();
        queue.push_back(PendingBatch {
            start,
            depth: 0,
            rows: chunk,
        });
        start += len;
    }

    while let Some(batch) = queue.pop_front() {
        match store.insert(table.physical, &batch.rows).await {
            Ok(n) => {
                outcome.inserted += n;
                if let Some(column) = key_column {
                    outcome.committed_keys.extend(
                        batch
                            .rows
                            .iter()
                            .filter_map(|r| r.get(column).and_then(value_as_text))
                            .filter(|k| !k.trim().is_empty()),
                    );
                }
                tracing::debug!(
                    "Inserted rows {}-{} into '{}'",
                    batch.start + 1,
                    batch.start + batch.rows.len(),
                    table.physical
                );
            }
            Err(e) if batch.depth < config.max_split_depth && batch.rows.len() > 1 => {
                let sub_size = (batch.rows.len() / config.split_factor.max(2)).max(1);
                tracing::warn!(
                    "⚠ Chunk of {} rows into '{}' failed ({}), retrying in chunks of {}",
                    batch.rows.len(),
                    table.physical,
                    e,
                    sub_size
                );
                outcome.splits += 1;
                let mut offset = batch.start;
                let mut subs = Vec::new();
                for sub in split_rows(batch.rows, sub_size) {
                    let len = sub.len();
                    subs.push(PendingBatch {
                        start: offset,
                        depth: batch.depth + 1,
                        rows: sub,
                    });
                    offset += len;
                }
                for sub in subs.into_iter().rev() {
                    queue.push_front(sub);
                }
            }
            Err(e) => {
                let len = batch.rows.len() as u64;
                outcome.failed_rows += len;
                let message = format!(
                    "Rows {}-{}: {}",
                    batch.start + 1,
                    batch.start + batch.rows.len(),
                    e
                );
                tracing::warn!("⚠ Insert into '{}' failed. {}", table.physical, message);
                if outcome.errors.len() < MAX_ERROR_MESSAGES {
                    outcome.errors.push(message);
                }
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;
    use crate::store::MemoryStore;
    use serde_json::{json, Value};

    fn rows(n: usize, poison_at: &[usize]) -> Vec<Record> {
        (0..n)
            .map(|i| {
                let mut r = Record::new();
                let marker = if poison_at.contains(&i) { "bad" } else { "ok" };
                r.insert("action".into(), Value::String(marker.into()));
                r.insert("actor".into(), Value::String(format!("user{}", i % 3)));
                r
            })
            .collect()
    }

    fn config(max_split_depth: usize) -> ImportConfig {
        ImportConfig {
            chunk_size: 100,
            split_factor: 10,
            max_split_depth,
        }
    }

    fn poisoned_store() -> MemoryStore {
        let store = MemoryStore::new().with_poisoned_value("action", json!("bad"));
        store.create_table("audit_log", None);
        store
    }

    #[test]
    fn parses_import_modes() {
        assert_eq!("Append".parse::<ImportMode>().unwrap(), ImportMode::Append);
        assert_eq!("replace".parse::<ImportMode>().unwrap(), ImportMode::Replace);
        assert!("merge".parse::<ImportMode>().is_err());
    }

    #[test]
    fn split_rows_keeps_remainder() {
        let sizes: Vec<_> = split_rows(rows(25, &[]), 10).iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert!(split_rows(Vec::new(), 10).is_empty());
    }

    #[tokio::test]
    async fn clean_rows_insert_in_chunks() {
        let store = poisoned_store();
        let table = registry::lookup("audit_log").unwrap();
        let outcome = insert_in_chunks(&store, table, rows(250, &[]), &config(1), Some("actor")).await;
        assert_eq!(outcome.inserted, 250);
        assert_eq!(outcome.failed_rows, 0);
        assert_eq!(outcome.splits, 0);
        assert_eq!(outcome.committed_keys.len(), 3);
    }

    #[tokio::test]
    async fn failing_chunk_is_split_and_mostly_commits() {
        let store = poisoned_store();
        let table = registry::lookup("audit_log").unwrap();
        let outcome = insert_in_chunks(&store, table, rows(250, &[105]), &config(1), None).await;
        // Only the 10-row sub-chunk holding row 105 fails
        assert_eq!(outcome.inserted, 240);
        assert_eq!(outcome.failed_rows, 10);
        assert_eq!(outcome.splits, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("Rows 101-110"));
        assert_eq!(store.row_count("audit_log"), 240);
    }

    #[tokio::test]
    async fn deeper_splits_isolate_the_bad_row() {
        let store = poisoned_store();
        let table = registry::lookup("audit_log").unwrap();
        let outcome = insert_in_chunks(&store, table, rows(100, &[42]), &config(2), None).await;
        assert_eq!(outcome.inserted, 99);
        assert_eq!(outcome.failed_rows, 1);
    }

    #[tokio::test]
    async fn splitting_never_commits_fewer_rows_than_no_retry() {
        let table = registry::lookup("audit_log").unwrap();
        for poison in [vec![0], vec![5, 50], vec![99], vec![1, 2, 3, 4]] {
            let without = insert_in_chunks(&poisoned_store(), table, rows(200, &poison), &config(0), None).await;
            let with = insert_in_chunks(&poisoned_store(), table, rows(200, &poison), &config(1), None).await;
            assert!(with.inserted >= without.inserted);
            assert_eq!(with.inserted + with.failed_rows, 200);
        }
    }

    #[tokio::test]
    async fn split_batches_preserve_row_order() {
        let store = poisoned_store();
        let table = registry::lookup("audit_log").unwrap();
        let mut input = rows(30, &[15]);
        for (i, r) in input.iter_mut().enumerate() {
            r.insert("entity_id".into(), json!(i));
        }
        let cfg = ImportConfig {
            chunk_size: 30,
            split_factor: 10,
            max_split_depth: 1,
        };
        insert_in_chunks(&store, table, input, &cfg, None).await;
        let stored: Vec<_> = store
            .rows("audit_log")
            .iter()
            .map(|r| r["entity_id"].as_u64().unwrap())
            .collect();
        let expected: Vec<u64> = (0..30).filter(|i| !(15..18).contains(i)).collect();
        assert_eq!(stored, expected);
    }
}
