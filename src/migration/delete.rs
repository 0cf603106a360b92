// ABOUTME: Adaptive bulk delete that clears arbitrarily large tables
// ABOUTME: Small tables get one delete; large tables are cleared in bounded parallel id-chunk waves

use crate::config::DeleteConfig;
use crate::registry::TableDescriptor;
use crate::store::{StoreError, TableStore};
use futures::future::join_all;
use serde::Serialize;

/// Which strategy cleared the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeletePath {
    /// Table was already empty
    Empty,
    /// One unconditional delete
    Single,
    /// Fetch ids, delete in chunked waves
    Adaptive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub path: DeletePath,
    pub initial: u64,
    pub deleted: u64,
    pub remaining: u64,
    pub waves: usize,
}

/// Delete failures, each carrying the rows already removed
#[derive(Debug, thiserror::Error)]
pub enum DeleteError {
    #[error("delete timed out after removing {deleted} rows: {source}")]
    Timeout { deleted: u64, source: StoreError },

    #[error("delete request exceeded a platform limit after removing {deleted} rows: {source}")]
    PlatformLimit { deleted: u64, source: StoreError },

    #[error("delete failed after removing {deleted} rows: {source}")]
    Store { deleted: u64, source: StoreError },

    #[error("{remaining} rows remain after removing {deleted}")]
    Incomplete { deleted: u64, remaining: u64 },
}

impl DeleteError {
    fn classify(source: StoreError, deleted: u64) -> Self {
        if source.is_timeout() {
            DeleteError::Timeout { deleted, source }
        } else if source.is_platform_limit() {
            DeleteError::PlatformLimit { deleted, source }
        } else {
            DeleteError::Store { deleted, source }
        }
    }

    /// Rows removed before the failure
    pub fn deleted(&self) -> u64 {
        match self {
            DeleteError::Timeout { deleted, .. }
            | DeleteError::PlatformLimit { deleted, .. }
            | DeleteError::Store { deleted, .. }
            | DeleteError::Incomplete { deleted, .. } => *deleted,
        }
    }
}

/// Remove every row from a table
///
/// Tables under `large_table_threshold` rows get a single unconditional
/// delete. Larger tables switch to adaptive mode: fetch up to `fetch_batch`
/// ids, split them into `chunk_size` id-lists, and delete `wave_width` chunks
/// concurrently per wave, awaiting the whole wave before the next. The
/// remaining count is re-polled every `poll_every_waves` waves.
///
/// Rows already deleted stay deleted, so calling this again after a failure
/// only continues the work.
pub async fn delete_all_rows(
    store: &dyn TableStore,
    table: &TableDescriptor,
    config: &DeleteConfig,
) -> Result<DeleteOutcome, DeleteError> {
    let physical = table.physical;
    let initial = store
        .count(physical)
        .await
        .map_err(|e| DeleteError::classify(e, 0))?;

    if initial == 0 {
        tracing::info!("Table '{}' is already empty", physical);
        return Ok(DeleteOutcome {
            path: DeletePath::Empty,
            initial,
            deleted: 0,
            remaining: 0,
            waves: 0,
        });
    }

    if initial < config.large_table_threshold {
        tracing::info!("Deleting {} rows from '{}' in one statement", initial, physical);
        let deleted = store
            .delete_all(physical)
            .await
            .map_err(|e| DeleteError::classify(e, 0))?;
        return Ok(DeleteOutcome {
            path: DeletePath::Single,
            initial,
            deleted,
            remaining: 0,
            waves: 0,
        });
    }

    tracing::info!(
        "Table '{}' has {} rows (threshold {}), using adaptive delete",
        physical,
        initial,
        config.large_table_threshold
    );
    adaptive_delete(store, table, config, initial).await
}

async fn adaptive_delete(
    store: &dyn TableStore,
    table: &TableDescriptor,
    config: &DeleteConfig,
    initial: u64,
) -> Result<DeleteOutcome, DeleteError> {
    let physical = table.physical;
    let chunk_size = config.chunk_size.max(1);
    let wave_width = config.wave_width.max(1);
    let poll_every = config.poll_every_waves.max(1);

    let mut deleted: u64 = 0;
    let mut waves: usize = 0;

    'rounds: loop {
        let ids = store
            .select_ids(physical, table.id_column, config.fetch_batch)
            .await
            .map_err(|e| DeleteError::classify(e, deleted))?;
        if ids.is_empty() {
            break;
        }

        let chunks: Vec<_> = ids.chunks(chunk_size).collect();
        let mut deleted_this_round: u64 = 0;

        for wave in chunks.chunks(wave_width) {
            let results = join_all(
                wave.iter()
                    .map(|chunk| store.delete_ids(physical, table.id_column, chunk)),
            )
            .await;
            waves += 1;

            let mut failure = None;
            for result in results {
                match result {
                    Ok(n) => {
                        deleted += n;
                        deleted_this_round += n;
                    }
                    Err(e) => {
                        failure.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = failure {
                tracing::warn!(
                    "⚠ Delete wave {} on '{}' failed after {} rows: {}",
                    waves,
                    physical,
                    deleted,
                    e
                );
                return Err(DeleteError::classify(e, deleted));
            }

            if waves % poll_every == 0 {
                let remaining = store
                    .count(physical)
                    .await
                    .map_err(|e| DeleteError::classify(e, deleted))?;
                if deleted + remaining > initial {
                    tracing::warn!(
                        "⚠ '{}' gained rows during delete ({} deleted, {} remaining, {} initially)",
                        physical,
                        deleted,
                        remaining,
                        initial
                    );
                }
                tracing::info!(
                    "  Deleted {}/{} rows from '{}' ({} remaining)",
                    deleted,
                    initial,
                    physical,
                    remaining
                );
                if remaining == 0 {
                    break 'rounds;
                }
            }
        }

        if deleted_this_round == 0 {
            tracing::warn!(
                "⚠ Fetched {} ids from '{}' but deleted none; stopping",
                ids.len(),
                physical
            );
            break;
        }
    }

    let remaining = store
        .count(physical)
        .await
        .map_err(|e| DeleteError::classify(e, deleted))?;
    if remaining > 0 {
        return Err(DeleteError::Incomplete { deleted, remaining });
    }

    tracing::info!(
        "✓ Deleted {} rows from '{}' in {} wave(s)",
        deleted,
        physical,
        waves
    );
    Ok(DeleteOutcome {
        path: DeletePath::Adaptive,
        initial,
        deleted,
        remaining,
        waves,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;
    use crate::store::MemoryStore;

    fn audit_log() -> &'static TableDescriptor {
        registry::lookup("audit_log").unwrap()
    }

    fn small_config() -> DeleteConfig {
        DeleteConfig {
            large_table_threshold: 100,
            fetch_batch: 50,
            chunk_size: 7,
            wave_width: 3,
            poll_every_waves: 2,
        }
    }

    #[tokio::test]
    async fn empty_table_is_idempotent() {
        let store = MemoryStore::new();
        store.create_table("audit_log", None);
        for _ in 0..2 {
            let outcome = delete_all_rows(&store, audit_log(), &small_config())
                .await
                .unwrap();
            assert_eq!(outcome.path, DeletePath::Empty);
            assert_eq!(outcome.deleted, 0);
        }
    }

    #[tokio::test]
    async fn small_table_uses_single_delete() {
        let store = MemoryStore::new();
        store.seed_generated("audit_log", 40);
        let outcome = delete_all_rows(&store, audit_log(), &small_config())
            .await
            .unwrap();
        assert_eq!(outcome.path, DeletePath::Single);
        assert_eq!(outcome.deleted, 40);
        assert_eq!(store.delete_id_calls(), 0);
    }

    #[tokio::test]
    async fn single_delete_timeout_is_reported_as_timeout() {
        let store = MemoryStore::new().with_delete_all_timeout_above(10);
        store.seed_generated("audit_log", 40);
        let err = delete_all_rows(&store, audit_log(), &small_config())
            .await
            .unwrap_err();
        assert!(matches!(err, DeleteError::Timeout { deleted: 0, .. }));
        assert_eq!(store.row_count("audit_log"), 40);
    }

    #[tokio::test]
    async fn adaptive_path_clears_every_row_with_bounded_waves() {
        let store = MemoryStore::new().with_delete_id_limit(7);
        store.seed_generated("audit_log", 333);
        let outcome = delete_all_rows(&store, audit_log(), &small_config())
            .await
            .unwrap();
        assert_eq!(outcome.path, DeletePath::Adaptive);
        assert_eq!(outcome.deleted, 333);
        assert_eq!(outcome.remaining, 0);
        assert_eq!(store.row_count("audit_log"), 0);
        assert!(store.max_concurrent_deletes() <= 3);
        assert!(store.max_concurrent_deletes() > 1);
    }

    #[tokio::test]
    async fn oversized_chunk_reports_cumulative_progress() {
        // Chunks of 7 against a ceiling of 5 fail on the first wave
        let store = MemoryStore::new().with_delete_id_limit(5);
        store.seed_generated("audit_log", 150);
        let err = delete_all_rows(&store, audit_log(), &small_config())
            .await
            .unwrap_err();
        assert!(matches!(err, DeleteError::PlatformLimit { .. }));
        assert_eq!(err.deleted() + store.row_count("audit_log") as u64, 150);
    }

    #[tokio::test]
    async fn retry_after_failure_only_moves_forward() {
        let store = MemoryStore::new().with_delete_id_limit(5);
        store.seed_generated("audit_log", 150);
        let _ = delete_all_rows(&store, audit_log(), &small_config()).await;
        let left = store.row_count("audit_log");

        let mut config = small_config();
        config.chunk_size = 5;
        let outcome = delete_all_rows(&store, audit_log(), &config).await.unwrap();
        assert_eq!(outcome.initial as usize, left);
        assert_eq!(store.row_count("audit_log"), 0);
    }

    #[tokio::test]
    async fn completes_for_many_chunk_configurations() {
        for (chunk_size, wave_width, poll) in [(1, 1, 1), (3, 10, 5), (50, 2, 3), (13, 4, 100)] {
            let store = MemoryStore::new();
            store.seed_generated("audit_log", 257);
            let config = DeleteConfig {
                large_table_threshold: 1,
                fetch_batch: 50,
                chunk_size,
                wave_width,
                poll_every_waves: poll,
            };
            let outcome = delete_all_rows(&store, audit_log(), &config).await.unwrap();
            assert_eq!(outcome.deleted, 257);
            assert_eq!(store.row_count("audit_log"), 0);
        }
    }
}
