// ABOUTME: Paginated full-table export with ordering fallback
// ABOUTME: Reads fixed-size pages until a short page, pausing periodically to bound load

use crate::config::ExportConfig;
use crate::registry::TableDescriptor;
use crate::store::{Ordering, Record, StoreError, TableStore};

/// Rows exported from one table
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub rows: Vec<Record>,
    /// Ordering the export settled on
    pub ordering: Ordering,
    pub pages: usize,
}

fn ordering_candidates(table: &TableDescriptor) -> Vec<Ordering> {
    let mut candidates = Vec::with_capacity(3);
    if let Some(recency) = table.recency_column {
        candidates.push(Ordering::Descending {
            column: recency.to_string(),
            tiebreak: table.id_column.to_string(),
        });
    }
    candidates.push(Ordering::Ascending(table.id_column.to_string()));
    candidates.push(Ordering::Unordered);
    candidates
}

/// Export every row of a table
///
/// The first page decides the ordering: an unknown-column signal moves on to
/// the next candidate (recency, identity, none). Any other error aborts the
/// export and discards the pages read so far.
pub async fn export_table(
    store: &dyn TableStore,
    table: &TableDescriptor,
    config: &ExportConfig,
) -> Result<ExportOutcome, StoreError> {
    let page_size = config.page_size.max(1);
    let mut candidates = ordering_candidates(table).into_iter();
    let mut ordering = candidates.next().unwrap_or(Ordering::Unordered);

    let first = loop {
        match store.select_page(table.physical, &ordering, 0, page_size).await {
            Ok(page) => break page,
            Err(StoreError::UnknownColumn(column)) => match candidates.next() {
                Some(next) => {
                    tracing::debug!(
                        "Table '{}' has no column '{}', falling back to {:?}",
                        table.physical,
                        column,
                        next
                    );
                    ordering = next;
                }
                None => return Err(StoreError::UnknownColumn(column)),
            },
            Err(e) => return Err(e),
        }
    };

    let mut rows = Vec::with_capacity(first.len());
    let mut last_len = first.len();
    rows.extend(first);
    let mut pages = 1;

    while last_len == page_size {
        if config.pause_every_pages > 0 && pages % config.pause_every_pages == 0 {
            tokio::time::sleep(config.pause()).await;
        }
        let offset = rows.len() as u64;
        let page = store
            .select_page(table.physical, &ordering, offset, page_size)
            .await?;
        last_len = page.len();
        rows.extend(page);
        pages += 1;
        tracing::debug!(
            "Exported page {} of '{}' ({} rows so far)",
            pages,
            table.physical,
            rows.len()
        );
    }

    tracing::info!(
        "✓ Exported {} rows from '{}' in {} page(s)",
        rows.len(),
        table.physical,
        pages
    );

    Ok(ExportOutcome {
        rows,
        ordering,
        pages,
    })
}
