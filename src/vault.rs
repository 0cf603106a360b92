// ABOUTME: Engine facade that owns the store, storage, normalizer, validator and hook
// ABOUTME: Every public table operation goes through here and returns an OperationResult

use crate::config::EngineConfig;
use crate::hooks::{NoopHook, RecalculationHook};
use crate::migration::input::InputError;
use crate::migration::{self, DeleteError, DeleteOutcome, ImportMode, InsertOutcome};
use crate::normalize::{coerce_types, Normalizer};
use crate::registry::{self, TableCategory, TableDescriptor};
use crate::result::{ErrorKind, OperationResult};
use crate::storage::ObjectStorage;
use crate::store::{Record, StoreError, TableStore};
use crate::validation::{RelationshipValidator, ValidationReport};
use serde::Serialize;
use std::sync::Arc;

/// What an import did, returned as the result payload
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub table: String,
    pub mode: ImportMode,
    /// Rows removed first in replace mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared: Option<u64>,
    pub inserted: u64,
    pub failed_rows: u64,
    pub splits: usize,
    pub errors: Vec<String>,
    /// Natural keys the recalculation hook ran for
    pub recalculated: usize,
}

/// The migration engine
pub struct Vault {
    store: Arc<dyn TableStore>,
    storage: Option<Arc<dyn ObjectStorage>>,
    hook: Arc<dyn RecalculationHook>,
    config: EngineConfig,
    normalizer: Normalizer,
    validator: RelationshipValidator,
}

pub(crate) fn store_error_kind(error: &StoreError) -> ErrorKind {
    match error {
        StoreError::Timeout(_) => ErrorKind::Timeout,
        StoreError::TooLarge(_) => ErrorKind::PlatformLimit,
        StoreError::UnknownTable(_) => ErrorKind::NotFound,
        StoreError::Rejected(_) | StoreError::UnknownColumn(_) => ErrorKind::Rejected,
        StoreError::Connection(_) | StoreError::Other(_) => ErrorKind::Store,
    }
}

fn delete_failure<T>(table: &TableDescriptor, error: DeleteError) -> OperationResult<T> {
    let (kind, message) = match &error {
        DeleteError::Timeout { .. } => (
            ErrorKind::Timeout,
            format!("Clearing '{}' timed out", table.display),
        ),
        DeleteError::PlatformLimit { .. } => (
            ErrorKind::PlatformLimit,
            format!("Clearing '{}' hit a platform limit", table.display),
        ),
        DeleteError::Store { .. } => (
            ErrorKind::Store,
            format!("Clearing '{}' failed", table.display),
        ),
        DeleteError::Incomplete { remaining, .. } => (
            ErrorKind::Store,
            format!(
                "Clearing '{}' stopped with {} rows remaining",
                table.display, remaining
            ),
        ),
    };
    OperationResult::failure(kind, message, error.to_string()).with_affected_rows(error.deleted())
}

impl Vault {
    pub fn new(store: Arc<dyn TableStore>, config: EngineConfig) -> Self {
        let normalizer = Normalizer::new(&config);
        let validator = RelationshipValidator::new(config.validation.lookup_batch);
        Self {
            store,
            storage: None,
            hook: Arc::new(NoopHook),
            config,
            normalizer,
            validator,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn RecalculationHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn TableStore {
        self.store.as_ref()
    }

    pub(crate) fn storage(&self) -> Option<&dyn ObjectStorage> {
        self.storage.as_deref()
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Replace the configuration, rebuilding alias maps and dropping cached keys
    pub fn reload_config(&mut self, config: EngineConfig) -> anyhow::Result<()> {
        config.validate()?;
        self.normalizer.reload(&config);
        self.validator = RelationshipValidator::new(config.validation.lookup_batch);
        self.config = config;
        tracing::info!("Engine configuration reloaded");
        Ok(())
    }

    /// Forget reference keys confirmed by earlier validations
    pub fn refresh_reference_cache(&self) {
        self.validator.refresh();
    }

    pub fn tables(&self) -> &'static [TableDescriptor] {
        registry::TABLES
    }

    fn resolve<T>(&self, key: &str) -> Result<&'static TableDescriptor, OperationResult<T>> {
        registry::lookup(key).ok_or_else(|| {
            OperationResult::failure(
                ErrorKind::NotFound,
                format!("Unknown table '{}'", key),
                format!("'{}' is not a registered table", key),
            )
        })
    }

    /// Read every row of a table
    pub async fn export_table(&self, key: &str) -> OperationResult<Vec<Record>> {
        let table = match self.resolve(key) {
            Ok(t) => t,
            Err(failure) => return failure,
        };
        match migration::export_table(self.store(), table, &self.config.export).await {
            Ok(outcome) => {
                let count = outcome.rows.len() as u64;
                OperationResult::ok(format!("Exported {} rows from {}", count, table.display))
                    .with_affected_rows(count)
                    .with_data(outcome.rows)
            }
            Err(e) => OperationResult::failure(
                store_error_kind(&e),
                format!("Export of {} failed", table.display),
                e.to_string(),
            ),
        }
    }

    /// Delete every row of a table
    pub async fn clear_table(&self, key: &str) -> OperationResult<DeleteOutcome> {
        let table = match self.resolve(key) {
            Ok(t) => t,
            Err(failure) => return failure,
        };
        match migration::delete_all_rows(self.store(), table, &self.config.delete).await {
            Ok(outcome) => OperationResult::ok(format!(
                "Deleted {} rows from {} ({} remaining)",
                outcome.deleted, table.display, outcome.remaining
            ))
            .with_affected_rows(outcome.deleted)
            .with_data(outcome),
            Err(e) => delete_failure(table, e),
        }
    }

    /// Check natural-key references without importing
    pub async fn validate_rows(&self, key: &str, rows: &[Record]) -> OperationResult<ValidationReport> {
        let table = match self.resolve(key) {
            Ok(t) => t,
            Err(failure) => return failure,
        };
        let normalized = self.normalizer.normalize(table.key, rows.to_vec());
        let report = self
            .validator
            .validate(self.store(), table.key, &normalized.rows)
            .await;
        let mut warnings = normalized.warnings;
        warnings.extend(report.warnings.iter().cloned());

        let result = if report.valid {
            OperationResult::ok(format!("{} rows are valid for {}", rows.len(), table.display))
        } else {
            OperationResult::failure(
                ErrorKind::Structural,
                format!("Rows for {} are malformed", table.display),
                report.errors.join("; "),
            )
        };
        result.with_warnings(warnings).with_data(report)
    }

    /// Import rows into a table
    ///
    /// Rows are normalized and checked first; malformed input aborts before
    /// anything is deleted. Replace mode then clears the table, and a failed
    /// clear aborts the import.
    pub async fn import_rows(
        &self,
        key: &str,
        rows: Vec<Record>,
        mode: ImportMode,
    ) -> OperationResult<ImportSummary> {
        let table = match self.resolve(key) {
            Ok(t) => t,
            Err(failure) => return failure,
        };
        let profile = registry::profile(table.key);
        let total = rows.len();
        tracing::info!("Importing {} rows into '{}' ({:?})", total, table.physical, mode);

        let normalized = self.normalizer.normalize(table.key, rows);
        let mut warnings = normalized.warnings;
        let mut rows = normalized.rows;

        let report = self.validator.validate(self.store(), table.key, &rows).await;
        warnings.extend(report.warnings);
        if !report.valid {
            return OperationResult::failure(
                ErrorKind::Structural,
                format!("Import into {} rejected: malformed rows", table.display),
                report.errors.join("; "),
            )
            .with_warnings(warnings);
        }

        let mut summary = ImportSummary {
            table: table.key.to_string(),
            mode,
            ..Default::default()
        };

        if mode == ImportMode::Replace {
            match migration::delete_all_rows(self.store(), table, &self.config.delete).await {
                Ok(outcome) => summary.cleared = Some(outcome.deleted),
                Err(e) => {
                    tracing::warn!("⚠ Replace import into '{}' aborted: {}", table.physical, e);
                    return delete_failure::<ImportSummary>(table, e).with_warnings(warnings);
                }
            }
        }

        if rows.is_empty() {
            return OperationResult::ok(format!("No rows to import into {}", table.display))
                .with_affected_rows(0)
                .with_warnings(warnings)
                .with_data(summary);
        }

        coerce_types(profile, &mut rows);
        let key_column = match table.category {
            TableCategory::Business => profile.recalc_key,
            _ => None,
        };
        let InsertOutcome {
            inserted,
            failed_rows,
            splits,
            errors,
            committed_keys,
        } = migration::insert_in_chunks(self.store(), table, rows, &self.config.import, key_column)
            .await;
        summary.inserted = inserted;
        summary.failed_rows = failed_rows;
        summary.splits = splits;
        summary.errors = errors;

        for natural_key in &committed_keys {
            match self.hook.recalculate(table.key, natural_key).await {
                Ok(()) => summary.recalculated += 1,
                Err(e) => {
                    let warning = format!("Recalculation for '{}' failed: {}", natural_key, e);
                    tracing::warn!("⚠ {}", warning);
                    warnings.push(warning);
                }
            }
        }

        let result = if failed_rows == 0 {
            tracing::info!("✓ Imported {} rows into '{}'", inserted, table.physical);
            OperationResult::ok(format!("Imported {} rows into {}", inserted, table.display))
        } else if inserted > 0 {
            OperationResult::ok(format!(
                "Imported {} of {} rows into {}; {} rows failed",
                inserted, total, table.display, failed_rows
            ))
            .with_kind(ErrorKind::PartialFailure)
        } else {
            OperationResult::failure(
                ErrorKind::PartialFailure,
                format!("No rows imported into {}; {} rows failed", table.display, failed_rows),
                summary.errors.first().cloned().unwrap_or_default(),
            )
        };

        let mut result = result.with_affected_rows(inserted).with_warnings(warnings);
        if result.success && failed_rows > 0 {
            result.error = summary.errors.first().cloned();
        }
        result.with_data(summary)
    }

    /// Parse CSV text and import it
    pub async fn import_csv(
        &self,
        key: &str,
        text: &str,
        mode: ImportMode,
    ) -> OperationResult<ImportSummary> {
        let table = match self.resolve(key) {
            Ok(t) => t,
            Err(failure) => return failure,
        };
        match self.parse_csv(table, text) {
            Ok(rows) => self.import_rows(key, rows, mode).await,
            Err(e) => OperationResult::failure(
                ErrorKind::Structural,
                format!("Could not read CSV for {}", table.display),
                e.to_string(),
            ),
        }
    }

    /// Parse CSV text the way `import_csv` does and check it without importing
    pub async fn validate_csv(&self, key: &str, text: &str) -> OperationResult<ValidationReport> {
        let table = match self.resolve(key) {
            Ok(t) => t,
            Err(failure) => return failure,
        };
        match self.parse_csv(table, text) {
            Ok(rows) => self.validate_rows(key, &rows).await,
            Err(e) => OperationResult::failure(
                ErrorKind::Structural,
                format!("Could not read CSV for {}", table.display),
                e.to_string(),
            ),
        }
    }

    /// CSV rows with natural-key cells resolved through this table's aliases
    fn parse_csv(&self, table: &TableDescriptor, text: &str) -> Result<Vec<Record>, InputError> {
        let profile = registry::profile(table.key);
        let is_identity = |header: &str| {
            self.normalizer
                .canonical_column(table.key, header)
                .map_or(false, |column| profile.is_identity(&column))
        };
        migration::parse_csv_rows(text, is_identity)
    }

    /// Parse JSON text (array or `{rows: [...]}`) and import it
    pub async fn import_json(
        &self,
        key: &str,
        text: &str,
        mode: ImportMode,
    ) -> OperationResult<ImportSummary> {
        let table = match self.resolve(key) {
            Ok(t) => t,
            Err(failure) => return failure,
        };
        match migration::parse_json_rows(text) {
            Ok(rows) => self.import_rows(key, rows, mode).await,
            Err(e) => OperationResult::failure(
                ErrorKind::Structural,
                format!("Could not read JSON for {}", table.display),
                e.to_string(),
            ),
        }
    }
}
