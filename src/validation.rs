// ABOUTME: Pre-import check that natural-key references exist in their target tables
// ABOUTME: Missing references and lookup failures become warnings, never blocking errors

use crate::registry::{self, Reference};
use crate::store::{value_as_text, Record, TableStore};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

/// Outcome of validating a set of rows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// False only for structurally malformed input
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Checks natural-key references with batched membership lookups
///
/// Keys confirmed to exist are cached until [`RelationshipValidator::refresh`]
/// is called.
#[derive(Debug)]
pub struct RelationshipValidator {
    lookup_batch: usize,
    cache: Mutex<HashMap<(String, String), HashSet<String>>>,
}

impl RelationshipValidator {
    pub fn new(lookup_batch: usize) -> Self {
        Self {
            lookup_batch: lookup_batch.max(1),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Forget every cached key
    pub fn refresh(&self) {
        self.cache_lock().clear();
    }

    pub fn cached_keys(&self) -> usize {
        self.cache_lock().values().map(HashSet::len).sum()
    }

    fn cache_lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), HashSet<String>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn validate(
        &self,
        store: &dyn TableStore,
        table: &str,
        rows: &[Record],
    ) -> ValidationReport {
        let profile = registry::profile(table);
        let mut report = ValidationReport {
            valid: true,
            ..Default::default()
        };

        for (idx, row) in rows.iter().enumerate() {
            if row.is_empty() {
                report
                    .errors
                    .push(format!("Row {} has no columns", idx + 1));
            }
            for reference in profile.references {
                if let Some(value @ (Value::Object(_) | Value::Array(_))) =
                    row.get(reference.column)
                {
                    report.errors.push(format!(
                        "Row {}: '{}' must be a scalar, got {}",
                        idx + 1,
                        reference.column,
                        value
                    ));
                }
            }
        }
        if !report.errors.is_empty() {
            report.valid = false;
            return report;
        }

        for reference in profile.references {
            self.check_reference(store, reference, rows, &mut report.warnings)
                .await;
        }

        report
    }

    async fn check_reference(
        &self,
        store: &dyn TableStore,
        reference: &Reference,
        rows: &[Record],
        warnings: &mut Vec<String>,
    ) {
        // Referenced key -> number of rows using it
        let mut usage: BTreeMap<String, usize> = BTreeMap::new();
        for row in rows {
            if let Some(key) = row.get(reference.column).and_then(value_as_text) {
                let key = key.trim().to_string();
                if !key.is_empty() {
                    *usage.entry(key).or_default() += 1;
                }
            }
        }
        if usage.is_empty() {
            return;
        }

        let Some(target) = registry::lookup(reference.table) else {
            warnings.push(format!(
                "Cannot verify {} references: table '{}' is not registered",
                reference.label, reference.table
            ));
            return;
        };

        let cache_key = (
            reference.table.to_string(),
            reference.target_column.to_string(),
        );
        let unknown: Vec<String> = {
            let cache = self.cache_lock();
            let known = cache.get(&cache_key);
            usage
                .keys()
                .filter(|k| known.map_or(true, |set| !set.contains(*k)))
                .cloned()
                .collect()
        };

        let mut found = HashSet::new();
        for batch in unknown.chunks(self.lookup_batch) {
            match store
                .existing_values(target.physical, reference.target_column, batch)
                .await
            {
                Ok(present) => found.extend(present),
                Err(e) => {
                    let warning = format!(
                        "Could not verify {} references against '{}': {}",
                        reference.label, reference.table, e
                    );
                    tracing::warn!("{}", warning);
                    warnings.push(warning);
                    return;
                }
            }
        }

        for key in &unknown {
            if !found.contains(key) {
                warnings.push(format!(
                    "{} '{}' referenced by {} row(s) does not exist in {}",
                    reference.label, key, usage[key], reference.table
                ));
            }
        }

        self.cache_lock()
            .entry(cache_key)
            .or_default()
            .extend(found);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn store_with_activities() -> MemoryStore {
        let store = MemoryStore::new().with_registry_tables();
        store.seed(
            "activities",
            vec![
                record(json!({"name": "Calls"})),
                record(json!({"name": "Visits"})),
            ],
        );
        store
    }

    #[tokio::test]
    async fn valid_activity_names_produce_no_warnings() {
        let store = store_with_activities();
        let validator = RelationshipValidator::new(200);
        let rows = vec![
            record(json!({"activity_name": "Calls", "value": 4})),
            record(json!({"activity_name": "Visits", "value": 2})),
        ];
        let report = validator.validate(&store, "kpi", &rows).await;
        assert!(report.valid);
        assert!(report.warnings.is_empty());
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn missing_references_are_warnings_with_counts() {
        let store = store_with_activities();
        let validator = RelationshipValidator::new(200);
        let rows = vec![
            record(json!({"activity_name": "Emails"})),
            record(json!({"activity_name": "Emails"})),
            record(json!({"activity_name": "Calls"})),
        ];
        let report = validator.validate(&store, "kpi", &rows).await;
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("'Emails' referenced by 2 row(s)"));
    }

    #[tokio::test]
    async fn lookup_failure_degrades_to_warning() {
        let store = MemoryStore::new().with_registry_tables().with_failing_lookups();
        let validator = RelationshipValidator::new(200);
        let rows = vec![record(json!({"activity_name": "Calls"}))];
        let report = validator.validate(&store, "kpi", &rows).await;
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].starts_with("Could not verify"));
    }

    #[tokio::test]
    async fn non_scalar_reference_is_structural() {
        let store = store_with_activities();
        let validator = RelationshipValidator::new(200);
        let rows = vec![record(json!({"activity_name": ["Calls"]}))];
        let report = validator.validate(&store, "kpi", &rows).await;
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn confirmed_keys_are_cached_until_refresh() {
        let store = store_with_activities();
        let validator = RelationshipValidator::new(1);
        let rows = vec![
            record(json!({"activity_name": "Calls"})),
            record(json!({"activity_name": "Visits"})),
        ];
        validator.validate(&store, "kpi", &rows).await;
        assert_eq!(validator.cached_keys(), 2);
        validator.refresh();
        assert_eq!(validator.cached_keys(), 0);
    }

    #[tokio::test]
    async fn tables_without_references_are_always_clean() {
        let store = MemoryStore::new().with_registry_tables();
        let validator = RelationshipValidator::new(200);
        let rows = vec![record(json!({"actor": "admin", "action": "login"}))];
        let report = validator.validate(&store, "audit_log", &rows).await;
        assert_eq!(
            report,
            ValidationReport {
                valid: true,
                ..Default::default()
            }
        );
    }
}
