// ABOUTME: In-memory TableStore with fault injection for tests and dry runs
// ABOUTME: Simulates request size ceilings, delete timeouts, rejected rows and lookup failures

use super::{value_as_text, Ordering, Record, StoreError, TableStore};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Mutex;

#[derive(Debug)]
struct MemTable {
    /// Known column set; `None` accepts any column
    columns: Option<Vec<String>>,
    /// Rows keyed by insertion sequence
    rows: BTreeMap<u64, Record>,
    /// `id` text -> insertion sequence
    ids: HashMap<String, u64>,
    next_seq: u64,
    next_id: i64,
}

impl MemTable {
    fn new(columns: Option<Vec<String>>) -> Self {
        Self {
            columns,
            rows: BTreeMap::new(),
            ids: HashMap::new(),
            next_seq: 0,
            next_id: 1,
        }
    }

    fn push(&mut self, mut row: Record) {
        match row.get("id") {
            Some(Value::Number(n)) => {
                if let Some(id) = n.as_i64() {
                    self.next_id = self.next_id.max(id + 1);
                }
            }
            Some(_) => {}
            None => {
                row.insert("id".to_string(), Value::from(self.next_id));
                self.next_id += 1;
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(id) = row.get("id").and_then(value_as_text) {
            self.ids.insert(id, seq);
        }
        self.rows.insert(seq, row);
    }

    fn clear(&mut self) {
        self.rows.clear();
        self.ids.clear();
    }

    fn remove_ids(&mut self, id_column: &str, wanted: &HashSet<String>) -> u64 {
        let mut removed = 0;
        if id_column == "id" {
            for id in wanted {
                if let Some(seq) = self.ids.remove(id) {
                    if self.rows.remove(&seq).is_some() {
                        removed += 1;
                    }
                }
            }
            return removed;
        }

        let doomed: Vec<u64> = self
            .rows
            .iter()
            .filter(|(_, row)| {
                row.get(id_column)
                    .and_then(value_as_text)
                    .map_or(false, |id| wanted.contains(&id))
            })
            .map(|(seq, _)| *seq)
            .collect();
        for seq in doomed {
            if let Some(row) = self.rows.remove(&seq) {
                if let Some(id) = row.get("id").and_then(value_as_text) {
                    self.ids.remove(&id);
                }
                removed += 1;
            }
        }
        removed
    }
}

#[derive(Debug, Default)]
struct Faults {
    max_ids_per_delete: Option<usize>,
    delete_all_timeout_above: Option<u64>,
    poisoned: Option<(String, Value)>,
    failing_lookups: bool,
    failing_selects: HashSet<String>,
    unstable_ties: bool,
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, MemTable>,
    faults: Faults,
    identity_syncs: Vec<String>,
}

/// Simulated table store
///
/// Writes are atomic per call, mirroring a single statement against a real
/// store. Concurrency counters let tests assert bounded fan-out.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delete_id_calls: AtomicUsize,
    count_calls: AtomicUsize,
    select_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create every registry and settings table with its profile columns
    pub fn with_registry_tables(self) -> Self {
        for table in crate::registry::TABLES {
            let columns = crate::registry::profile(table.key).columns;
            self.create_table(
                table.physical,
                Some(columns.iter().map(|c| c.to_string()).collect()),
            );
        }
        for table in crate::registry::SETTINGS_TABLES {
            self.create_table(table, None);
        }
        self
    }

    /// Delete requests listing more ids than `max` fail as too large
    pub fn with_delete_id_limit(self, max: usize) -> Self {
        self.lock().faults.max_ids_per_delete = Some(max);
        self
    }

    /// Unconditional deletes time out when the table holds more than `rows`
    pub fn with_delete_all_timeout_above(self, rows: u64) -> Self {
        self.lock().faults.delete_all_timeout_above = Some(rows);
        self
    }

    /// Any insert batch containing a row with `column == value` is rejected
    pub fn with_poisoned_value(self, column: &str, value: Value) -> Self {
        self.lock().faults.poisoned = Some((column.to_string(), value));
        self
    }

    pub fn with_failing_lookups(self) -> Self {
        self.lock().faults.failing_lookups = true;
        self
    }

    /// Each ordered select starts from a different rotation of the rows, so
    /// rows with equal sort keys come back in a different order per query
    pub fn with_unstable_ties(self) -> Self {
        self.lock().faults.unstable_ties = true;
        self
    }

    pub fn with_failing_select(self, table: &str) -> Self {
        self.lock().faults.failing_selects.insert(table.to_string());
        self
    }

    pub fn create_table(&self, table: &str, columns: Option<Vec<String>>) {
        self.lock()
            .tables
            .insert(table.to_string(), MemTable::new(columns));
    }

    /// Load rows directly, bypassing fault injection
    pub fn seed(&self, table: &str, rows: Vec<Record>) {
        let mut state = self.lock();
        let mem = state
            .tables
            .entry(table.to_string())
            .or_insert_with(|| MemTable::new(None));
        for row in rows {
            mem.push(row);
        }
    }

    /// Load `count` generated rows with sequential ids
    pub fn seed_generated(&self, table: &str, count: usize) {
        let rows = (0..count)
            .map(|i| {
                let mut row = Record::new();
                row.insert("note".to_string(), Value::String(format!("row {}", i)));
                row
            })
            .collect();
        self.seed(table, rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, |t| t.rows.len())
    }

    /// Highest number of delete-by-id requests observed in flight at once
    pub fn max_concurrent_deletes(&self) -> usize {
        self.max_in_flight.load(AtomicOrdering::SeqCst)
    }

    pub fn delete_id_calls(&self) -> usize {
        self.delete_id_calls.load(AtomicOrdering::SeqCst)
    }

    /// Tables whose identity generator was synced, in call order
    pub fn identity_syncs(&self) -> Vec<String> {
        self.lock().identity_syncs.clone()
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(AtomicOrdering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // Poisoning only means another caller panicked mid-test
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn delete_ids_inner(
        &self,
        table: &str,
        id_column: &str,
        ids: &[Value],
    ) -> Result<u64, StoreError> {
        let max_ids = self.lock().faults.max_ids_per_delete;
        if let Some(max) = max_ids {
            if ids.len() > max {
                return Err(StoreError::TooLarge(format!(
                    "{} ids exceeds limit of {}",
                    ids.len(),
                    max
                )));
            }
        }

        // Let the rest of the wave start before this request completes
        tokio::task::yield_now().await;

        let wanted: HashSet<String> = ids.iter().filter_map(value_as_text).collect();
        let mut state = self.lock();
        let mem = state
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        Ok(mem.remove_ids(id_column, &wanted))
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering as O;
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => O::Equal,
        (None | Some(Value::Null), _) => O::Greater,
        (_, None | Some(Value::Null)) => O::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(O::Equal),
        (Some(x), Some(y)) => value_as_text(x).cmp(&value_as_text(y)),
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn count(&self, table: &str) -> Result<u64, StoreError> {
        self.count_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }

    async fn select_page(
        &self,
        table: &str,
        ordering: &Ordering,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let state = self.lock();
        if state.faults.failing_selects.contains(table) {
            return Err(StoreError::Other(format!("select on '{}' failed", table)));
        }
        let mem = state
            .tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;

        let referenced: Vec<&str> = match ordering {
            Ordering::Descending { column, tiebreak } => vec![column.as_str(), tiebreak.as_str()],
            Ordering::Ascending(column) => vec![column.as_str()],
            Ordering::Unordered => Vec::new(),
        };
        if let Some(columns) = &mem.columns {
            if let Some(missing) = referenced.iter().find(|r| !columns.iter().any(|c| c == *r)) {
                return Err(StoreError::UnknownColumn(missing.to_string()));
            }
        }

        let mut rows: Vec<&Record> = mem.rows.values().collect();
        if state.faults.unstable_ties && *ordering != Ordering::Unordered && !rows.is_empty() {
            let shift = self.select_calls.fetch_add(1, AtomicOrdering::SeqCst) + 1;
            let len = rows.len();
            rows.rotate_left(shift % len);
        }
        match ordering {
            Ordering::Descending { column, tiebreak } => rows.sort_by(|a, b| {
                compare_values(b.get(column), a.get(column))
                    .then_with(|| compare_values(a.get(tiebreak), b.get(tiebreak)))
            }),
            Ordering::Ascending(c) => rows.sort_by(|a, b| compare_values(a.get(c), b.get(c))),
            Ordering::Unordered => {}
        }

        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn select_ids(
        &self,
        table: &str,
        id_column: &str,
        limit: usize,
    ) -> Result<Vec<Value>, StoreError> {
        let state = self.lock();
        let mem = state
            .tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        Ok(mem
            .rows
            .values()
            .filter_map(|row| row.get(id_column).cloned())
            .take(limit)
            .collect())
    }

    async fn delete_all(&self, table: &str) -> Result<u64, StoreError> {
        let mut state = self.lock();
        let limit = state.faults.delete_all_timeout_above;
        let mem = state
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        let count = mem.rows.len() as u64;
        if let Some(limit) = limit {
            if count > limit {
                return Err(StoreError::Timeout(format!(
                    "canceling statement due to statement timeout ({} rows)",
                    count
                )));
            }
        }
        mem.clear();
        Ok(count)
    }

    async fn delete_ids(
        &self,
        table: &str,
        id_column: &str,
        ids: &[Value],
    ) -> Result<u64, StoreError> {
        self.delete_id_calls.fetch_add(1, AtomicOrdering::SeqCst);
        let now = self.in_flight.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, AtomicOrdering::SeqCst);
        let result = self.delete_ids_inner(table, id_column, ids).await;
        self.in_flight.fetch_sub(1, AtomicOrdering::SeqCst);
        result
    }

    async fn sync_identity(&self, table: &str, _id_column: &str) -> Result<(), StoreError> {
        // Ids already advance past explicit values on insert
        let mut state = self.lock();
        if !state.tables.contains_key(table) {
            return Err(StoreError::UnknownTable(table.to_string()));
        }
        state.identity_syncs.push(table.to_string());
        Ok(())
    }

    async fn insert(&self, table: &str, rows: &[Record]) -> Result<u64, StoreError> {
        let mut state = self.lock();
        if let Some((column, value)) = &state.faults.poisoned {
            if rows.iter().any(|r| r.get(column) == Some(value)) {
                return Err(StoreError::Rejected(format!(
                    "invalid input value for column '{}'",
                    column
                )));
            }
        }
        let mem = state
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        if let Some(columns) = &mem.columns {
            for row in rows {
                if let Some(unknown) = row.keys().find(|k| !columns.contains(k)) {
                    return Err(StoreError::Rejected(format!(
                        "column '{}' of relation '{}' does not exist",
                        unknown, table
                    )));
                }
            }
        }
        for row in rows {
            mem.push(row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn existing_values(
        &self,
        table: &str,
        column: &str,
        values: &[String],
    ) -> Result<Vec<String>, StoreError> {
        let state = self.lock();
        if state.faults.failing_lookups {
            return Err(StoreError::Connection("lookup connection reset".to_string()));
        }
        let mem = state
            .tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        let present: HashSet<String> = mem
            .rows
            .values()
            .filter_map(|r| r.get(column).and_then(value_as_text))
            .collect();
        Ok(values
            .iter()
            .filter(|v| present.contains(v.as_str()))
            .cloned()
            .collect())
    }
}
