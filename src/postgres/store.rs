// ABOUTME: TableStore backed by a live PostgreSQL connection
// ABOUTME: Rows travel as JSON; SQLSTATE codes map onto timeout, size-limit and schema signals

use crate::store::{Ordering, Record, StoreError, TableStore};
use crate::utils::{quote_ident, validate_postgres_identifier};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio_postgres::error::SqlState;
use tokio_postgres::Client;

pub struct PostgresStore {
    client: Client,
}

fn ident(name: &str) -> Result<String, StoreError> {
    validate_postgres_identifier(name).map_err(|e| StoreError::Rejected(e.to_string()))?;
    Ok(quote_ident(name))
}

/// Classify a driver error by SQLSTATE
pub fn classify_error(error: &tokio_postgres::Error) -> StoreError {
    let message = error
        .as_db_error()
        .map(|db| db.message().to_string())
        .unwrap_or_else(|| error.to_string());

    let Some(code) = error.code() else {
        return if error.is_closed() {
            StoreError::Connection(message)
        } else {
            StoreError::Other(message)
        };
    };

    if *code == SqlState::QUERY_CANCELED {
        StoreError::Timeout(message)
    } else if *code == SqlState::PROGRAM_LIMIT_EXCEEDED
        || *code == SqlState::STATEMENT_TOO_COMPLEX
        || *code == SqlState::TOO_MANY_COLUMNS
    {
        StoreError::TooLarge(message)
    } else if *code == SqlState::UNDEFINED_COLUMN {
        StoreError::UnknownColumn(message)
    } else if *code == SqlState::UNDEFINED_TABLE {
        StoreError::UnknownTable(message)
    } else if code.code().starts_with("22") || code.code().starts_with("23") {
        // Data exceptions and constraint violations
        StoreError::Rejected(message)
    } else if code.code().starts_with("08") {
        StoreError::Connection(message)
    } else {
        StoreError::Other(message)
    }
}

/// Columns named by any row, in first-seen order
fn column_union(rows: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

impl PostgresStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect with keepalives, TLS and retry
    pub async fn connect(connection_string: &str) -> Result<Self> {
        let client = super::connection::connect_with_retry(connection_string).await?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl TableStore for PostgresStore {
    async fn count(&self, table: &str) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", ident(table)?);
        let row = self
            .client
            .query_one(&sql, &[])
            .await
            .map_err(|e| classify_error(&e))?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }

    async fn select_page(
        &self,
        table: &str,
        ordering: &Ordering,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let order_by = match ordering {
            Ordering::Descending { column, tiebreak } => format!(
                " ORDER BY {} DESC NULLS LAST, {} ASC",
                ident(column)?,
                ident(tiebreak)?
            ),
            Ordering::Ascending(column) => format!(" ORDER BY {} ASC", ident(column)?),
            // Pages of separate queries must agree on one order
            Ordering::Unordered => " ORDER BY ctid".to_string(),
        };
        let sql = format!(
            "SELECT row_to_json(t) FROM (SELECT * FROM {}{} LIMIT $1 OFFSET $2) t",
            ident(table)?,
            order_by
        );
        let rows = self
            .client
            .query(&sql, &[&(limit as i64), &(offset as i64)])
            .await
            .map_err(|e| classify_error(&e))?;

        rows.into_iter()
            .map(|row| match row.get::<_, Value>(0) {
                Value::Object(record) => Ok(record),
                other => Err(StoreError::Other(format!("expected a row object, got {}", other))),
            })
            .collect()
    }

    async fn select_ids(
        &self,
        table: &str,
        id_column: &str,
        limit: usize,
    ) -> Result<Vec<Value>, StoreError> {
        let sql = format!(
            "SELECT to_json({}) FROM {} LIMIT $1",
            ident(id_column)?,
            ident(table)?
        );
        let rows = self
            .client
            .query(&sql, &[&(limit as i64)])
            .await
            .map_err(|e| classify_error(&e))?;
        Ok(rows.into_iter().map(|row| row.get::<_, Value>(0)).collect())
    }

    async fn delete_all(&self, table: &str) -> Result<u64, StoreError> {
        let sql = format!("DELETE FROM {}", ident(table)?);
        self.client
            .execute(&sql, &[])
            .await
            .map_err(|e| classify_error(&e))
    }

    async fn delete_ids(
        &self,
        table: &str,
        id_column: &str,
        ids: &[Value],
    ) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let table_ident = ident(table)?;
        let id_ident = ident(id_column)?;
        // Typed through the table's row type so the id index is usable
        let sql = format!(
            "DELETE FROM {t} WHERE {c} IN (SELECT {c} FROM json_populate_recordset(NULL::{t}, $1::json))",
            t = table_ident,
            c = id_ident
        );
        let payload = Value::Array(
            ids.iter()
                .map(|id| {
                    let mut obj = Record::new();
                    obj.insert(id_column.to_string(), id.clone());
                    Value::Object(obj)
                })
                .collect(),
        );
        self.client
            .execute(&sql, &[&payload])
            .await
            .map_err(|e| classify_error(&e))
    }

    async fn sync_identity(&self, table: &str, id_column: &str) -> Result<(), StoreError> {
        let table_ident = ident(table)?;
        let id_ident = ident(id_column)?;
        // No-op for columns without a serial or identity sequence
        let sql = format!(
            "SELECT setval(s.seq, COALESCE((SELECT MAX({c}) FROM {t}), 0) + 1, false) \
             FROM (SELECT pg_get_serial_sequence($1, $2) AS seq) s WHERE s.seq IS NOT NULL",
            t = table_ident,
            c = id_ident
        );
        self.client
            .query(&sql, &[&table_ident, &id_column])
            .await
            .map_err(|e| classify_error(&e))?;
        Ok(())
    }

    async fn insert(&self, table: &str, rows: &[Record]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let columns = column_union(rows)
            .iter()
            .map(|c| ident(c))
            .collect::<Result<Vec<_>, _>>()?;
        let column_list = columns.join(", ");
        let table_ident = ident(table)?;
        let sql = format!(
            "INSERT INTO {t} ({cols}) SELECT {cols} FROM json_populate_recordset(NULL::{t}, $1::json)",
            t = table_ident,
            cols = column_list
        );
        let payload = Value::Array(rows.iter().cloned().map(Value::Object).collect());
        self.client
            .execute(&sql, &[&payload])
            .await
            .map_err(|e| classify_error(&e))
    }

    async fn existing_values(
        &self,
        table: &str,
        column: &str,
        values: &[String],
    ) -> Result<Vec<String>, StoreError> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let column_ident = ident(column)?;
        let sql = format!(
            "SELECT DISTINCT {c}::text FROM {t} WHERE {c}::text = ANY($1)",
            c = column_ident,
            t = ident(table)?
        );
        let rows = self
            .client
            .query(&sql, &[&values])
            .await
            .map_err(|e| classify_error(&e))?;
        Ok(rows.into_iter().map(|row| row.get::<_, String>(0)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn column_union_keeps_first_seen_order() {
        let rows: Vec<Record> = vec![
            json!({"b": 1, "a": 2}).as_object().cloned().unwrap(),
            json!({"a": 3, "c": 4}).as_object().cloned().unwrap(),
        ];
        assert_eq!(column_union(&rows), vec!["b", "a", "c"]);
    }

    #[test]
    fn unsafe_identifiers_are_rejected() {
        assert!(matches!(
            ident("users; DROP TABLE x"),
            Err(StoreError::Rejected(_))
        ));
        assert_eq!(ident("kpi_records").unwrap(), "\"kpi_records\"");
    }
}
