// ABOUTME: Parses CSV and JSON import payloads into raw row records
// ABOUTME: CSV null markers become null except in natural-key columns, which keep empty strings

use crate::store::Record;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("invalid CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Shape(String),
}

fn is_null_marker(cell: &str) -> bool {
    cell.is_empty() || cell == "null" || cell == "NULL"
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Parse CSV text with a header row
///
/// `is_identity` receives each raw header and reports whether it names a
/// natural-key column. Quoted fields may contain commas and newlines; short
/// rows are padded with nulls.
///
/// An unlabeled first column is kept under the empty header. Unlabeled
/// columns after it (trailing commas) are dropped. When a header repeats,
/// the first non-blank cell wins.
pub fn parse_csv_rows<F>(text: &str, is_identity: F) -> Result<Vec<Record>, InputError>
where
    F: Fn(&str) -> bool,
{
    let text = text.trim_start_matches('\u{feff}');
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(InputError::Shape("CSV has no header row".to_string()));
    }
    let identity: Vec<bool> = headers.iter().map(|h| is_identity(h)).collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let mut row = Record::new();
        for (idx, header) in headers.iter().enumerate() {
            if idx > 0 && header.is_empty() {
                continue;
            }
            let cell = record.get(idx).unwrap_or("");
            let value = if identity[idx] {
                Value::String(cell.to_string())
            } else if is_null_marker(cell) {
                Value::Null
            } else {
                Value::String(cell.to_string())
            };
            match row.get(header) {
                Some(existing) if !is_blank(existing) => {}
                _ => {
                    row.insert(header.clone(), value);
                }
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Parse a JSON array of objects, or an object holding one under `rows`
pub fn parse_json_rows(text: &str) -> Result<Vec<Record>, InputError> {
    let value: Value = serde_json::from_str(text)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("rows") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(InputError::Shape(
                    "expected an array of rows or an object with a 'rows' array".to_string(),
                ))
            }
        },
        _ => {
            return Err(InputError::Shape(
                "expected an array of rows or an object with a 'rows' array".to_string(),
            ))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| match item {
            Value::Object(row) => Ok(row),
            other => Err(InputError::Shape(format!(
                "row {} is not an object: {}",
                idx + 1,
                other
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quoted_cells_keep_commas() {
        let text = "name,notes\nCalls,\"first, second\"\n";
        let rows = parse_csv_rows(text, |_| false).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["notes"], json!("first, second"));
    }

    #[test]
    fn null_markers_respect_identity_columns() {
        let text = "employee_code,notes,hours\n,NULL,null\n";
        let rows = parse_csv_rows(text, |h| h == "employee_code").unwrap();
        assert_eq!(rows[0]["employee_code"], json!(""));
        assert_eq!(rows[0]["notes"], Value::Null);
        assert_eq!(rows[0]["hours"], Value::Null);
    }

    #[test]
    fn short_rows_are_padded_and_blank_lines_skipped() {
        let text = "a,b,c\n1,2\n,,\n4,5,6\n";
        let rows = parse_csv_rows(text, |_| false).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["c"], Value::Null);
        assert_eq!(rows[1]["c"], json!("6"));
    }

    #[test]
    fn header_order_is_preserved() {
        let rows = parse_csv_rows("\u{feff}z,a,m\n1,2,3\n", |_| false).unwrap();
        let keys: Vec<_> = rows[0].keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn trailing_unlabeled_column_does_not_shadow_first() {
        let text = ",Employee,Hrs,\n2024-03-01,OPS-7,7.5,\n";
        let rows = parse_csv_rows(text, |_| false).unwrap();
        assert_eq!(rows[0][""], json!("2024-03-01"));
        assert_eq!(rows[0].len(), 3);
    }

    #[test]
    fn repeated_header_keeps_first_non_blank_cell() {
        let rows = parse_csv_rows("notes,notes,x\nfirst,second,1\n,later,2\n", |_| false).unwrap();
        assert_eq!(rows[0]["notes"], json!("first"));
        assert_eq!(rows[1]["notes"], json!("later"));
        let keys: Vec<_> = rows[0].keys().cloned().collect();
        assert_eq!(keys, vec!["notes", "x"]);
    }

    #[test]
    fn json_accepts_array_or_rows_object() {
        let a = parse_json_rows(r#"[{"x": 1}, {"x": 2}]"#).unwrap();
        let b = parse_json_rows(r#"{"rows": [{"x": 1}, {"x": 2}]}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn json_rejects_non_object_rows() {
        assert!(matches!(
            parse_json_rows("[1, 2]"),
            Err(InputError::Shape(_))
        ));
        assert!(matches!(
            parse_json_rows(r#"{"data": []}"#),
            Err(InputError::Shape(_))
        ));
        assert!(matches!(parse_json_rows("{"), Err(InputError::Json(_))));
    }
}
