// ABOUTME: Maps loosely-named import headers onto canonical column names
// ABOUTME: Also nulls unparseable dates and coerces numeric/boolean columns

use crate::config::EngineConfig;
use crate::registry::{self, TableProfile};
use crate::store::Record;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Number, Value};
use std::collections::HashMap;

/// Built-in aliases per table key: (alias, canonical column)
const DEFAULT_ALIASES: &[(&str, &[(&str, &str)])] = &[
    (
        "departments",
        &[
            ("dept_code", "code"),
            ("department_code", "code"),
            ("department", "name"),
            ("department_name", "name"),
            ("manager", "manager_code"),
        ],
    ),
    (
        "activities",
        &[
            ("activity", "name"),
            ("activity_name", "name"),
            ("type", "category"),
            ("active", "is_active"),
        ],
    ),
    (
        "employees",
        &[
            ("code", "employee_code"),
            ("emp_code", "employee_code"),
            ("employee_id", "employee_code"),
            ("name", "full_name"),
            ("employee_name", "full_name"),
            ("e_mail", "email"),
            ("mail", "email"),
            ("department", "department_code"),
            ("dept", "department_code"),
            ("start_date", "hire_date"),
            ("hired", "hire_date"),
            ("active", "is_active"),
        ],
    ),
    (
        "kpi",
        &[
            ("date", "period"),
            ("month", "period"),
            ("employee", "employee_code"),
            ("emp_code", "employee_code"),
            ("code", "employee_code"),
            ("activity", "activity_name"),
            ("kpi", "activity_name"),
            ("actual", "value"),
            ("result", "value"),
            ("score", "value"),
            ("goal", "target"),
            ("target_value", "target"),
            ("met", "achieved"),
            ("hit", "achieved"),
            ("comment", "notes"),
            ("remarks", "notes"),
        ],
    ),
    (
        "daily_reports",
        &[
            ("date", "report_date"),
            ("day", "report_date"),
            ("employee", "employee_code"),
            ("emp_code", "employee_code"),
            ("activity", "activity_name"),
            ("hrs", "hours"),
            ("hours_worked", "hours"),
            ("qty", "quantity"),
            ("count", "quantity"),
            ("comment", "notes"),
            ("remarks", "notes"),
        ],
    ),
    (
        "monthly_targets",
        &[
            ("period", "month"),
            ("employee", "employee_code"),
            ("emp_code", "employee_code"),
            ("activity", "activity_name"),
            ("target", "target_value"),
            ("goal", "target_value"),
        ],
    ),
    (
        "audit_log",
        &[("user", "actor"), ("event", "action"), ("timestamp", "created_at")],
    ),
];

const NA_SENTINELS: &[&str] = &["n/a", "na", "-", "--", "none", "null", ""];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%d %b %Y"];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Rows after normalization, with the warnings produced along the way
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub rows: Vec<Record>,
    pub warnings: Vec<String>,
}

/// Header normalizer configured from an explicit alias map
///
/// Alias maps are rebuilt only through [`Normalizer::reload`].
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    aliases: HashMap<String, HashMap<String, String>>,
}

/// Lowercase a header and collapse punctuation/whitespace runs to `_`
pub fn header_key(header: &str) -> String {
    let mut out = String::with_capacity(header.len());
    let mut pending_sep = false;
    for ch in header.trim_start_matches('\u{feff}').chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

impl Normalizer {
    pub fn new(config: &EngineConfig) -> Self {
        let mut normalizer = Self::default();
        normalizer.reload(config);
        normalizer
    }

    /// Rebuild alias maps from built-in defaults plus configured extras
    pub fn reload(&mut self, config: &EngineConfig) {
        let mut aliases: HashMap<String, HashMap<String, String>> = HashMap::new();
        for (table, pairs) in DEFAULT_ALIASES {
            let map = aliases.entry(table.to_string()).or_default();
            for (alias, canonical) in pairs.iter() {
                map.insert(header_key(alias), canonical.to_string());
            }
        }
        for (table, extra) in &config.aliases {
            let map = aliases.entry(table.clone()).or_default();
            for (alias, canonical) in extra {
                map.insert(header_key(alias), canonical.clone());
            }
        }
        self.aliases = aliases;
    }

    /// Canonical column for a header, if the header is recognized
    pub fn canonical_column(&self, table: &str, header: &str) -> Option<String> {
        let key = header_key(header);
        let profile = registry::profile(table);
        if profile.is_known_column(&key) {
            return Some(key);
        }
        self.aliases
            .get(table)
            .and_then(|m| m.get(&key))
            .cloned()
    }

    /// Rename headers and null unparseable dates. Never fails.
    pub fn normalize(&self, table: &str, rows: Vec<Record>) -> Normalized {
        let profile = registry::profile(table);
        let mut warnings = Vec::new();
        let mut cleaned = Vec::with_capacity(rows.len());

        for (row_idx, row) in rows.into_iter().enumerate() {
            let mut out = Record::new();
            for (col_idx, (header, value)) in row.into_iter().enumerate() {
                let canonical = self.canonical_column(table, &header);
                let name = match (col_idx, canonical, profile.positional_first_column) {
                    (_, Some(name), _) => name,
                    (0, None, Some(positional)) => positional.to_string(),
                    (_, None, _) => header,
                };

                match out.get(&name) {
                    Some(existing) if !is_blank(existing) => {}
                    _ => {
                        out.insert(name, value);
                    }
                }
            }

            for column in profile.date_columns {
                if let Some(Value::String(raw)) = out.get(*column) {
                    let trimmed = raw.trim();
                    if !trimmed.is_empty() && parse_date(trimmed).is_none() {
                        let warning = format!(
                            "Row {}: '{}' value '{}' is not a valid date; imported as null",
                            row_idx + 1,
                            column,
                            raw
                        );
                        tracing::warn!("{}", warning);
                        warnings.push(warning);
                        out.insert(column.to_string(), Value::Null);
                    }
                }
            }

            cleaned.push(out);
        }

        Normalized {
            rows: cleaned,
            warnings,
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Parse the date forms seen in spreadsheets and exports
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.date());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(d);
        }
    }
    // Month-only values such as 2024-03
    NaiveDate::parse_from_str(&format!("{}-01", raw), "%Y-%m-%d").ok()
}

fn is_na(raw: &str) -> bool {
    let lower = raw.trim().to_lowercase();
    NA_SENTINELS.contains(&lower.as_str())
}

fn parse_number(raw: &str) -> Option<Number> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if let Ok(i) = cleaned.parse::<i64>() {
        return Some(Number::from(i));
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(Number::from_f64)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// Coerce textual numeric and boolean cells of a table's known columns
///
/// "N/A"-style sentinels become null; unparseable text is left for the store
/// to accept or reject.
pub fn coerce_types(profile: &TableProfile, rows: &mut [Record]) {
    for row in rows.iter_mut() {
        for column in profile.numeric_columns {
            if let Some(Value::String(raw)) = row.get(*column) {
                let replacement = if is_na(raw) {
                    Some(Value::Null)
                } else {
                    parse_number(raw).map(Value::Number)
                };
                if let Some(value) = replacement {
                    row.insert(column.to_string(), value);
                }
            }
        }
        for column in profile.boolean_columns {
            let replacement = match row.get(*column) {
                Some(Value::String(raw)) if is_na(raw) => Some(Value::Null),
                Some(Value::String(raw)) => parse_bool(raw).map(Value::Bool),
                Some(Value::Number(n)) => n.as_i64().and_then(|i| match i {
                    0 => Some(Value::Bool(false)),
                    1 => Some(Value::Bool(true)),
                    _ => None,
                }),
                _ => None,
            };
            if let Some(value) = replacement {
                row.insert(column.to_string(), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn normalizer() -> Normalizer {
        Normalizer::new(&EngineConfig::default())
    }

    #[test]
    fn header_key_collapses_punctuation() {
        assert_eq!(header_key("  Activity Name "), "activity_name");
        assert_eq!(header_key("E-mail"), "e_mail");
        assert_eq!(header_key("\u{feff}Hours  Worked!"), "hours_worked");
        assert_eq!(header_key("EMPLOYEE_CODE"), "employee_code");
    }

    #[test]
    fn aliases_are_case_insensitive() {
        let n = normalizer();
        let out = n.normalize(
            "kpi",
            vec![record(json!({"EMPLOYEE": "ENG-001", "Activity": "Calls", "Actual": "5"}))],
        );
        let row = &out.rows[0];
        assert_eq!(row["employee_code"], "ENG-001");
        assert_eq!(row["activity_name"], "Calls");
        assert_eq!(row["value"], "5");
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn unknown_headers_pass_through_unchanged() {
        let n = normalizer();
        let out = n.normalize("kpi", vec![record(json!({"Mystery Column": 1}))]);
        assert_eq!(out.rows[0]["Mystery Column"], 1);
    }

    #[test]
    fn unlabeled_first_column_is_report_date() {
        let n = normalizer();
        let out = n.normalize(
            "daily_reports",
            vec![record(json!({"": "2024-03-01", "Employee": "OPS-7", "Hrs": "7.5"}))],
        );
        let row = &out.rows[0];
        assert_eq!(row["report_date"], "2024-03-01");
        assert_eq!(row["employee_code"], "OPS-7");
        assert_eq!(row["hours"], "7.5");
    }

    #[test]
    fn recognized_first_column_is_not_reinterpreted() {
        let n = normalizer();
        let out = n.normalize(
            "daily_reports",
            vec![record(json!({"id": 4, "report_date": "2024-03-01"}))],
        );
        assert_eq!(out.rows[0]["id"], 4);
        assert_eq!(out.rows[0]["report_date"], "2024-03-01");
    }

    #[test]
    fn corrupt_dates_become_null_with_warning() {
        let n = normalizer();
        let out = n.normalize(
            "kpi",
            vec![
                record(json!({"period": "2024-01-31"})),
                record(json!({"period": "2024-01-31 (estimated)"})),
            ],
        );
        assert_eq!(out.rows[0]["period"], "2024-01-31");
        assert_eq!(out.rows[1]["period"], Value::Null);
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("Row 2"));
    }

    #[test]
    fn configured_aliases_are_applied_after_reload() {
        let mut n = normalizer();
        assert_eq!(n.canonical_column("kpi", "Sales Rep"), None);

        let mut config = EngineConfig::default();
        config
            .aliases
            .entry("kpi".into())
            .or_default()
            .insert("Sales Rep".into(), "employee_code".into());
        n.reload(&config);
        assert_eq!(
            n.canonical_column("kpi", "sales rep"),
            Some("employee_code".to_string())
        );
    }

    #[test]
    fn duplicate_targets_keep_first_non_blank() {
        let n = normalizer();
        let out = n.normalize(
            "kpi",
            vec![record(json!({"notes": "first", "Remarks": "second"}))],
        );
        assert_eq!(out.rows[0]["notes"], "first");
    }

    #[test]
    fn parses_common_date_forms() {
        for raw in [
            "2024-02-29",
            "2024/02/29",
            "29/02/2024",
            "2024-02-29T10:00:00Z",
            "2024-02-29 10:00:00",
            "2024-02",
        ] {
            assert!(parse_date(raw).is_some(), "{} should parse", raw);
        }
        assert!(parse_date("TBD").is_none());
        assert!(parse_date("2024-13-45").is_none());
    }

    #[test]
    fn coerces_numbers_booleans_and_sentinels() {
        let profile = registry::profile("kpi");
        let mut rows = vec![
            record(json!({"value": "1,250", "target": "N/A", "achieved": "yes"})),
            record(json!({"value": "3.5", "target": "abc", "achieved": 0})),
        ];
        coerce_types(profile, &mut rows);
        assert_eq!(rows[0]["value"], json!(1250));
        assert_eq!(rows[0]["target"], Value::Null);
        assert_eq!(rows[0]["achieved"], json!(true));
        assert_eq!(rows[1]["value"], json!(3.5));
        assert_eq!(rows[1]["target"], "abc");
        assert_eq!(rows[1]["achieved"], json!(false));
    }
}
