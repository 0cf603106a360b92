// ABOUTME: Static catalog of migratable tables and their column profiles
// ABOUTME: Adding a table to backup/import/export is one descriptor plus one profile

use serde::Serialize;

/// Grouping used for display and restore ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TableCategory {
    /// Lookup data other tables reference by natural key
    Reference,
    /// Business records that trigger downstream recalculation
    Business,
    /// Operational history
    Operational,
}

/// A migratable table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    /// Stable logical name shared with callers
    pub key: &'static str,
    /// Name of the table in the backing store
    pub physical: &'static str,
    pub display: &'static str,
    pub category: TableCategory,
    /// Opaque identity column used for id-list deletes
    pub id_column: &'static str,
    /// Preferred export ordering, if the table has one
    pub recency_column: Option<&'static str>,
}

/// A natural-key reference from one table's column to another table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub column: &'static str,
    pub table: &'static str,
    pub target_column: &'static str,
    /// Label used in warnings ("Activity", "Employee", ...)
    pub label: &'static str,
}

/// Column knowledge the importer needs for one table
#[derive(Debug, Clone, Copy)]
pub struct TableProfile {
    pub key: &'static str,
    /// Canonical column names accepted verbatim
    pub columns: &'static [&'static str],
    /// Natural-key columns: empty cells stay empty strings, never null
    pub identity_columns: &'static [&'static str],
    pub date_columns: &'static [&'static str],
    pub numeric_columns: &'static [&'static str],
    pub boolean_columns: &'static [&'static str],
    pub references: &'static [Reference],
    /// Column whose distinct values drive the recalculation hook
    pub recalc_key: Option<&'static str>,
    /// Canonical column that an unlabeled first column always means
    pub positional_first_column: Option<&'static str>,
}

const ACTIVITY_REF: Reference = Reference {
    column: "activity_name",
    table: "activities",
    target_column: "name",
    label: "Activity",
};

const EMPLOYEE_REF: Reference = Reference {
    column: "employee_code",
    table: "employees",
    target_column: "employee_code",
    label: "Employee",
};

pub const TABLES: &[TableDescriptor] = &[
    TableDescriptor {
        key: "departments",
        physical: "departments",
        display: "Departments",
        category: TableCategory::Reference,
        id_column: "id",
        recency_column: Some("updated_at"),
    },
    TableDescriptor {
        key: "activities",
        physical: "activities",
        display: "Activities",
        category: TableCategory::Reference,
        id_column: "id",
        recency_column: Some("updated_at"),
    },
    TableDescriptor {
        key: "employees",
        physical: "employees",
        display: "Employees",
        category: TableCategory::Reference,
        id_column: "id",
        recency_column: Some("updated_at"),
    },
    TableDescriptor {
        key: "kpi",
        physical: "kpi_records",
        display: "KPI Records",
        category: TableCategory::Business,
        id_column: "id",
        recency_column: Some("updated_at"),
    },
    TableDescriptor {
        key: "daily_reports",
        physical: "daily_reports",
        display: "Daily Reports",
        category: TableCategory::Business,
        id_column: "id",
        recency_column: Some("created_at"),
    },
    TableDescriptor {
        key: "monthly_targets",
        physical: "monthly_targets",
        display: "Monthly Targets",
        category: TableCategory::Business,
        id_column: "id",
        recency_column: Some("created_at"),
    },
    TableDescriptor {
        key: "audit_log",
        physical: "audit_log",
        display: "Audit Log",
        category: TableCategory::Operational,
        id_column: "id",
        recency_column: Some("created_at"),
    },
];

/// Settings tables dumped into every snapshot next to the registry tables
pub const SETTINGS_TABLES: &[&str] = &["app_settings", "feature_flags"];

const PROFILES: &[TableProfile] = &[
    TableProfile {
        key: "departments",
        columns: &["id", "code", "name", "manager_code", "created_at", "updated_at"],
        identity_columns: &["code"],
        date_columns: &[],
        numeric_columns: &[],
        boolean_columns: &[],
        references: &[],
        recalc_key: None,
        positional_first_column: None,
    },
    TableProfile {
        key: "activities",
        columns: &[
            "id",
            "name",
            "category",
            "unit",
            "is_active",
            "created_at",
            "updated_at",
        ],
        identity_columns: &["name"],
        date_columns: &[],
        numeric_columns: &[],
        boolean_columns: &["is_active"],
        references: &[],
        recalc_key: None,
        positional_first_column: None,
    },
    TableProfile {
        key: "employees",
        columns: &[
            "id",
            "employee_code",
            "full_name",
            "email",
            "department_code",
            "hire_date",
            "is_active",
            "created_at",
            "updated_at",
        ],
        identity_columns: &["employee_code"],
        date_columns: &["hire_date"],
        numeric_columns: &[],
        boolean_columns: &["is_active"],
        references: &[Reference {
            column: "department_code",
            table: "departments",
            target_column: "code",
            label: "Department",
        }],
        recalc_key: None,
        positional_first_column: None,
    },
    TableProfile {
        key: "kpi",
        columns: &[
            "id",
            "period",
            "employee_code",
            "activity_name",
            "value",
            "target",
            "achieved",
            "notes",
            "created_at",
            "updated_at",
        ],
        identity_columns: &["employee_code", "activity_name"],
        date_columns: &["period"],
        numeric_columns: &["value", "target"],
        boolean_columns: &["achieved"],
        references: &[ACTIVITY_REF, EMPLOYEE_REF],
        recalc_key: Some("employee_code"),
        positional_first_column: None,
    },
    TableProfile {
        key: "daily_reports",
        columns: &[
            "id",
            "report_date",
            "employee_code",
            "activity_name",
            "hours",
            "quantity",
            "notes",
            "created_at",
        ],
        identity_columns: &["employee_code", "activity_name"],
        date_columns: &["report_date"],
        numeric_columns: &["hours", "quantity"],
        boolean_columns: &[],
        references: &[ACTIVITY_REF, EMPLOYEE_REF],
        recalc_key: Some("employee_code"),
        positional_first_column: Some("report_date"),
    },
    TableProfile {
        key: "monthly_targets",
        columns: &[
            "id",
            "month",
            "employee_code",
            "activity_name",
            "target_value",
            "created_at",
        ],
        identity_columns: &["employee_code", "activity_name"],
        date_columns: &["month"],
        numeric_columns: &["target_value"],
        boolean_columns: &[],
        references: &[ACTIVITY_REF, EMPLOYEE_REF],
        recalc_key: Some("employee_code"),
        positional_first_column: None,
    },
    TableProfile {
        key: "audit_log",
        columns: &[
            "id",
            "actor",
            "action",
            "entity",
            "entity_id",
            "details",
            "created_at",
        ],
        identity_columns: &[],
        date_columns: &[],
        numeric_columns: &[],
        boolean_columns: &[],
        references: &[],
        recalc_key: None,
        positional_first_column: None,
    },
];

const EMPTY_PROFILE: TableProfile = TableProfile {
    key: "",
    columns: &[],
    identity_columns: &[],
    date_columns: &[],
    numeric_columns: &[],
    boolean_columns: &[],
    references: &[],
    recalc_key: None,
    positional_first_column: None,
};

/// Look up a table by its logical key
pub fn lookup(key: &str) -> Option<&'static TableDescriptor> {
    TABLES.iter().find(|t| t.key == key)
}

/// Column profile for a table; unknown keys get an empty profile
pub fn profile(key: &str) -> &'static TableProfile {
    PROFILES.iter().find(|p| p.key == key).unwrap_or(&EMPTY_PROFILE)
}

/// Position of a table in registry order, used to restore referenced tables first
pub fn position(key: &str) -> usize {
    TABLES
        .iter()
        .position(|t| t.key == key)
        .unwrap_or(TABLES.len())
}

impl TableProfile {
    pub fn is_identity(&self, column: &str) -> bool {
        self.identity_columns.contains(&column)
    }

    pub fn is_known_column(&self, column: &str) -> bool {
        self.columns.contains(&column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn registry_keys_are_unique() {
        let keys: HashSet<_> = TABLES.iter().map(|t| t.key).collect();
        assert_eq!(keys.len(), TABLES.len());
    }

    #[test]
    fn every_table_has_a_profile() {
        for table in TABLES {
            assert_eq!(profile(table.key).key, table.key, "missing profile for {}", table.key);
        }
    }

    #[test]
    fn physical_names_are_safe_identifiers() {
        for table in TABLES {
            crate::utils::validate_postgres_identifier(table.physical).unwrap();
        }
        for table in SETTINGS_TABLES {
            crate::utils::validate_postgres_identifier(table).unwrap();
        }
    }

    #[test]
    fn references_point_at_registered_tables() {
        for p in PROFILES {
            for r in p.references {
                assert!(lookup(r.table).is_some(), "{} references unknown {}", p.key, r.table);
                assert!(profile(r.table).is_known_column(r.target_column));
                assert!(p.is_known_column(r.column));
            }
        }
    }

    #[test]
    fn referenced_tables_come_first() {
        for p in PROFILES {
            for r in p.references {
                if r.table != p.key {
                    assert!(position(r.table) < position(p.key));
                }
            }
        }
    }

    #[test]
    fn lookup_unknown_key() {
        assert!(lookup("nope").is_none());
        assert!(profile("nope").columns.is_empty());
    }
}
