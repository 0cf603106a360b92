// ABOUTME: Universal result envelope returned by every public vault operation
// ABOUTME: Carries success flag, summary message, payload, warnings and failure kind

use serde::{Deserialize, Serialize};

/// Distinguishes failure modes so callers can render them differently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// The store cancelled a statement because it ran too long
    Timeout,
    /// A request exceeded a platform size ceiling
    PlatformLimit,
    /// Some rows or tables succeeded and some failed
    PartialFailure,
    /// Input or snapshot is malformed
    Structural,
    /// The operation was refused before doing any work
    Rejected,
    /// Unclassified backing store failure
    Store,
    /// Unknown table key or missing object
    NotFound,
}

/// Result of a public operation
///
/// Operations never return a bare error past their boundary. Partial success
/// is expressed through `success`, `affected_rows` and `warnings` together.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult<T = ()> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl<T> OperationResult<T> {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            error: None,
            error_kind: None,
            affected_rows: None,
            warnings: Vec::new(),
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: Some(error.into()),
            error_kind: Some(kind),
            affected_rows: None,
            warnings: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: T) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_affected_rows(mut self, rows: u64) -> Self {
        self.affected_rows = Some(rows);
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    /// Tag a successful result that nevertheless lost some rows or tables
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }

    /// Re-type a failed result so it can be returned from an operation with a
    /// different payload. Any payload is dropped.
    pub fn cast<U>(self) -> OperationResult<U> {
        OperationResult {
            success: self.success,
            message: self.message,
            data: None,
            error: self.error,
            error_kind: self.error_kind,
            affected_rows: self.affected_rows,
            warnings: self.warnings,
        }
    }

    /// Human-readable summary combining message, counts and warnings
    pub fn summary(&self) -> String {
        let mut out = self.message.clone();
        if let Some(err) = &self.error {
            if !self.message.contains(err.as_str()) {
                out.push_str(&format!(" ({})", err));
            }
        }
        if !self.warnings.is_empty() {
            out.push_str(&format!(" [{} warning(s)]", self.warnings.len()));
        }
        out
    }
}
