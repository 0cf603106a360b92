// ABOUTME: Downstream recalculation hook invoked after imports into business tables
// ABOUTME: Runs once per distinct affected natural key; failures never fail the import

use async_trait::async_trait;
use std::sync::Mutex;

/// Recomputes derived data for one natural key after its rows changed
#[async_trait]
pub trait RecalculationHook: Send + Sync {
    async fn recalculate(&self, table: &str, key: &str) -> anyhow::Result<()>;
}

/// Hook that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

#[async_trait]
impl RecalculationHook for NoopHook {
    async fn recalculate(&self, _table: &str, _key: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hook that records every call, optionally failing for one key
#[derive(Debug, Default)]
pub struct RecordingHook {
    calls: Mutex<Vec<(String, String)>>,
    fail_on: Option<String>,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(key: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on: Some(key.to_string()),
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RecalculationHook for RecordingHook {
    async fn recalculate(&self, table: &str, key: &str) -> anyhow::Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((table.to_string(), key.to_string()));
        }
        if self.fail_on.as_deref() == Some(key) {
            anyhow::bail!("recalculation for '{}' failed", key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_hook_fails_only_for_its_key() {
        let hook = RecordingHook::failing_on("E2");
        assert!(hook.recalculate("kpi", "E1").await.is_ok());
        assert!(hook.recalculate("kpi", "E2").await.is_err());
        assert_eq!(hook.calls().len(), 2);
    }
}
