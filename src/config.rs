// ABOUTME: Parses vault configuration files for chunk sizes, limits and column aliases
// ABOUTME: Converts TOML format into an EngineConfig passed explicitly at construction

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub page_size: usize,
    /// Pause after this many pages
    pub pause_every_pages: usize,
    pub pause_ms: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            pause_every_pages: 10,
            pause_ms: 100,
        }
    }
}

impl ExportConfig {
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteConfig {
    /// Tables with at least this many rows use the adaptive path
    pub large_table_threshold: u64,
    /// Identifiers fetched per round
    pub fetch_batch: usize,
    /// Identifiers per delete request
    pub chunk_size: usize,
    /// Delete requests in flight per wave
    pub wave_width: usize,
    /// Poll the remaining count every this many waves
    pub poll_every_waves: usize,
}

impl Default for DeleteConfig {
    fn default() -> Self {
        Self {
            large_table_threshold: 50_000,
            fetch_batch: 10_000,
            chunk_size: 300,
            wave_width: 10,
            poll_every_waves: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub chunk_size: usize,
    /// A failed chunk is retried as sub-chunks of `len / split_factor`
    pub split_factor: usize,
    /// How many times a chunk may be split before its rows count as errors
    pub max_split_depth: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            split_factor: 10,
            max_split_depth: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Values per membership lookup, bounded by URL length on REST stores
    pub lookup_batch: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { lookup_batch: 200 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub signed_url_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            signed_url_ttl_secs: 3600,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub export: ExportConfig,
    pub delete: DeleteConfig,
    pub import: ImportConfig,
    pub validation: ValidationConfig,
    pub storage: StorageConfig,
    /// Extra column aliases per table key: alias -> canonical column
    pub aliases: BTreeMap<String, BTreeMap<String, String>>,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.export.page_size == 0 {
            bail!("export.page_size must be greater than zero");
        }
        if self.delete.fetch_batch == 0 || self.delete.chunk_size == 0 {
            bail!("delete.fetch_batch and delete.chunk_size must be greater than zero");
        }
        if self.delete.chunk_size > self.delete.fetch_batch {
            bail!(
                "delete.chunk_size ({}) cannot exceed delete.fetch_batch ({})",
                self.delete.chunk_size,
                self.delete.fetch_batch
            );
        }
        if self.delete.wave_width == 0 || self.delete.poll_every_waves == 0 {
            bail!("delete.wave_width and delete.poll_every_waves must be greater than zero");
        }
        if self.import.chunk_size == 0 {
            bail!("import.chunk_size must be greater than zero");
        }
        if self.import.split_factor < 2 {
            bail!("import.split_factor must be at least 2");
        }
        if self.validation.lookup_batch == 0 {
            bail!("validation.lookup_batch must be greater than zero");
        }
        for table in self.aliases.keys() {
            if crate::registry::lookup(table).is_none() {
                bail!("Aliases configured for unknown table '{}'", table);
            }
        }
        Ok(())
    }
}

pub fn parse_engine_config(raw: &str) -> Result<EngineConfig> {
    let config: EngineConfig = toml::from_str(raw).context("Failed to parse TOML config")?;
    config.validate()?;
    Ok(config)
}

pub fn load_engine_config(path: &str) -> Result<EngineConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path))?;
    parse_engine_config(&raw).with_context(|| format!("Invalid config at {}", path))
}
