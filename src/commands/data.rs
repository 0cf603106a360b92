// ABOUTME: Table-level commands: export, clear, import and validate
// ABOUTME: File formats are picked by extension (.csv or .json)

use super::{confirm_destructive, finish, open_vault, ConnectionArgs};
use crate::migration::{self, ImportMode};
use crate::result::OperationResult;
use crate::store::{value_as_text, Record};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Csv,
    Json,
}

fn format_of(path: &Path) -> Result<FileFormat> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("csv") => Ok(FileFormat::Csv),
        Some("json") => Ok(FileFormat::Json),
        _ => bail!(
            "Cannot tell the format of {}: use a .csv or .json file",
            path.display()
        ),
    }
}

/// Render rows as CSV with the union of their columns as header
pub fn rows_to_csv(rows: &[Record]) -> Result<String> {
    let mut header: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !header.contains(&key.as_str()) {
                header.push(key);
            }
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&header)?;
    for row in rows {
        let cells: Vec<String> = header
            .iter()
            .map(|column| row.get(*column).and_then(value_as_text).unwrap_or_default())
            .collect();
        writer.write_record(&cells)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV output: {}", e))?;
    String::from_utf8(bytes).context("CSV output was not valid UTF-8")
}

pub async fn export(args: &ConnectionArgs, table: &str, output: Option<&Path>) -> Result<()> {
    let vault = open_vault(args).await?;
    let result = vault.export_table(table).await;
    if !result.success {
        return finish(&result);
    }
    let rows = result.data.as_deref().unwrap_or_default();

    match output {
        Some(path) => {
            let body = match format_of(path)? {
                FileFormat::Csv => rows_to_csv(rows)?,
                FileFormat::Json => serde_json::to_string_pretty(rows)?,
            };
            fs::write(path, body)
                .with_context(|| format!("Failed to write export to {}", path.display()))?;
            tracing::info!("✓ Wrote {} rows to {}", rows.len(), path.display());
            let summary: OperationResult = result.cast();
            finish(&summary)
        }
        None => finish(&result),
    }
}

pub async fn clear(args: &ConnectionArgs, table: &str, yes: bool) -> Result<()> {
    confirm_destructive(&format!("Delete ALL rows from '{}'?", table), yes)?;
    let vault = open_vault(args).await?;
    finish(&vault.clear_table(table).await)
}

pub async fn import(
    args: &ConnectionArgs,
    table: &str,
    file: &Path,
    mode: ImportMode,
    yes: bool,
) -> Result<()> {
    let format = format_of(file)?;
    let text = fs::read_to_string(file)
        .with_context(|| format!("Failed to read import file {}", file.display()))?;
    if mode == ImportMode::Replace {
        confirm_destructive(
            &format!("Replace ALL rows in '{}' with {}?", table, file.display()),
            yes,
        )?;
    }

    let vault = open_vault(args).await?;
    let result = match format {
        FileFormat::Csv => vault.import_csv(table, &text, mode).await,
        FileFormat::Json => vault.import_json(table, &text, mode).await,
    };
    finish(&result)
}

pub async fn validate(args: &ConnectionArgs, table: &str, file: &Path) -> Result<()> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let format = format_of(file)?;
    let vault = open_vault(args).await?;
    let result = match format {
        FileFormat::Csv => vault.validate_csv(table, &text).await,
        FileFormat::Json => {
            let rows = migration::parse_json_rows(&text)?;
            vault.validate_rows(table, &rows).await
        }
    };
    finish(&result)
}
