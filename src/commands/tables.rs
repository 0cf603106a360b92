// ABOUTME: Lists the migratable tables in registry order
// ABOUTME: Needs no connection; row counts are added when a database URL is given

use super::{open_vault, ConnectionArgs};
use crate::registry;
use anyhow::Result;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TableListing {
    key: &'static str,
    physical: &'static str,
    display: &'static str,
    category: registry::TableCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    rows: Option<u64>,
}

pub async fn tables(connection: Option<&ConnectionArgs>) -> Result<()> {
    let vault = match connection {
        Some(args) => Some(open_vault(args).await?),
        None => None,
    };

    let mut listing = Vec::with_capacity(registry::TABLES.len());
    for table in registry::TABLES {
        let rows = match &vault {
            Some(vault) => match vault.store().count(table.physical).await {
                Ok(n) => Some(n),
                Err(e) => {
                    tracing::warn!("⚠ Could not count '{}': {}", table.physical, e);
                    None
                }
            },
            None => None,
        };
        listing.push(TableListing {
            key: table.key,
            physical: table.physical,
            display: table.display,
            category: table.category,
            rows,
        });
    }

    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}
