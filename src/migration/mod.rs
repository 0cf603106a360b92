// ABOUTME: Table-level data movement: paginated export, adaptive delete, chunked insert
// ABOUTME: Each routine works against any TableStore and returns typed outcomes

pub mod delete;
pub mod export;
pub mod import;
pub mod input;

pub use delete::{delete_all_rows, DeleteError, DeleteOutcome, DeletePath};
pub use export::{export_table, ExportOutcome};
pub use import::{insert_in_chunks, ImportMode, InsertOutcome};
pub use input::{parse_csv_rows, parse_json_rows};
