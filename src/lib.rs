// ABOUTME: Library module for seren-vault
// ABOUTME: Exports the vault engine, its store seams and the CLI command handlers

pub mod backup;
pub mod commands;
pub mod config;
pub mod hooks;
pub mod migration;
pub mod normalize;
pub mod postgres;
pub mod registry;
pub mod remote;
pub mod result;
pub mod storage;
pub mod store;
pub mod utils;
pub mod validation;
pub mod vault;

pub use result::{ErrorKind, OperationResult};
pub use vault::{ImportSummary, Vault};
