// ABOUTME: CLI entry point for seren-vault
// ABOUTME: Parses commands and routes to the table, backup and upload handlers

use clap::{Args, Parser, Subcommand};
use seren_vault::commands::{self, ConnectionArgs};
use seren_vault::migration::ImportMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "seren-vault")]
#[command(about = "Bulk table export, import and full backup/restore for PostgreSQL-backed apps", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct Connection {
    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
    /// Engine configuration file (TOML)
    #[arg(long, env = "SEREN_VAULT_CONFIG")]
    config: Option<String>,
    /// Object storage base URL, for backups that include stored files
    #[arg(long, env = "STORAGE_URL")]
    storage_url: Option<String>,
    /// Object storage service key
    #[arg(long, env = "STORAGE_KEY", hide_env_values = true)]
    storage_key: Option<String>,
}

impl From<Connection> for ConnectionArgs {
    fn from(c: Connection) -> Self {
        ConnectionArgs {
            database_url: c.database_url,
            config: c.config,
            storage_url: c.storage_url,
            storage_key: c.storage_key,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List migratable tables
    Tables {
        /// Also count rows in this database
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
    },
    /// Export every row of a table
    Export {
        #[command(flatten)]
        connection: Connection,
        #[arg(long)]
        table: String,
        /// Write to a .csv or .json file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Delete every row of a table
    Clear {
        #[command(flatten)]
        connection: Connection,
        #[arg(long)]
        table: String,
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Import a .csv or .json file into a table
    Import {
        #[command(flatten)]
        connection: Connection,
        #[arg(long)]
        table: String,
        #[arg(long)]
        file: PathBuf,
        /// append or replace
        #[arg(long, default_value = "append")]
        mode: ImportMode,
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Check a file's references without importing it
    Validate {
        #[command(flatten)]
        connection: Connection,
        #[arg(long)]
        table: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Snapshot every table, storage bucket and settings table
    Backup {
        #[command(flatten)]
        connection: Connection,
        /// Snapshot file (defaults to backup-<timestamp>.json)
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Restore tables from a snapshot file
    Restore {
        #[command(flatten)]
        connection: Connection,
        #[arg(long)]
        input: PathBuf,
        /// append or replace
        #[arg(long, default_value = "append")]
        mode: ImportMode,
        /// Restore only these tables (comma-separated)
        #[arg(long, value_delimiter = ',')]
        tables: Option<Vec<String>>,
        /// Also restore settings tables
        #[arg(long)]
        include_settings: bool,
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Upload a snapshot file to a remote drive folder
    Upload {
        #[arg(long)]
        input: PathBuf,
        /// OAuth bearer token for the drive
        #[arg(long, env = "DRIVE_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,
        /// Target folder id
        #[arg(long)]
        folder: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging - default to INFO level if RUST_LOG not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Tables { database_url } => {
            let args = database_url.map(|database_url| ConnectionArgs {
                database_url,
                ..Default::default()
            });
            commands::tables(args.as_ref()).await
        }
        Commands::Export {
            connection,
            table,
            output,
        } => commands::export(&connection.into(), &table, output.as_deref()).await,
        Commands::Clear {
            connection,
            table,
            yes,
        } => commands::clear(&connection.into(), &table, yes).await,
        Commands::Import {
            connection,
            table,
            file,
            mode,
            yes,
        } => commands::import(&connection.into(), &table, &file, mode, yes).await,
        Commands::Validate {
            connection,
            table,
            file,
        } => commands::validate(&connection.into(), &table, &file).await,
        Commands::Backup {
            connection,
            output,
            description,
        } => {
            commands::backup(&connection.into(), output.as_deref(), description.as_deref()).await
        }
        Commands::Restore {
            connection,
            input,
            mode,
            tables,
            include_settings,
            yes,
        } => {
            commands::restore(
                &connection.into(),
                &input,
                mode,
                tables,
                include_settings,
                yes,
            )
            .await
        }
        Commands::Upload {
            input,
            access_token,
            folder,
        } => commands::upload(&input, &access_token, folder.as_deref()).await,
    }
}
