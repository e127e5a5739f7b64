use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docsync::{config, get, migrate, schema_cmd, status, sync_cmd};

/// docsync CLI: incremental document synchronization into a local store.
///
/// All commands except `schema` read a TOML configuration file given by
/// `--config`. See `config/docsync.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docsync",
    about = "docsync: incremental document synchronization with schema-driven upserts",
    version,
    long_about = "docsync pulls document metadata from pluggable drivers page by page, \
    upserts it into a schema-driven document store, backfills content for documents \
    flagged dirty, and persists a resumable cursor per (account, source)."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docsync.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `documents` and
    /// `milestones` tables. Safe to run repeatedly.
    Init,

    /// Run one sync for an (account, source) through a driver.
    ///
    /// Processes documents flagged dirty first; otherwise polls metadata
    /// pages until the driver reports completion.
    Sync {
        /// Driver name, e.g. `fixture:demo`.
        driver: String,

        #[arg(long)]
        account: String,

        #[arg(long)]
        source: String,
    },

    /// Show the sync status of an (account, source).
    Status {
        #[arg(long)]
        account: String,

        #[arg(long)]
        source: String,
    },

    /// Print one stored document as JSON.
    Get {
        #[arg(long)]
        account: String,

        #[arg(long)]
        source: String,

        /// Document id.
        id: String,
    },

    /// Count stored documents per type for an account.
    Counts {
        #[arg(long)]
        account: String,
    },

    /// Compile a schema file (or the builtin schema) and print its fields.
    Schema {
        /// Path to a JSON schema description.
        path: Option<PathBuf>,
    },
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,sqlx=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that don't require config
    if let Commands::Schema { path } = &cli.command {
        return schema_cmd::run_schema(path.as_deref());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync {
            driver,
            account,
            source,
        } => {
            sync_cmd::run_sync(&cfg, &driver, &account, &source).await?;
        }
        Commands::Status { account, source } => {
            status::run_status(&cfg, &account, &source).await?;
        }
        Commands::Get {
            account,
            source,
            id,
        } => {
            get::run_get(&cfg, &account, &source, &id).await?;
        }
        Commands::Counts { account } => {
            status::run_counts(&cfg, &account).await?;
        }
        Commands::Schema { .. } => {}
    }

    Ok(())
}
