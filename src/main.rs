//! # Groundwork CLI (`gw`)
//!
//! The `gw` binary ingests documents into named collections and answers
//! questions over them with citations and a confidence score.
//!
//! ## Usage
//!
//! ```bash
//! gw --config ./config/gw.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gw init` | Create the SQLite database and run schema migrations |
//! | `gw ingest <path>` | Chunk and upsert a file or directory tree |
//! | `gw delete <source-id>` | Remove one source from a collection |
//! | `gw reset` | Empty a collection |
//! | `gw query "<question>"` | Answer a question with citations |
//! | `gw migrate --model <m>` | Re-embed a collection under a new model |
//! | `gw retry-pending` | Retry queued index deletes |
//! | `gw stats` | Show per-collection statistics |
//!
//! ## Examples
//!
//! ```bash
//! gw init
//! gw ingest ./docs --collection handbook
//! gw query "how do I rotate credentials?" --collection handbook
//! gw query "ERR_CONN_RESET" --strategy keyword --json
//! gw migrate --model text-embedding-3-large --dry-run
//! ```
//!
//! Log verbosity is controlled by the `GW_LOG` environment variable
//! (an `EnvFilter` directive, default `info`). Logs go to stderr.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use groundwork::app::{self, App};
use groundwork::{config, db, migrate};

/// Groundwork CLI: grounded question answering over document collections.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/gw.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "gw",
    about = "Groundwork: grounded question answering over continuously updated document collections",
    version,
    long_about = "Groundwork plans keyword and vector retrieval, fuses and reranks the \
    results, and composes a cited answer with a confidence score. Its ingestion layer keeps \
    indexes, caches, and embeddings consistent as documents change."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/gw.toml`.
    #[arg(long, global = true, default_value = "./config/gw.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Running
    /// it more than once is safe.
    Init,

    /// Chunk and upsert documents.
    ///
    /// A single file becomes one source named after the file; a directory
    /// is walked and each matching file becomes a source identified by its
    /// relative path. Unchanged chunks are skipped without re-embedding.
    Ingest {
        /// File or directory to ingest.
        path: PathBuf,

        /// Override the source id (single file only).
        #[arg(long)]
        source_id: Option<String>,

        /// Target collection (defaults to `ingest.collection`).
        #[arg(long)]
        collection: Option<String>,
    },

    /// Remove every chunk of a source from a collection.
    Delete {
        /// Source id as printed by `gw ingest`.
        source_id: String,

        #[arg(long)]
        collection: Option<String>,
    },

    /// Remove every chunk in a collection and drop its indexes.
    Reset {
        #[arg(long)]
        collection: Option<String>,
    },

    /// Answer a question from a collection.
    Query {
        /// The question.
        question: String,

        /// Force a retrieval strategy: keyword, vector, or hybrid.
        #[arg(long)]
        strategy: Option<String>,

        #[arg(long)]
        collection: Option<String>,

        /// Number of evidence passages to return.
        #[arg(long)]
        top_k: Option<usize>,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Re-embed a collection under a new model.
    ///
    /// Embeddings are written to a shadow space; the active version flips
    /// only after every chunk is covered (or with `--force`).
    Migrate {
        /// Target embedding model.
        #[arg(long)]
        model: String,

        /// Report chunk count and estimated tokens without embedding.
        #[arg(long)]
        dry_run: bool,

        /// Flip even if some chunks failed to embed.
        #[arg(long)]
        force: bool,

        #[arg(long)]
        collection: Option<String>,
    },

    /// Retry index deletes that previously failed.
    RetryPending {
        /// Maximum number of queued operations to attempt.
        #[arg(long, default_value = "100")]
        limit: usize,
    },

    /// Show per-collection statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("GW_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        let pool = db::connect(&cfg).await?;
        migrate::run_migrations(&pool).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let app = App::open(cfg).await?;

    match cli.command {
        Commands::Init => {}
        Commands::Ingest {
            path,
            source_id,
            collection,
        } => {
            app::run_ingest(&app, &path, source_id, collection.as_deref()).await?;
        }
        Commands::Delete {
            source_id,
            collection,
        } => {
            app::run_delete(&app, &source_id, collection.as_deref()).await?;
        }
        Commands::Reset { collection } => {
            app::run_reset(&app, collection.as_deref()).await?;
        }
        Commands::Query {
            question,
            strategy,
            collection,
            top_k,
            json,
        } => {
            app::run_query(
                &app,
                &question,
                collection.as_deref(),
                strategy.as_deref(),
                top_k,
                json,
            )
            .await?;
        }
        Commands::Migrate {
            model,
            dry_run,
            force,
            collection,
        } => {
            app::run_migrate(&app, &model, collection.as_deref(), dry_run, force).await?;
        }
        Commands::RetryPending { limit } => {
            app::run_retry_pending(&app, limit).await?;
        }
        Commands::Stats => {
            app::run_stats(&app).await?;
        }
    }

    Ok(())
}
