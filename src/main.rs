//! # vecrag CLI
//!
//! ## Usage
//!
//! ```bash
//! vecrag --config ./config/vecrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vecrag init` | Create the active database and its schema |
//! | `vecrag ingest <path>` | Ingest a file or every supported file under a directory |
//! | `vecrag search "<query>"` | Nearest chunks for a query |
//! | `vecrag ask "<question>"` | Answer a question from the stored documents |
//! | `vecrag list` | List stored documents |
//! | `vecrag delete <id>` | Delete a document and all its chunks |
//! | `vecrag clear` | Delete every document in the active database |
//! | `vecrag reembed [--ids a,b]` | Recompute vectors in the current mode |
//! | `vecrag databases` | List database profiles |
//! | `vecrag config` | Show the effective runtime configuration |
//! | `vecrag serve` | Start the HTTP server |
//!
//! Set `RUST_LOG` (default `info`) to control log output on stderr.

use anyhow::bail;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use vecrag::{commands, config, server};

/// vecrag: document ingestion, vector retrieval and retrieval-augmented answering.
#[derive(Parser)]
#[command(name = "vecrag", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vecrag.toml")]
    config: PathBuf,

    /// Use this database profile instead of `database.active`.
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database file and schema. Safe to run repeatedly.
    Init,

    /// Ingest a document, or a directory of documents.
    Ingest {
        path: PathBuf,

        /// Name the document is stored and listed under (defaults to the file name).
        #[arg(long)]
        title: Option<String>,

        /// Override the content type detected from the file extension.
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Search stored chunks.
    Search {
        query: String,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Answer a question with the configured LLM.
    Ask {
        question: String,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// List stored documents.
    List,

    /// Delete a document by id.
    Delete { id: String },

    /// Delete every document in the active database.
    Clear,

    /// Recompute vectors for the given document ids, or for everything.
    Reembed {
        /// Comma-separated document ids.
        #[arg(long)]
        ids: Option<String>,
    },

    /// List database profiles; `*` marks the active one.
    Databases,

    /// Print the effective runtime configuration as JSON.
    Config,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(&cli.config)?;

    if let Some(name) = cli.database {
        if !cfg.database.profiles.contains_key(&name) {
            bail!(
                "Unknown database profile: '{}'. Configured: {}",
                name,
                cfg.database
                    .profiles
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        cfg.database.active = name;
    }

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::Ingest {
            path,
            title,
            content_type,
        } => {
            commands::run_ingest(&cfg, &path, title.as_deref(), content_type.as_deref()).await?
        }
        Commands::Search { query, top_k } => commands::run_search(&cfg, &query, top_k).await?,
        Commands::Ask { question, top_k } => commands::run_ask(&cfg, &question, top_k).await?,
        Commands::List => commands::run_list(&cfg).await?,
        Commands::Delete { id } => commands::run_delete(&cfg, &id).await?,
        Commands::Clear => commands::run_clear(&cfg).await?,
        Commands::Reembed { ids } => commands::run_reembed(&cfg, ids.as_deref()).await?,
        Commands::Databases => commands::run_databases(&cfg).await?,
        Commands::Config => commands::run_config(&cfg).await?,
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}
