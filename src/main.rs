//! # policy-index CLI
//!
//! ```bash
//! policy-index --config ./config/policy-index.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `init` | Create the SQLite database and schema |
//! | `index <dataset\|all>` | Embed and upsert a configured dataset |
//! | `index-file <path>` | Embed and upsert one JSON/JSONL file |
//! | `search "<query>"` | Similarity search with policy boosting |
//! | `stats` | Document counts per source type |
//! | `get <source_type> <chunk_id>` | Show one document |
//! | `lookup <term>` | Keyword lookup, including unembedded documents |
//! | `check <file>` | Run retrieval checks; non-zero exit on failure |

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

use policy_index::progress::ProgressMode;
use policy_index::{checks, config, get, ingest, logging, migrate, search, stats};

/// Index curated political content for retrieval-augmented search.
#[derive(Parser)]
#[command(name = "policy-index", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/policy-index.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Index a configured dataset, or `all` of them.
    Index {
        /// Dataset name from `[datasets.<name>]`, or `all`.
        dataset: String,

        /// Load and validate records without embedding or writing.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr. Defaults to human on a TTY, else off.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Index a single JSON or JSON Lines file.
    IndexFile {
        path: PathBuf,

        /// Applied to records that omit `source_type`.
        #[arg(long)]
        source_type: Option<String>,

        #[arg(long)]
        dry_run: bool,

        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Similarity search over embedded documents.
    Search {
        query: String,

        #[arg(long)]
        limit: Option<usize>,

        /// Minimum raw cosine similarity, in [-1, 1].
        #[arg(long)]
        threshold: Option<f64>,

        /// Rank purely by similarity.
        #[arg(long)]
        no_boost: bool,

        /// Only search these source types (repeatable).
        #[arg(long = "source-type")]
        source_types: Vec<String>,

        #[arg(long)]
        json: bool,
    },

    /// Document counts per source type.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Show one document by its natural key.
    Get {
        source_type: String,
        chunk_id: String,

        #[arg(long)]
        json: bool,
    },

    /// Case-insensitive keyword lookup over title and content.
    Lookup {
        term: String,

        #[arg(long, default_value_t = 10)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// Run retrieval checks from a TOML file.
    Check {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Print shell completions to stdout.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "policy-index", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.log)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index {
            dataset,
            dry_run,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_index(&cfg, &dataset, dry_run, mode).await?;
        }
        Commands::IndexFile {
            path,
            source_type,
            dry_run,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_index_file(&cfg, &path, source_type, dry_run, mode).await?;
        }
        Commands::Search {
            query,
            limit,
            threshold,
            no_boost,
            source_types,
            json,
        } => {
            let mut options = cfg.retrieval.search_options(limit, threshold, no_boost)?;
            options.source_types = source_types;
            search::run_search(&cfg, &query, &options, json).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json).await?;
        }
        Commands::Get {
            source_type,
            chunk_id,
            json,
        } => {
            get::run_get(&cfg, &source_type, &chunk_id, json).await?;
        }
        Commands::Lookup { term, limit, json } => {
            get::run_lookup(&cfg, &term, limit, json).await?;
        }
        Commands::Check { file, json } => {
            if !checks::run_check_command(&cfg, &file, json).await? {
                std::process::exit(1);
            }
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}
