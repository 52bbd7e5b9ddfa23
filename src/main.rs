//! # medrag CLI
//!
//! The `medrag` binary ingests medical reference documents into the local
//! vector store, answers questions through the hybrid orchestrator, and runs
//! the HTTP query server.
//!
//! ## Usage
//!
//! ```bash
//! medrag --config ./config/medrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `medrag init [--reset]` | Create the SQLite database and run schema migrations |
//! | `medrag ingest <manifest>` | Extract, chunk, embed, and index the documents in a manifest |
//! | `medrag query "<message>"` | Answer a question |
//! | `medrag route "<message>"` | Show which strategy a question would use |
//! | `medrag status` | Summarise the indexed corpus |
//! | `medrag managed import <manifest>` | Import manifest documents into the managed corpus |
//! | `medrag managed status` | Show managed corpus readiness |
//! | `medrag serve` | Start the HTTP query server |
//!
//! ## Examples
//!
//! ```bash
//! medrag init
//! medrag ingest ./corpus/manifest.toml --dry-run
//! medrag ingest ./corpus/manifest.toml
//! medrag query "What is the treatment for malaria?" --role professional
//! medrag serve
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use medrag::config;
use medrag::logging::init_tracing;
use medrag::services::Services;
use medrag::{db, ingest, managed, migrate, server, status};
use medrag_core::models::{RetrievalResult, Role};
use medrag_core::router::classify;

/// medrag: hybrid retrieval over medical guidelines.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/medrag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "medrag",
    about = "Hybrid retrieval-augmented answers over medical guidelines",
    version,
    long_about = "medrag indexes medical reference documents into a local vector store, \
    routes each question to a managed corpus, the local store, or both, and falls back \
    to the other source when one is unavailable."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/medrag.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent. With `--reset`, also deletes every indexed chunk.
    Init {
        #[arg(long)]
        reset: bool,
    },

    /// Ingest the documents listed in a TOML manifest.
    ///
    /// Documents are processed one at a time; a failing document is
    /// reported and the job continues.
    Ingest {
        manifest: PathBuf,

        /// Extract and chunk only; print chunk and token estimates.
        #[arg(long)]
        dry_run: bool,
    },

    /// Answer a question.
    Query {
        message: String,

        /// `patient` or `professional`.
        #[arg(long, default_value = "patient")]
        role: Role,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the routing decision for a question without answering it.
    Route {
        message: String,

        #[arg(long, default_value = "patient")]
        role: Role,
    },

    /// Summarise the indexed corpus.
    Status,

    /// Manage the externally hosted corpus.
    Managed {
        #[command(subcommand)]
        action: ManagedAction,
    },

    /// Start the HTTP query server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum ManagedAction {
    /// Import every manifest document that has a `storage.remote_uri`.
    Import { manifest: PathBuf },
    /// Show whether the managed corpus exists and is ready.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Routing is pure and needs no config.
    if let Commands::Route { message, role } = &cli.command {
        let analysis = classify(message, *role);
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init { reset } => {
            migrate::run_migrations(&cfg).await?;
            if reset {
                let pool = db::connect(&cfg).await?;
                let deleted = migrate::reset(&pool).await?;
                pool.close().await;
                println!("Corpus reset: {} chunks deleted.", deleted);
            }
            println!("Database initialized successfully.");
        }
        Commands::Ingest { manifest, dry_run } => {
            ingest::run_ingest(&cfg, &manifest, dry_run).await?;
        }
        Commands::Query {
            message,
            role,
            json,
        } => {
            let services = Services::from_config(&cfg).await?;
            let result = services.orchestrator.try_query(&message, role).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
            services.pool.close().await;
        }
        // Answered above.
        Commands::Route { .. } => {}
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
        Commands::Managed { action } => match action {
            ManagedAction::Import { manifest } => managed::run_import(&cfg, &manifest).await?,
            ManagedAction::Status => managed::run_status(&cfg).await?,
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn print_result(result: &RetrievalResult) {
    println!("{}", result.answer);
    println!();
    println!(
        "strategy: {}{}  confidence: {:.2}  time: {} ms",
        result.strategy_used,
        if result.fallback_used { " (fallback)" } else { "" },
        result.confidence,
        result.processing_time_ms
    );
    if !result.sources.is_empty() {
        println!();
        println!("Sources:");
        for (i, src) in result.sources.iter().enumerate() {
            let score = src
                .confidence
                .map(|c| format!(" {:.2}", c))
                .unwrap_or_default();
            println!(
                "  [{}] {} ({:?}{})",
                i + 1,
                src.title,
                src.origin,
                score
            );
        }
    }
}
