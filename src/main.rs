//! # Docent CLI
//!
//! The `docent` binary drives the documentation assistant: store
//! provisioning, ingestion, reference reloads, one-shot questions, and the
//! chat/tool HTTP server.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docent init` | Create the SQLite store and run schema provisioning |
//! | `docent ingest <dir>` | Ingest every parseable document under a directory |
//! | `docent reload` | Full reference reload (configured URLs + directories) |
//! | `docent stats` | Print store counts |
//! | `docent ask "<question>"` | One-shot retrieval-augmented question |
//! | `docent serve` | Start the chat + tool HTTP server |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use docent::chat::ChatSession;
use docent::config::{self, Config};
use docent::fetch::HttpFetcher;
use docent::identity::{UserDirectory, UserKind};
use docent::ingest::IngestionOrchestrator;
use docent::llm::HttpCompletionClient;
use docent::references::ReferenceCatalog;
use docent::report;
use docent::server::{self, AppState};
use docent::session::{RagOptions, RetrievalSession};
use docent::store::ChunkingStore;

/// Docent — a chat-oriented documentation assistant.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docent.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docent",
    about = "Docent — a chat-oriented documentation assistant with RAG ingestion and retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the store schema.
    ///
    /// Creates the SQLite file and all required tables and indexes.
    /// Idempotent — running it multiple times is safe and never destroys
    /// existing data.
    Init,

    /// Ingest every parseable document under a directory.
    ///
    /// A single bad document is reported and skipped; its siblings are
    /// still ingested.
    Ingest {
        /// Directory to ingest. `~/`-prefixed paths expand to the home
        /// directory; relative paths resolve against the working directory.
        dir: String,
    },

    /// Run a full reference reload: all configured URLs, then all
    /// configured directories. Prints a structured summary.
    Reload,

    /// Print current store counts.
    Stats,

    /// Ask a one-shot retrieval-augmented question.
    Ask {
        /// The question to answer.
        question: String,
    },

    /// Start the chat + tool HTTP server.
    ///
    /// With `content.reload_on_startup = true`, runs a full reference
    /// reload before accepting requests.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("docent=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = open_store(&cfg).await?;
            store.provision().await?;
            println!("Store provisioned successfully.");
        }
        Commands::Ingest { dir } => {
            let orchestrator = orchestrator(&cfg).await?;
            let resolved = config::resolve_path_here(&dir);
            let outcome = orchestrator.ingest_directory(&resolved).await?;

            println!("ingest {}", resolved.display());
            println!("  documents ingested: {}", outcome.ingested_documents);
            if !outcome.document_failures.is_empty() {
                println!("  document failures:  {}", outcome.document_failures.len());
                for failure in &outcome.document_failures {
                    println!("    ✗ {} — {}", failure.source, failure.reason);
                }
            }
            println!("ok");
        }
        Commands::Reload => {
            let orchestrator = orchestrator(&cfg).await?;
            let result = orchestrator.load_references().await;
            let stats = orchestrator.store().info().await?;
            report::print_summary(&result, &stats, &cfg.server.bind);
        }
        Commands::Stats => {
            let store = open_store(&cfg).await?;
            let info = store.info().await?;
            println!("Docent — Store Stats");
            println!("====================");
            println!();
            println!("  Store:      {}", cfg.store.path.display());
            println!("  Documents:  {}", info.document_count);
            println!("  Chunks:     {}", info.chunk_count);
            println!("  Elements:   {}", info.content_element_count);
        }
        Commands::Ask { question } => {
            let store = open_store(&cfg).await?;
            let completion = Arc::new(HttpCompletionClient::from_config(&cfg.llm)?);
            let (catalog, warnings) = ReferenceCatalog::assemble(&cfg, &store);
            for warning in &warnings {
                warn!(source = %warning.source, message = %warning.message, "reference skipped");
            }

            let retrieval = Arc::new(
                RetrievalSession::new(store, RagOptions::from_config(&cfg.retrieval))
                    .with_completion(completion.clone()),
            );
            let mut chat = ChatSession::new(
                cfg.persona.default.clone(),
                cfg.persona.prompt.clone(),
                UserDirectory::new(),
                retrieval,
                Arc::new(catalog),
                completion,
            );

            let reply = chat
                .respond(
                    Some(UserKind::Other {
                        label: "shell".to_string(),
                    }),
                    &question,
                )
                .await;
            println!("{}", reply.content);
        }
        Commands::Serve => {
            let orchestrator = orchestrator(&cfg).await?;
            let completion = Arc::new(HttpCompletionClient::from_config(&cfg.llm)?);
            let (catalog, warnings) =
                ReferenceCatalog::assemble(&cfg, orchestrator.store());
            for warning in &warnings {
                warn!(source = %warning.source, message = %warning.message, "reference skipped");
            }

            if cfg.content.reload_on_startup {
                let result = orchestrator.load_references().await;
                let stats = orchestrator.store().info().await?;
                report::print_summary(&result, &stats, &cfg.server.bind);
            }

            let state = AppState::new(
                Arc::new(cfg),
                orchestrator,
                Arc::new(catalog),
                completion,
            );
            server::run_server(state).await?;
        }
    }

    Ok(())
}

async fn open_store(cfg: &Config) -> Result<ChunkingStore> {
    ChunkingStore::open(&cfg.store.path, cfg.chunking.max_chars).await
}

async fn orchestrator(cfg: &Config) -> Result<Arc<IngestionOrchestrator>> {
    let store = open_store(cfg).await?;
    store.provision().await?;
    let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(30)));
    Ok(Arc::new(IngestionOrchestrator::from_config(
        store, fetcher, cfg,
    )))
}
