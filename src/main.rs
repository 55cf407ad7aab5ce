use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mdrag::config::Config;
use mdrag::db::Db;
use mdrag::embedder::mock::MockEmbedder;
use mdrag::embedder::onnx::OnnxEmbedder;
use mdrag::embedder::tokenizer::BertTokenizer;
use mdrag::embedder::{Embedder, download};
use mdrag::indexer::core::{IndexWriter, ReindexStrategy};
use mdrag::indexer::ledger::FingerprintStore;
use mdrag::indexer::markdown::MarkdownSplitter;
use mdrag::mcp::server::{McpContext, McpServer};
use mdrag::mcp::tools::outcome_json;
use mdrag::query::{QueryExecutor, format_results};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Local Markdown RAG server with incremental indexing.
#[derive(Parser)]
#[command(name = "mdrag", version, about)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, global = true, default_value = "config.json")]
    config: String,

    /// Embed with a deterministic hash instead of the ONNX model (testing only).
    #[arg(long, global = true)]
    mock_embedder: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the MCP tools over stdio (default).
    Serve,

    /// Index the Markdown files of a directory.
    Index {
        directory: PathBuf,

        /// Subdirectory of `directory` to index instead.
        #[arg(long)]
        subdir: Option<String>,

        /// Include subdirectories.
        #[arg(long)]
        recursive: bool,

        /// Drop the index and rebuild it from scratch.
        #[arg(long)]
        force: bool,
    },

    /// Search the index.
    Search {
        query: String,

        /// Number of results (defaults to `search_top_k` from the config).
        #[arg(short, long)]
        k: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the MCP stream
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // 1. Load config
    let config = Config::load(&cli.config)?;
    config.validate().context("Invalid configuration")?;
    let config = Arc::new(config);

    // 2. Init DB
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data directory {}", config.data_dir))?;
    let db = Db::open(config.db_path()).context("Failed to open database")?;
    let db = Arc::new(TokioMutex::new(db));

    // 3. Init Embedder
    let (embedder, tokenizer) = load_embedder(&config, cli.mock_embedder).await?;

    // 4. Wire the pipeline; chunks are measured in the model's own tokens
    let splitter = match tokenizer {
        Some(tokenizer) => {
            let ceiling = tokenizer.max_chunk_tokens();
            if config.chunk_size > ceiling {
                warn!(
                    "chunk_size {} exceeds the model input, using {ceiling}",
                    config.chunk_size
                );
            }
            MarkdownSplitter::new(config.chunk_size.min(ceiling), config.chunk_overlap)
                .with_tokens(tokenizer)
        }
        None => MarkdownSplitter::new(config.chunk_size, config.chunk_overlap),
    };
    let writer = Arc::new(IndexWriter::new(
        db.clone(),
        embedder.clone(),
        FingerprintStore::new(config.ledger_path()),
        splitter,
        config.collection_name.clone(),
    ));
    let query = Arc::new(QueryExecutor::new(
        db,
        embedder,
        config.collection_name.clone(),
    ));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            info!("Starting mdrag MCP Server...");
            let server = McpServer::new(McpContext {
                config: config.clone(),
                writer,
                query,
            });
            server.start().await?;
        }
        Command::Index {
            directory,
            subdir,
            recursive,
            force,
        } => {
            let target = match subdir {
                Some(sub) => directory.join(sub),
                None => directory,
            };
            let outcome = writer
                .run(&target, recursive, ReindexStrategy::from_force(force))
                .await?;
            println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?);
        }
        Command::Search { query: text, k } => {
            let results = query.search(&text, k.unwrap_or(config.search_top_k)).await?;
            println!("{}", format_results(&results));
        }
    }

    Ok(())
}

/// The embedder, plus the model tokenizer when a real model is loaded.
async fn load_embedder(
    config: &Config,
    mock: bool,
) -> Result<(Arc<dyn Embedder>, Option<Arc<BertTokenizer>>)> {
    if mock {
        warn!("Using mock embedder; search results will not be semantic");
        return Ok((Arc::new(MockEmbedder::new(config.model.dimensions)), None));
    }

    let model_dir = config.model_dir();
    if !download::all_files_present(&model_dir) {
        anyhow::ensure!(
            config.model.auto_download,
            "Model files missing in {} and model.auto_download is disabled",
            model_dir.display()
        );
        let repo = config.model.repo.clone();
        let dir = model_dir.clone();
        // reqwest::blocking must stay off the async runtime threads
        tokio::task::spawn_blocking(move || download::download_model_files(&repo, &dir))
            .await
            .context("Model download task panicked")??;
    }

    let embedder = OnnxEmbedder::new(&model_dir, config.model.dimensions)
        .with_context(|| format!("Failed to load model from {}", model_dir.display()))?
        .with_query_instruction(config.model.query_instruction.clone());
    let tokenizer = BertTokenizer::from_model_dir(&model_dir)
        .with_context(|| format!("Failed to load tokenizer from {}", model_dir.display()))?;
    info!("Loaded embedding model {}", config.model.name);
    Ok((Arc::new(embedder), Some(Arc::new(tokenizer))))
}
