//! semstore service binary.
//!
//! Loads the embedding model, opens the document store, loads or creates the
//! ANN index, and serves the HTTP/JSON API until SIGINT/SIGTERM. Exits 0 on
//! clean shutdown and 1 when initialization fails.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use semstore::ann::{AnnIndex, IndexParams};
use semstore::config::{LogLevel, ServerConfig};
use semstore::coordinator::Coordinator;
use semstore::inference::{EngineOptions, InferenceEngine};
use semstore::server::run_server;
use semstore::store::DocumentStore;

#[derive(Parser)]
#[command(
    name = "semstore",
    about = "Single-node semantic document store over HTTP/JSON",
    version
)]
struct Args {
    /// Server host.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Server port.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Path to the ONNX transformer model.
    #[arg(long, default_value = "model.onnx")]
    model: PathBuf,

    /// Path to the serialized tokenizer JSON.
    #[arg(long, default_value = "tokenizer.json")]
    tokenizer: PathBuf,

    /// Path to the SQLite database file.
    #[arg(long, default_value = "database.db")]
    database: PathBuf,

    /// Path to the serialized ANN index.
    #[arg(long, default_value = "vectors.index")]
    index: PathBuf,

    /// Delete existing database and index before starting.
    #[arg(long)]
    new_db: bool,

    /// Log verbosity: 1=warning, 2=info, 3=verbose.
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(1..=3))]
    level: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        model_path: args.model,
        tokenizer_path: args.tokenizer,
        database_path: args.database,
        index_path: args.index,
        create_new_db: args.new_db,
        log_level: LogLevel::from_cli(args.level)?,
    };
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.as_filter()))
        .init();

    if config.create_new_db {
        remove_artifacts(&config)?;
    }

    tracing::info!(
        model = %config.model_path.display(),
        tokenizer = %config.tokenizer_path.display(),
        database = %config.database_path.display(),
        index = %config.index_path.display(),
        "starting semstore"
    );

    let store = DocumentStore::open(&config.database_path)
        .with_context(|| format!("open database {}", config.database_path.display()))?;
    let mut coordinator = Coordinator::new(store, IndexParams::default());

    let engine = InferenceEngine::load(
        &config.model_path,
        &config.tokenizer_path,
        EngineOptions::default(),
    )
    .context("load embedding model")?;
    coordinator.set_engine(Box::new(engine));

    coordinator
        .load_or_create_index(&config.index_path)
        .context("load or create index")?;

    tracing::info!(
        documents = coordinator.document_count().unwrap_or(0),
        index_size = coordinator.index_size(),
        "initialized"
    );

    run_server(&config, coordinator).await
}

fn remove_artifacts(config: &ServerConfig) -> anyhow::Result<()> {
    if config.database_path.exists() {
        tracing::info!(path = %config.database_path.display(), "removing existing database");
        std::fs::remove_file(&config.database_path)?;
    }
    for artifact in AnnIndex::artifact_files(&config.index_path)? {
        if artifact.exists() {
            tracing::info!(path = %artifact.display(), "removing existing index file");
            std::fs::remove_file(&artifact)?;
        }
    }
    Ok(())
}
