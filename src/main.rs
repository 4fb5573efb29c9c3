//! vecscope - command-line entry point
//!
//! # Usage
//!
//! ```bash
//! # Export the default collection with projections
//! vecscope export
//!
//! # Export the first 500 documents of another collection, without projections
//! vecscope export --collection notes -n 500 --skip-projections -o out.json
//!
//! # List collections in a store
//! vecscope collections --chroma-path ~/.claude-memory/chroma
//!
//! # Run the embedding service on localhost:5001
//! vecscope serve
//! ```

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vecscope::config::{ExportSettings, Settings};
use vecscope::embedding::{server, EmbeddingEngine};
use vecscope::projection::ProjectionEngine;
use vecscope::services::{ExportRequest, ExportService};
use vecscope::storage::ChromaStore;
use vecscope::ExportError;

/// Export vector store embeddings with precomputed 3D projections.
#[derive(Parser)]
#[command(name = "vecscope", version, about)]
struct Cli {
    /// Settings file (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export a collection to JSON
    Export(ExportArgs),
    /// List the collections in a store
    Collections {
        /// Path to the Chroma persist directory
        #[arg(long)]
        chroma_path: Option<PathBuf>,
    },
    /// Serve text embeddings over HTTP
    Serve {
        /// Interface to bind
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
        /// Hugging Face model to load
        #[arg(long)]
        model: Option<String>,
    },
}

#[derive(Args)]
struct ExportArgs {
    /// Path to the Chroma persist directory
    #[arg(long)]
    chroma_path: Option<PathBuf>,

    /// Collection name to export
    #[arg(long)]
    collection: Option<String>,

    /// Output JSON file path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Limit number of documents to export
    #[arg(short = 'n', long)]
    limit: Option<NonZeroUsize>,

    /// Skip computing projections (faster export)
    #[arg(long)]
    skip_projections: bool,

    /// Corpus name recorded in the export
    #[arg(long)]
    name: Option<String>,

    /// Embedding model recorded in the export
    #[arg(long)]
    embedding_model: Option<String>,
}

impl ExportArgs {
    fn apply(self, settings: &mut ExportSettings) {
        if let Some(path) = self.chroma_path {
            settings.chroma_path = path;
        }
        if let Some(collection) = self.collection {
            settings.collection = collection;
        }
        if let Some(output) = self.output {
            settings.output = output;
        }
        if self.limit.is_some() {
            settings.limit = self.limit;
        }
        if self.skip_projections {
            settings.skip_projections = true;
        }
        if let Some(name) = self.name {
            settings.name = name;
        }
        if let Some(model) = self.embedding_model {
            settings.embedding_model = model;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    if let Err(e) = run(cli).await {
        tracing::error!("{:#}", e);
        let code = e
            .downcast_ref::<ExportError>()
            .map(ExportError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = match cli.config.or_else(Settings::default_path) {
        Some(path) => Settings::load(&path)?,
        None => Settings::default(),
    };

    match cli.command {
        Command::Export(args) => {
            args.apply(&mut settings.export);
            export(settings).await
        }
        Command::Collections { chroma_path } => {
            let path = chroma_path.unwrap_or(settings.export.chroma_path);
            list_collections(path).await
        }
        Command::Serve { host, port, model } => {
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(port) = port {
                settings.server.port = port;
            }
            if let Some(model) = model {
                settings.server.model.model_id = model;
            }
            serve(settings).await
        }
    }
}

async fn export(settings: Settings) -> Result<()> {
    let store = ChromaStore::open(&settings.export.chroma_path).await?;
    let service = ExportService::new(store, ProjectionEngine::new(settings.projection));

    let summary = service.run(&ExportRequest::from(&settings.export)).await?;
    tracing::info!(
        documents = summary.documents,
        projected = summary.projected,
        output = %summary.output.display(),
        duration_ms = summary.duration_ms,
        "Export complete"
    );
    Ok(())
}

async fn list_collections(path: PathBuf) -> Result<()> {
    let store = ChromaStore::open(&path).await?;
    let collections = store
        .list_collections()
        .await
        .map_err(ExportError::from)?;

    if collections.is_empty() {
        println!("No collections in {}", path.display());
    }
    for info in collections {
        println!("{}\t{}", info.name, info.count);
    }
    Ok(())
}

async fn serve(settings: Settings) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                settings.server.host, settings.server.port
            )
        })?;

    let model = settings.server.model;
    let engine = tokio::task::spawn_blocking(move || EmbeddingEngine::load(model))
        .await
        .context("model loading task failed")??;

    server::serve(addr, Arc::new(engine)).await?;
    Ok(())
}
