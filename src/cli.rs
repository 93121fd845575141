//! Command-line interface.
//!
//! Thin layer over the library: `run` processes a directory of parsed
//! documents against a schema, `review` manages the manual-review queue,
//! `cache` exposes cache statistics and invalidation. All output is JSON
//! on stdout; logging goes to stderr via `tracing`.

use crate::batch::{BatchExecutor, StateManager};
use crate::cache::{ResultCache, SqliteCache};
use crate::config::PipelineConfig;
use crate::core::{Document, Schema};
use crate::error::{Error, Result};
use crate::llm::create_client;
use crate::pipeline::ExtractionPipeline;
use crate::resource::ResourceMonitor;
use crate::review::{ReviewQueue, ReviewStatus, SqliteReviewQueue};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Structured extraction engine for systematic-review corpora.
#[derive(Debug, Parser)]
#[command(name = "sr-extract", version, about)]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Extract a directory of parsed documents against a schema.
    Run {
        /// Directory of parsed-document JSON files.
        #[arg(long)]
        docs: PathBuf,
        /// Schema file (TOML or JSON).
        #[arg(long)]
        schema: PathBuf,
        /// Extraction theme shown to the models.
        #[arg(long)]
        theme: String,
        /// Skip documents already recorded in the checkpoint.
        #[arg(long)]
        resume: bool,
        /// Override the configured worker count.
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Manage the manual-review queue.
    Review {
        /// Review operation.
        #[command(subcommand)]
        command: ReviewCommands,
    },
    /// Inspect or invalidate the result cache.
    Cache {
        /// Cache operation.
        #[command(subcommand)]
        command: CacheCommands,
    },
}

/// Review queue operations.
#[derive(Debug, Subcommand)]
pub enum ReviewCommands {
    /// List queue items.
    List {
        /// Filter by status (pending, resolved, skipped).
        #[arg(long)]
        status: Option<String>,
        /// Maximum items to show.
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Mark an item resolved.
    Resolve {
        /// Queue item ID.
        id: i64,
        /// How it was resolved.
        #[arg(long)]
        resolution: String,
        /// Manually extracted value.
        #[arg(long)]
        value: Option<String>,
    },
    /// Mark an item skipped.
    Skip {
        /// Queue item ID.
        id: i64,
        /// Why it was skipped.
        #[arg(long, default_value = "Skipped by user")]
        reason: String,
    },
    /// Show per-status counts.
    Counts,
}

/// Cache operations.
#[derive(Debug, Subcommand)]
pub enum CacheCommands {
    /// Show hit/miss/set counters and entry counts.
    Stats,
    /// Purge every entry for a document fingerprint.
    Invalidate {
        /// Document fingerprint to purge.
        fingerprint: String,
    },
}

/// Executes a parsed command line, returning the JSON output to print.
///
/// # Errors
///
/// Returns an error for unreadable inputs, storage failures, or runtime
/// construction problems.
pub fn execute(cli: &Cli) -> Result<String> {
    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    match &cli.command {
        Commands::Run {
            docs,
            schema,
            theme,
            resume,
            workers,
        } => run_batch(&config, docs, schema, theme, *resume, *workers),
        Commands::Review { command } => run_review(&config, command),
        Commands::Cache { command } => run_cache(&config, command),
    }
}

fn run_batch(
    config: &PipelineConfig,
    docs_dir: &Path,
    schema_path: &Path,
    theme: &str,
    resume: bool,
    workers: Option<usize>,
) -> Result<String> {
    let schema = load_schema(schema_path)?;
    let documents = load_documents(docs_dir)?;
    if documents.is_empty() {
        return Err(Error::InvalidState {
            message: format!("no parsed documents found in {}", docs_dir.display()),
        });
    }
    tracing::info!(
        documents = documents.len(),
        schema = schema.name.as_str(),
        schema_version = schema.version,
        "loaded batch inputs"
    );

    let api_key = std::env::var(&config.transport.api_key_env).unwrap_or_default();
    let local = create_client(
        &config.transport.provider,
        &config.transport.local_base_url,
        "",
    )?;
    let cloud = create_client(
        &config.transport.provider,
        &config.transport.cloud_base_url,
        &api_key,
    )?;

    let cache: Arc<dyn ResultCache> = Arc::new(SqliteCache::open(&config.paths.cache_db)?);
    let review: Arc<dyn ReviewQueue> =
        Arc::new(SqliteReviewQueue::open(&config.paths.review_db)?);
    let state = Arc::new(StateManager::open(&config.paths.state_checkpoint)?);
    let resource = Arc::new(ResourceMonitor::new(&config.resource));

    let max_workers = workers.unwrap_or(config.workers);
    let pipeline = Arc::new(ExtractionPipeline::new(
        config.clone(),
        local,
        cloud,
        cache,
        review,
    ));
    let executor = BatchExecutor::new(
        pipeline.clone(),
        state,
        resource,
        config.circuit_breaker.threshold,
        max_workers,
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Io(e.to_string()))?;
    let summary = runtime.block_on(executor.process_batch(documents, &schema, theme, resume))?;

    let output = serde_json::json!({
        "summary": summary,
        "usage": pipeline.total_usage(),
        "checkpoint": config.paths.state_checkpoint.clone(),
    });
    to_pretty(&output)
}

fn run_review(config: &PipelineConfig, command: &ReviewCommands) -> Result<String> {
    let queue = SqliteReviewQueue::open(&config.paths.review_db)?;
    match command {
        ReviewCommands::List { status, limit } => {
            let status = status.as_deref().map(ReviewStatus::parse);
            let items = queue.list(status, *limit)?;
            to_pretty(&items)
        }
        ReviewCommands::Resolve {
            id,
            resolution,
            value,
        } => {
            queue.resolve(*id, resolution, value.as_deref())?;
            to_pretty(&serde_json::json!({"resolved": id}))
        }
        ReviewCommands::Skip { id, reason } => {
            queue.skip(*id, reason)?;
            to_pretty(&serde_json::json!({"skipped": id}))
        }
        ReviewCommands::Counts => to_pretty(&queue.counts()?),
    }
}

fn run_cache(config: &PipelineConfig, command: &CacheCommands) -> Result<String> {
    let cache = SqliteCache::open(&config.paths.cache_db)?;
    match command {
        CacheCommands::Stats => to_pretty(&cache.stats()?),
        CacheCommands::Invalidate { fingerprint } => {
            cache.invalidate_document(fingerprint)?;
            to_pretty(&serde_json::json!({"invalidated": fingerprint}))
        }
    }
}

fn load_schema(path: &Path) -> Result<Schema> {
    let raw = std::fs::read_to_string(path)?;
    if path.extension().is_some_and(|ext| ext == "toml") {
        Schema::from_toml_str(&raw)
    } else {
        Schema::from_json_str(&raw)
    }
}

fn load_documents(dir: &Path) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    entries.sort();

    for path in entries {
        let raw = std::fs::read_to_string(&path)?;
        match Document::from_json_str(&raw) {
            Ok(document) => documents.push(document),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping unreadable document");
            }
        }
    }
    Ok(documents)
}

fn to_pretty<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| Error::Io(e.to_string()))
}
