//! Sift CLI
//!
//! Drives the ranking engine over JSON chunk corpora: strategy runs,
//! quality filtering, BM25 inspection and the ingest dedup index.

mod output;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use sift_core::dedup::DedupIndex;
use sift_core::retrieval::filter_low_quality_chunks;
use sift_core::search::{Bm25Corpus, CrossEncoderProvider, LexicalOverlapProvider};
use sift_core::{
    CallOptions, CancellationToken, CandidateChunk, InMemorySparseIndex, InMemoryVectorStore,
    RetrievalEngine, SiftConfig, SqliteContentHashStore, Strategy, TemplateQueryEnhancer,
};

/// Sift - hybrid retrieval ranking CLI
#[derive(Parser)]
#[command(name = "sift")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Rank, filter and deduplicate retrieval candidates")]
#[command(long_about = "Sift ranks retrieval candidates with BM25 and multi-signal RRF, runs intent strategies, filters low-quality chunks and keeps a content-hash dedup index.\n\nCorpora are JSON arrays of chunks: {\"content\": ..., \"metadata\": {\"sourceId\": ..., \"position\": ...}}.")]
struct Cli {
    /// JSON config file (defaults are used when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a retrieval strategy over an in-memory corpus
    Rank {
        /// Query text
        #[arg(long)]
        query: String,
        /// Corpus file (JSON array of chunks)
        #[arg(long)]
        corpus: PathBuf,
        /// focused, multi_aspect, deep, broad, context_only, no_retrieval, decline
        #[arg(long, default_value = "focused")]
        strategy: String,
        /// Restrict retrieval to one workspace
        #[arg(long)]
        workspace: Option<String>,
        /// Entity of a comparison query (repeatable)
        #[arg(long = "entity")]
        entities: Vec<String>,
        /// Override the strategy's result count
        #[arg(long)]
        top_k: Option<usize>,
        /// Override the strategy's rerank count
        #[arg(long)]
        rerank_top_k: Option<usize>,
    },

    /// Run the quality filter and print its report
    Filter {
        /// Corpus file (JSON array of chunks)
        #[arg(long)]
        corpus: PathBuf,
        /// Query used to decide whether code chunks are relevant
        #[arg(long)]
        query: Option<String>,
    },

    /// Print BM25 scores of every chunk
    Bm25 {
        /// Query text
        #[arg(long)]
        query: String,
        /// Corpus file (JSON array of chunks)
        #[arg(long)]
        corpus: PathBuf,
    },

    /// Partition chunks against the dedup index
    Dedup {
        /// Corpus file (JSON array of chunks)
        #[arg(long)]
        corpus: PathBuf,
        /// Workspace the chunks are indexed into
        #[arg(long)]
        workspace: String,
        /// SQLite database (platform data directory by default)
        #[arg(long)]
        db: Option<PathBuf>,
        /// Source being re-indexed; its own hashes are not duplicates
        #[arg(long)]
        exclude_source: Option<String>,
        /// Record the unique chunks after partitioning
        #[arg(long)]
        record: bool,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let config = SiftConfig::load(cli.config.as_deref())
        .with_context(|| "Failed to load configuration")?;

    match cli.command {
        Commands::Rank {
            query,
            corpus,
            strategy,
            workspace,
            entities,
            top_k,
            rerank_top_k,
        } => run_rank(
            &config,
            RankArgs {
                query,
                corpus,
                strategy,
                workspace,
                entities,
                top_k,
                rerank_top_k,
            },
            cli.json,
        ),
        Commands::Filter { corpus, query } => run_filter(&config, &corpus, query, cli.json),
        Commands::Bm25 { query, corpus } => run_bm25(&config, &query, &corpus, cli.json),
        Commands::Dedup {
            corpus,
            workspace,
            db,
            exclude_source,
            record,
        } => run_dedup(&config, &corpus, &workspace, db, exclude_source, record, cli.json),
        Commands::Config => run_config(&config),
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.with_ansi(false).init();
    }
}

fn load_corpus(path: &Path) -> anyhow::Result<Vec<CandidateChunk>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus {}", path.display()))?;
    let chunks: Vec<CandidateChunk> = serde_json::from_str(&raw)
        .with_context(|| format!("Corpus {} is not a JSON array of chunks", path.display()))?;
    tracing::debug!(chunks = chunks.len(), corpus = %path.display(), "corpus loaded");
    Ok(chunks)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Runtime::new()?)
}

#[cfg_attr(not(feature = "remote-rerank"), allow(unused_variables))]
fn cross_encoder(config: &SiftConfig) -> Arc<dyn CrossEncoderProvider> {
    #[cfg(feature = "remote-rerank")]
    if let Some(remote) = sift_core::search::HttpRerankProvider::from_config(&config.reranker) {
        tracing::info!("using remote rerank provider");
        return Arc::new(remote);
    }
    Arc::new(LexicalOverlapProvider)
}

// ============================================================================
// RANK
// ============================================================================

struct RankArgs {
    query: String,
    corpus: PathBuf,
    strategy: String,
    workspace: Option<String>,
    entities: Vec<String>,
    top_k: Option<usize>,
    rerank_top_k: Option<usize>,
}

fn run_rank(config: &SiftConfig, args: RankArgs, json: bool) -> anyhow::Result<()> {
    let RankArgs {
        query,
        corpus,
        strategy,
        workspace,
        entities,
        top_k,
        rerank_top_k,
    } = args;

    let chunks = load_corpus(&corpus)?;
    let strategy: Strategy = strategy.parse()?;

    let mut strategy_config = config.strategy_config(strategy);
    if let Some(top_k) = top_k {
        strategy_config.top_k = top_k;
    }
    if let Some(rerank_top_k) = rerank_top_k {
        strategy_config.rerank_top_k = rerank_top_k;
    }

    let store = InMemoryVectorStore::new(chunks);
    let sparse = InMemorySparseIndex::new(store.clone()).with_params(config.bm25, config.fusion.k);
    let engine = RetrievalEngine::builder(Arc::new(store))
        .sparse(Arc::new(sparse))
        .enhancer(Arc::new(TemplateQueryEnhancer))
        .cross_encoder(cross_encoder(config))
        .config(config.clone())
        .build();

    let cancel = CancellationToken::new();
    let options = match workspace {
        Some(ws) => CallOptions::for_workspace(ws),
        None => CallOptions::default(),
    }
    .with_entities(entities)
    .with_cancel(cancel.clone());

    let rt = runtime()?;
    let outcome = rt.block_on(async {
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });
        engine
            .execute(strategy, &query, &strategy_config, &options)
            .await
    })?;

    if json {
        return print_json(&outcome);
    }
    output::print_outcome(&query, &outcome);
    Ok(())
}

// ============================================================================
// FILTER / BM25
// ============================================================================

fn run_filter(
    config: &SiftConfig,
    corpus: &Path,
    query: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let chunks = load_corpus(corpus)?;
    let (kept, report) = filter_low_quality_chunks(chunks, query.as_deref(), &config.quality);

    if json {
        #[derive(Serialize)]
        struct FilterOutput<'a> {
            report: &'a sift_core::QualityReport,
            kept: &'a [CandidateChunk],
        }
        return print_json(&FilterOutput {
            report: &report,
            kept: &kept,
        });
    }
    output::print_quality(&report, &kept);
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Bm25Row {
    identity: String,
    score: f32,
    preview: String,
}

fn run_bm25(config: &SiftConfig, query: &str, corpus: &Path, json: bool) -> anyhow::Result<()> {
    let chunks = load_corpus(corpus)?;
    let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
    let index = Bm25Corpus::new(&texts, config.bm25);

    let mut rows: Vec<Bm25Row> = index
        .scores(query)
        .into_iter()
        .zip(&chunks)
        .map(|(score, chunk)| Bm25Row {
            identity: chunk.identity().to_string(),
            score,
            preview: output::truncate(&chunk.content, 60),
        })
        .collect();
    rows.sort_by(|a, b| b.score.total_cmp(&a.score));

    if json {
        return print_json(&rows);
    }

    println!("{}", "=== BM25 Scores ===".cyan().bold());
    println!(
        "{}: {} documents, avg length {:.1} tokens",
        "Corpus".white().bold(),
        index.len(),
        index.avg_doc_len()
    );
    println!();
    for row in &rows {
        let score = format!("{:>8.4}", row.score);
        let score = if row.score > 0.0 { score.green() } else { score.dimmed() };
        println!("  {} {:30} {}", score, row.identity, row.preview.dimmed());
    }
    Ok(())
}

// ============================================================================
// DEDUP
// ============================================================================

fn run_dedup(
    config: &SiftConfig,
    corpus: &Path,
    workspace: &str,
    db: Option<PathBuf>,
    exclude_source: Option<String>,
    record: bool,
    json: bool,
) -> anyhow::Result<()> {
    let chunks = load_corpus(corpus)?;
    let db_path = db.or_else(|| config.dedup.db_path.clone());
    let store = SqliteContentHashStore::new(db_path).with_context(|| "Failed to open dedup index")?;
    let index = DedupIndex::new(Arc::new(store));

    let rt = runtime()?;
    let (result, recorded) = rt.block_on(async {
        let result = index
            .deduplicate_chunks_at_index(workspace, chunks, exclude_source.as_deref())
            .await;
        let recorded = if record {
            let fallback = exclude_source.as_deref().unwrap_or("sift-cli");
            Some(
                index
                    .record_indexed_chunks(workspace, fallback, &result.unique)
                    .await?,
            )
        } else {
            None
        };
        anyhow::Ok((result, recorded))
    })?;

    if json {
        #[derive(Serialize)]
        struct DedupOutput<'a> {
            #[serde(flatten)]
            result: &'a sift_core::DedupResult,
            recorded: Option<usize>,
        }
        return print_json(&DedupOutput {
            result: &result,
            recorded,
        });
    }
    output::print_dedup(workspace, &result, recorded);
    Ok(())
}

// ============================================================================
// CONFIG
// ============================================================================

fn run_config(config: &SiftConfig) -> anyhow::Result<()> {
    let mut shown = config.clone();
    if shown.reranker.api_key.is_some() {
        shown.reranker.api_key = Some("********".to_string());
    }
    print_json(&shown)
}
