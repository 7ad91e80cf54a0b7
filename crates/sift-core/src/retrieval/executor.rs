//! Retrieval Strategy Executor
//!
//! [`RetrievalEngine`] owns the collaborators, the engine-scoped caches and
//! the configuration, and runs one [`Strategy`] per call:
//!
//! | strategy       | shape                                                        |
//! |----------------|--------------------------------------------------------------|
//! | `focused`      | base retrieval, hybrid merge, RRF, filter, expansion         |
//! | `multi_aspect` | per-entity retrievals (or paraphrase union), rerank, filter  |
//! | `deep`         | paraphrases + HyDE probe, rerank, filter, compression        |
//! | `broad`        | wide paraphrase union, diversify or rerank, filter           |
//! | `context_only` | conversation context, plus one retrieval when `topK > 0`     |
//! | `no_retrieval` / `decline` | empty                                            |
//!
//! Only the base retrieval of the original query can fail a call. Every
//! other collaborator call degrades and is recorded in `metrics.degraded`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::compression::compress_documents;
use super::expansion::expand_with_siblings;
use super::quality::filter_low_quality_chunks;
use super::resilient::{Degradation, DegradationReason, ResilientCall};
use super::strategy::{CallOptions, RetrievalMetrics, RetrievalOutcome, Strategy, StrategyConfig};
use super::{Result, RetrievalError};
use crate::chunk::{dedupe_chunks, CandidateChunk};
use crate::collab::{Compressor, HybridSearchOptions, QueryEnhancer, SparseSearch, VectorStore};
use crate::config::SiftConfig;
use crate::search::{
    fuse_chunks, CachedQueryEnhancer, CrossEncoderProvider, CrossEncoderReranker, RerankOptions,
    MAX_QUERY_VARIANTS,
};

/// Entities retrieved separately in a comparison, at most
const MAX_ENTITIES: usize = 3;

// ============================================================================
// BUILDER
// ============================================================================

/// Assembles a [`RetrievalEngine`] from its collaborators
pub struct RetrievalEngineBuilder {
    vector_store: Arc<dyn VectorStore>,
    sparse: Option<Arc<dyn SparseSearch>>,
    enhancer: Option<Arc<dyn QueryEnhancer>>,
    compressor: Option<Arc<dyn Compressor>>,
    cross_encoder: Option<Arc<dyn CrossEncoderProvider>>,
    config: SiftConfig,
}

impl RetrievalEngineBuilder {
    pub fn sparse(mut self, sparse: Arc<dyn SparseSearch>) -> Self {
        self.sparse = Some(sparse);
        self
    }

    pub fn enhancer(mut self, enhancer: Arc<dyn QueryEnhancer>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    pub fn compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    pub fn cross_encoder(mut self, provider: Arc<dyn CrossEncoderProvider>) -> Self {
        self.cross_encoder = Some(provider);
        self
    }

    pub fn config(mut self, config: SiftConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> RetrievalEngine {
        let enhancer = self.enhancer.map(|inner| {
            CachedQueryEnhancer::new(
                inner,
                self.config.caches.query_expansion,
                self.config.caches.hyde,
            )
        });
        let reranker = CrossEncoderReranker::new(self.cross_encoder, self.config.reranker_config());
        RetrievalEngine {
            vector_store: self.vector_store,
            sparse: self.sparse,
            enhancer,
            compressor: self.compressor,
            reranker,
            config: self.config,
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Strategy executor with its collaborators and caches
pub struct RetrievalEngine {
    vector_store: Arc<dyn VectorStore>,
    sparse: Option<Arc<dyn SparseSearch>>,
    enhancer: Option<CachedQueryEnhancer>,
    compressor: Option<Arc<dyn Compressor>>,
    reranker: CrossEncoderReranker,
    config: SiftConfig,
}

/// Mutable state of one execution
struct Run<'a> {
    query: &'a str,
    config: &'a StrategyConfig,
    options: &'a CallOptions,
    metrics: RetrievalMetrics,
}

impl Run<'_> {
    fn degrade(&mut self, degradation: Degradation) {
        self.metrics.degraded.push(degradation);
    }
}

impl RetrievalEngine {
    pub fn builder(vector_store: Arc<dyn VectorStore>) -> RetrievalEngineBuilder {
        RetrievalEngineBuilder {
            vector_store,
            sparse: None,
            enhancer: None,
            compressor: None,
            cross_encoder: None,
            config: SiftConfig::default(),
        }
    }

    pub fn config(&self) -> &SiftConfig {
        &self.config
    }

    pub fn reranker(&self) -> &CrossEncoderReranker {
        &self.reranker
    }

    /// Run a strategy given by name, with the configured settings for it
    pub async fn execute_named(
        &self,
        name: &str,
        query: &str,
        options: &CallOptions,
    ) -> Result<RetrievalOutcome> {
        let strategy: Strategy = name.parse()?;
        let config = self.config.strategy_config(strategy);
        self.execute(strategy, query, &config, options).await
    }

    /// Run one strategy
    pub async fn execute(
        &self,
        strategy: Strategy,
        query: &str,
        config: &StrategyConfig,
        options: &CallOptions,
    ) -> Result<RetrievalOutcome> {
        let started = Instant::now();
        if strategy.is_empty() {
            return Ok(RetrievalOutcome {
                documents: Vec::new(),
                metrics: RetrievalMetrics::zero(strategy),
                strategy_name: strategy,
            });
        }
        if options.cancel.is_cancelled() {
            return Err(RetrievalError::Cancelled);
        }

        let mut run = Run {
            query,
            config,
            options,
            metrics: RetrievalMetrics::zero(strategy),
        };

        let documents = match strategy {
            Strategy::Focused => self.focused(&mut run).await?,
            Strategy::MultiAspect => self.multi_aspect(&mut run).await?,
            Strategy::Deep => self.deep(&mut run).await?,
            Strategy::Broad => self.broad(&mut run).await?,
            Strategy::ContextOnly => self.context_only(&mut run).await?,
            Strategy::NoRetrieval | Strategy::Decline => Vec::new(),
        };

        let mut metrics = run.metrics;
        metrics.final_count = documents.len();
        metrics.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            strategy = %strategy,
            workspace_id = options.workspace_id.as_deref().unwrap_or(""),
            retrieved = metrics.candidates_retrieved,
            returned = metrics.final_count,
            degraded = metrics.degraded.len(),
            elapsed_ms = metrics.elapsed_ms,
            "retrieval complete"
        );

        Ok(RetrievalOutcome {
            documents,
            metrics,
            strategy_name: strategy,
        })
    }

    // ------------------------------------------------------------------------
    // strategies
    // ------------------------------------------------------------------------

    async fn focused(&self, run: &mut Run<'_>) -> Result<Vec<CandidateChunk>> {
        let (query, fetch_k) = (run.query, run.config.fetch_k());
        let mut chunks = self.base_retrieve(run, query, fetch_k).await?;

        if run.config.use_hybrid {
            chunks = self.hybrid_merge(run, chunks).await;
        }
        chunks = dedupe_chunks(chunks);
        run.metrics.after_dedup = chunks.len();

        if run.config.use_rrf {
            chunks = fuse_chunks(query, chunks, &self.config.fusion_config());
        }
        self.finish(run, chunks).await
    }

    async fn multi_aspect(&self, run: &mut Run<'_>) -> Result<Vec<CandidateChunk>> {
        let options = run.options;
        let entities: Vec<&String> = options
            .entities
            .iter()
            .filter(|e| !e.trim().is_empty())
            .take(MAX_ENTITIES)
            .collect();

        let chunks = if run.config.split_comparison && entities.len() >= 2 {
            self.per_entity_retrieve(run, &entities).await?
        } else {
            let variants = self.paraphrases(run).await;
            self.union_retrieve(run, &variants, None).await?
        };

        let chunks = dedupe_chunks(chunks);
        run.metrics.after_dedup = chunks.len();
        self.finish(run, chunks).await
    }

    async fn deep(&self, run: &mut Run<'_>) -> Result<Vec<CandidateChunk>> {
        let variants = self.paraphrases(run).await;
        let probe = if run.config.use_hyde {
            self.hypothetical_probe(run).await
        } else {
            None
        };

        let chunks = self.union_retrieve(run, &variants, probe.as_deref()).await?;
        let chunks = dedupe_chunks(chunks);
        run.metrics.after_dedup = chunks.len();
        self.finish(run, chunks).await
    }

    async fn broad(&self, run: &mut Run<'_>) -> Result<Vec<CandidateChunk>> {
        let variants = self.paraphrases(run).await;
        let chunks = self.union_retrieve(run, &variants, None).await?;
        let chunks = dedupe_chunks(chunks);
        run.metrics.after_dedup = chunks.len();
        self.finish(run, chunks).await
    }

    async fn context_only(&self, run: &mut Run<'_>) -> Result<Vec<CandidateChunk>> {
        let context = run.options.conversation_context.clone();
        let (query, top_k) = (run.query, run.config.top_k);
        if top_k == 0 {
            run.metrics.after_dedup = context.len();
            return Ok(context);
        }

        let retrieved = self.base_retrieve(run, query, top_k).await?;
        let mut merged = context;
        merged.extend(retrieved);
        let merged = dedupe_chunks(merged);
        run.metrics.after_dedup = merged.len();
        Ok(merged)
    }

    // ------------------------------------------------------------------------
    // shared tail: rerank or diversify, filter, truncate, expand, compress
    // ------------------------------------------------------------------------

    async fn finish(&self, run: &mut Run<'_>, chunks: Vec<CandidateChunk>) -> Result<Vec<CandidateChunk>> {
        let config = run.config;
        let mut chunks = chunks;

        if config.diversify_results {
            chunks = diversify_by_source(chunks, config.top_k);
        } else if config.use_reranking {
            chunks = self.rerank(run, chunks).await;
        }
        run.metrics.after_rerank = chunks.len();

        let (mut chunks, report) =
            filter_low_quality_chunks(chunks, Some(run.query), &self.config.quality);
        run.metrics.after_filter = chunks.len();
        run.metrics.quality = Some(report);
        chunks.truncate(config.top_k.max(1));

        if config.use_context_expansion {
            chunks = self.expand(run, chunks).await;
        }
        if config.use_compression {
            chunks = self.compress(run, chunks).await;
        }
        Ok(chunks)
    }

    // ------------------------------------------------------------------------
    // collaborator calls
    // ------------------------------------------------------------------------

    /// Mandatory retrieval: failure or cancellation ends the call
    async fn base_retrieve(&self, run: &mut Run<'_>, query: &str, k: usize) -> Result<Vec<CandidateChunk>> {
        let options = run.options;
        run.metrics.retrieval_calls += 1;
        let chunks = tokio::select! {
            biased;
            _ = options.cancel.cancelled() => return Err(RetrievalError::Cancelled),
            res = self.vector_store.similarity_search(query, k, &options.filter) => res,
        }
        .map_err(|e| {
            tracing::error!(stage = "base_retrieval", error = %e, "base retrieval failed");
            RetrievalError::BaseRetrieval(e)
        })?;
        run.metrics.candidates_retrieved += chunks.len();
        Ok(chunks)
    }

    /// Optional retrieval of an extra probe; failures degrade
    async fn probe_retrieve(
        &self,
        stage: &'static str,
        query: &str,
        k: usize,
        options: &CallOptions,
    ) -> std::result::Result<Vec<CandidateChunk>, Degradation> {
        self.call(stage, options)
            .run(self.vector_store.similarity_search(query, k, &options.filter))
            .await
    }

    fn call(&self, stage: &'static str, options: &CallOptions) -> ResilientCall {
        ResilientCall::new(stage, Duration::from_millis(self.config.enhancement_timeout_ms))
            .with_cancel(&options.cancel)
    }

    /// Base retrieval of the original query plus concurrent, optional
    /// retrievals of each variant and the HyDE probe. Original results first.
    async fn union_retrieve(
        &self,
        run: &mut Run<'_>,
        variants: &[String],
        probe: Option<&str>,
    ) -> Result<Vec<CandidateChunk>> {
        let (query, k) = (run.query, run.config.fetch_k());
        let mut chunks = self.base_retrieve(run, query, k).await?;

        let extra: Vec<(&'static str, &str)> = variants
            .iter()
            .map(|v| ("variant_retrieval", v.as_str()))
            .chain(probe.map(|p| ("hyde_retrieval", p)))
            .collect();
        if extra.is_empty() {
            return Ok(chunks);
        }

        let options = run.options;
        let results = futures::future::join_all(
            extra
                .iter()
                .map(|(stage, q)| self.probe_retrieve(*stage, q, k, options)),
        )
        .await;
        run.metrics.retrieval_calls += extra.len();

        for result in results {
            match result {
                Ok(found) => {
                    run.metrics.candidates_retrieved += found.len();
                    chunks.extend(found);
                }
                Err(degradation) => run.degrade(degradation),
            }
        }
        Ok(chunks)
    }

    /// One retrieval per entity, quota `ceil(topK / n)` each, tagged with the
    /// entity. Partial failures degrade; if all fail the first error is returned.
    async fn per_entity_retrieve(&self, run: &mut Run<'_>, entities: &[&String]) -> Result<Vec<CandidateChunk>> {
        let (options, query) = (run.options, run.query);
        if options.cancel.is_cancelled() {
            return Err(RetrievalError::Cancelled);
        }
        let quota = run.config.top_k.max(1).div_ceil(entities.len()).max(1);
        let queries: Vec<String> = entities.iter().map(|e| format!("{e} {query}")).collect();

        let results = tokio::select! {
            biased;
            _ = options.cancel.cancelled() => return Err(RetrievalError::Cancelled),
            results = futures::future::join_all(
                queries
                    .iter()
                    .map(|q| self.vector_store.similarity_search(q, quota, &options.filter)),
            ) => results,
        };
        run.metrics.retrieval_calls += entities.len();

        let mut chunks = Vec::new();
        let mut first_error = None;
        let mut succeeded = 0;
        for (entity, result) in entities.iter().zip(results) {
            match result {
                Ok(found) => {
                    succeeded += 1;
                    run.metrics.candidates_retrieved += found.len();
                    chunks.extend(found.into_iter().map(|mut chunk| {
                        chunk.metadata.comparison_entity = Some((*entity).clone());
                        chunk
                    }));
                }
                Err(e) => {
                    tracing::warn!(stage = "entity_retrieval", entity = %entity, error = %e, "entity retrieval failed");
                    run.degrade(Degradation::new(
                        "entity_retrieval",
                        DegradationReason::Failed(format!("{entity}: {e}")),
                    ));
                    first_error.get_or_insert(e);
                }
            }
        }

        match (succeeded, first_error) {
            (0, Some(e)) => Err(RetrievalError::BaseRetrieval(e)),
            _ => Ok(chunks),
        }
    }

    async fn paraphrases(&self, run: &mut Run<'_>) -> Vec<String> {
        if !run.config.use_query_expansion {
            return Vec::new();
        }
        let Some(enhancer) = &self.enhancer else {
            tracing::debug!("query expansion requested but no enhancer configured");
            return Vec::new();
        };
        let call = self.call("query_expansion", run.options);
        let mut variants = call
            .run_or(enhancer.expand_query(run.query), Vec::new(), &mut run.metrics.degraded)
            .await;
        let original = run.query.trim().to_lowercase();
        variants.retain(|v| !v.trim().is_empty() && v.trim().to_lowercase() != original);
        variants.truncate(MAX_QUERY_VARIANTS);
        variants
    }

    async fn hypothetical_probe(&self, run: &mut Run<'_>) -> Option<String> {
        let enhancer = self.enhancer.as_ref()?;
        let call = self.call("hyde", run.options);
        match call.run(enhancer.hypothetical_document(run.query)).await {
            Ok(passage) if !passage.trim().is_empty() => Some(passage),
            Ok(_) => None,
            Err(degradation) => {
                run.degrade(degradation);
                None
            }
        }
    }

    /// Merge sparse/hybrid hits into the dense list in hybrid order.
    /// Sparse-only hits are hydrated by point id.
    async fn hybrid_merge(&self, run: &mut Run<'_>, dense: Vec<CandidateChunk>) -> Vec<CandidateChunk> {
        let Some(sparse) = &self.sparse else {
            return dense;
        };
        let options = run.options;
        let Some(workspace_id) = options.workspace_id.as_deref() else {
            tracing::debug!("hybrid merge skipped without a workspace");
            return dense;
        };
        let search_options = HybridSearchOptions {
            limit: run.config.fetch_k(),
            alpha: run.config.hybrid_alpha,
        };

        let call = self.call("hybrid_merge", run.options);
        let vector_store = &self.vector_store;
        let query = run.query;
        let lookup = async {
            let hits = sparse
                .hybrid_search(workspace_id, query, &dense, search_options)
                .await?;
            let missing: Vec<String> = hits
                .iter()
                .filter(|h| h.dense_rank.is_none())
                .map(|h| h.point_id().to_string())
                .collect();
            let hydrated = if missing.is_empty() {
                Vec::new()
            } else {
                vector_store.retrieve_points(&missing).await?
            };
            Ok::<_, crate::collab::CollaboratorError>((hits, hydrated))
        };

        let (hits, hydrated) = match call.run(lookup).await {
            Ok(found) => found,
            Err(degradation) => {
                run.degrade(degradation);
                return dense;
            }
        };

        let mut by_id: HashMap<String, CandidateChunk> = HashMap::new();
        let mut unkeyed = Vec::new();
        let mut dense_order = Vec::new();
        for chunk in dense {
            match chunk.id.clone() {
                Some(id) => {
                    dense_order.push(id.clone());
                    by_id.entry(id).or_insert(chunk);
                }
                None => unkeyed.push(chunk),
            }
        }
        let mut hydrated_count = 0;
        for chunk in hydrated {
            if let Some(id) = chunk.id.clone()
                && !by_id.contains_key(&id)
            {
                hydrated_count += 1;
                by_id.insert(id, chunk);
            }
        }
        run.metrics.candidates_retrieved += hydrated_count;

        let mut merged = Vec::with_capacity(by_id.len() + unkeyed.len());
        for hit in &hits {
            let chunk = by_id.remove(hit.point_id()).or_else(|| by_id.remove(&hit.id));
            if let Some(mut chunk) = chunk {
                chunk.score = Some(hit.rrf_score);
                merged.push(chunk);
            }
        }
        // dense chunks the hybrid search did not return keep their order
        for id in dense_order {
            if let Some(chunk) = by_id.remove(&id) {
                merged.push(chunk);
            }
        }
        merged.extend(unkeyed);
        merged
    }

    async fn rerank(&self, run: &mut Run<'_>, chunks: Vec<CandidateChunk>) -> Vec<CandidateChunk> {
        let options = RerankOptions {
            top_n: run.config.rerank_top_k.max(1),
            min_score: run.config.min_rerank_score,
        };
        let (cancel, query) = (&run.options.cancel, run.query);
        let fallback = chunks.clone();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = self.reranker.rerank(query, chunks, options) => Some(outcome),
        };
        let Some(outcome) = outcome else {
            run.degrade(Degradation::new("cross_encoder", DegradationReason::Cancelled));
            let mut kept = fallback;
            kept.truncate(options.top_n);
            return kept;
        };

        run.metrics.reranker_provider = Some(outcome.provider.clone());
        run.metrics.rerank_success = Some(outcome.success);
        if !outcome.success && self.reranker.has_provider() {
            run.degrade(Degradation::new(
                "cross_encoder",
                DegradationReason::Failed("fell back to original order".to_string()),
            ));
        }
        outcome.documents
    }

    /// Each sibling lookup is bounded by `expansion.lookupTimeoutMs`, so a
    /// stalled source only leaves its own candidate unexpanded.
    async fn expand(&self, run: &mut Run<'_>, chunks: Vec<CandidateChunk>) -> Vec<CandidateChunk> {
        let options = run.options;
        let Some(workspace_id) = options.workspace_id.as_deref() else {
            tracing::debug!("context expansion skipped without a workspace");
            return chunks;
        };
        let result = expand_with_siblings(
            self.vector_store.as_ref(),
            chunks,
            workspace_id,
            &self.config.expansion,
            &options.cancel,
        )
        .await;

        run.metrics.siblings_added = result.siblings_added;
        if result.cancelled {
            run.degrade(Degradation::new("context_expansion", DegradationReason::Cancelled));
        } else if result.lookup_failures > 0 {
            run.degrade(Degradation::new(
                "context_expansion",
                DegradationReason::Failed(format!("{} sibling lookups failed", result.lookup_failures)),
            ));
        }
        result.chunks
    }

    /// Each extract is bounded by `compression.timeoutMs`; a slow document
    /// keeps its original text while the others are still compressed.
    async fn compress(&self, run: &mut Run<'_>, chunks: Vec<CandidateChunk>) -> Vec<CandidateChunk> {
        let Some(compressor) = &self.compressor else {
            tracing::debug!("compression requested but no compressor configured");
            return chunks;
        };
        let (options, query) = (run.options, run.query);
        let fallback = chunks.clone();
        let result = tokio::select! {
            biased;
            _ = options.cancel.cancelled() => {
                run.degrade(Degradation::new("compression", DegradationReason::Cancelled));
                return fallback;
            }
            result = compress_documents(
                compressor.as_ref(),
                chunks,
                query,
                &self.config.compression,
            ) => result,
        };

        run.metrics.docs_compressed = result.compressed;
        if result.failed > 0 {
            run.degrade(Degradation::new(
                "compression",
                DegradationReason::Failed(format!("{} extracts failed", result.failed)),
            ));
        }
        result.documents
    }
}

impl std::fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("sparse", &self.sparse.is_some())
            .field("enhancer", &self.enhancer)
            .field("compressor", &self.compressor.is_some())
            .field("reranker", &self.reranker)
            .finish()
    }
}

// ============================================================================
// DIVERSIFICATION
// ============================================================================

/// Source-diverse selection of up to `limit` chunks.
///
/// First pass takes the best remaining chunk of each source, round-robin in
/// rank order; the second pass fills the rest by rank.
pub fn diversify_by_source(chunks: Vec<CandidateChunk>, limit: usize) -> Vec<CandidateChunk> {
    if limit == 0 || chunks.is_empty() {
        return Vec::new();
    }

    let mut source_order: Vec<String> = Vec::new();
    let mut queues: HashMap<String, VecDeque<usize>> = HashMap::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let key = chunk
            .metadata
            .source_id
            .clone()
            .unwrap_or_else(|| chunk.identity().0);
        queues
            .entry(key.clone())
            .or_insert_with(|| {
                source_order.push(key.clone());
                VecDeque::new()
            })
            .push_back(i);
    }

    let mut picked: Vec<usize> = Vec::with_capacity(limit.min(chunks.len()));
    let mut taken: HashSet<usize> = HashSet::new();
    for key in &source_order {
        if picked.len() >= limit {
            break;
        }
        if let Some(i) = queues.get_mut(key).and_then(VecDeque::pop_front) {
            picked.push(i);
            taken.insert(i);
        }
    }
    for i in 0..chunks.len() {
        if picked.len() >= limit {
            break;
        }
        if !taken.contains(&i) {
            picked.push(i);
            taken.insert(i);
        }
    }

    let mut slots: Vec<Option<CandidateChunk>> = chunks.into_iter().map(Some).collect();
    picked
        .into_iter()
        .filter_map(|i| slots.get_mut(i).and_then(Option::take))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
