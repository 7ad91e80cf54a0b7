//! Chaos tests
//!
//! Collaborators fail, hang or misbehave; the engine must degrade the
//! optional stages, record what fell back, and only fail when base
//! retrieval itself is lost.

use std::sync::Arc;
use std::time::Duration;

use sift_core::retrieval::{expand_with_siblings, ExpansionOptions};
use sift_core::search::LexicalOverlapProvider;
use sift_core::{
    CallOptions, CancellationToken, CrossEncoderProvider, InMemorySparseIndex, QueryEnhancer,
    RetrievalEngine, RetrievalError, RetrievalOutcome, SiftConfig,
};
use sift_e2e_tests::harness::{
    FailingCrossEncoder, FailingEnhancer, FlakyVectorStore, GrowingCompressor,
    HangingCrossEncoder, SlowEnhancer, StallingCompressor, SummaryCompressor,
};
use sift_e2e_tests::mocks::{TestCorpusFactory, TEST_WORKSPACE};

fn store() -> FlakyVectorStore {
    FlakyVectorStore::new(TestCorpusFactory::create_docs_scenario().chunks)
}

fn options() -> CallOptions {
    CallOptions::for_workspace(TEST_WORKSPACE)
}

fn degraded_stages(outcome: &RetrievalOutcome) -> Vec<&str> {
    outcome
        .metrics
        .degraded
        .iter()
        .map(|d| d.stage.as_str())
        .collect()
}

fn comparison_options() -> CallOptions {
    options().with_entities(["tokio", "async-std"])
}

fn engine(
    store: FlakyVectorStore,
    enhancer: Option<Arc<dyn QueryEnhancer>>,
    cross_encoder: Arc<dyn CrossEncoderProvider>,
    config: SiftConfig,
) -> RetrievalEngine {
    let mut builder = RetrievalEngine::builder(Arc::new(store))
        .compressor(Arc::new(SummaryCompressor))
        .cross_encoder(cross_encoder)
        .config(config);
    if let Some(enhancer) = enhancer {
        builder = builder.enhancer(enhancer);
    }
    builder.build()
}

// ============================================================================
// OPTIONAL STAGES DEGRADE
// ============================================================================

#[tokio::test]
async fn failing_enhancer_degrades_deep_to_plain_retrieval() {
    let engine = engine(
        store(),
        Some(Arc::new(FailingEnhancer)),
        Arc::new(LexicalOverlapProvider),
        SiftConfig::default(),
    );

    let outcome = engine
        .execute_named("deep", "tokio timers", &options())
        .await
        .unwrap();

    assert!(!outcome.documents.is_empty());
    assert_eq!(outcome.metrics.retrieval_calls, 1);
    let stages = degraded_stages(&outcome);
    assert!(stages.contains(&"query_expansion"));
    assert!(stages.contains(&"hyde"));
}

#[tokio::test]
async fn slow_enhancer_times_out_without_blocking_the_call() {
    let mut config = SiftConfig::default();
    config.enhancement_timeout_ms = 50;
    let engine = engine(
        store(),
        Some(Arc::new(SlowEnhancer {
            delay: Duration::from_secs(30),
        })),
        Arc::new(LexicalOverlapProvider),
        config,
    );

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        engine.execute_named("broad", "runtime overview", &options()),
    )
    .await
    .expect("call should not wait for the enhancer")
    .unwrap();

    assert!(!outcome.documents.is_empty());
    assert!(degraded_stages(&outcome).contains(&"query_expansion"));
}

#[tokio::test]
async fn hanging_cross_encoder_falls_back_to_retrieval_order() {
    let mut config = SiftConfig::default();
    config.reranker.timeout_ms = 100;
    let engine = engine(store(), None, Arc::new(HangingCrossEncoder), config);

    let outcome = engine
        .execute_named("multi_aspect", "compare scheduling", &comparison_options())
        .await
        .unwrap();

    assert!(!outcome.documents.is_empty());
    assert_eq!(outcome.metrics.rerank_success, Some(false));
    assert_eq!(outcome.metrics.reranker_provider.as_deref(), Some("fallback"));
    assert!(degraded_stages(&outcome).contains(&"cross_encoder"));
}

#[tokio::test]
async fn failing_cross_encoder_keeps_results() {
    let engine = engine(
        store(),
        None,
        Arc::new(FailingCrossEncoder),
        SiftConfig::default(),
    );

    let outcome = engine
        .execute_named("multi_aspect", "compare scheduling", &comparison_options())
        .await
        .unwrap();

    assert!(!outcome.documents.is_empty());
    assert!(outcome.documents.len() <= 8);
    assert_eq!(outcome.metrics.rerank_success, Some(false));
}

#[tokio::test]
async fn failing_sibling_lookup_leaves_candidates_unexpanded() {
    let store = store().failing_scroll();
    let engine = engine(
        store,
        None,
        Arc::new(LexicalOverlapProvider),
        SiftConfig::default(),
    );

    let outcome = engine
        .execute_named("focused", "sqlite wal readers", &options())
        .await
        .unwrap();

    assert!(!outcome.documents.is_empty());
    assert_eq!(outcome.metrics.siblings_added, 0);
    assert!(degraded_stages(&outcome).contains(&"context_expansion"));
}

#[tokio::test]
async fn hanging_sibling_lookup_only_skips_its_own_candidate() {
    let store = store().hanging_scroll_for("tokio-guide");
    // tokio-guide position 1, then sqlite-notes position 1
    let candidates = vec![store.inner().chunks()[1].clone(), store.inner().chunks()[9].clone()];
    let options = ExpansionOptions {
        lookup_timeout_ms: 100,
        ..Default::default()
    };

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        expand_with_siblings(&store, candidates, TEST_WORKSPACE, &options, &CancellationToken::new()),
    )
    .await
    .expect("a stalled lookup must not hold up the others");

    assert_eq!(store.scroll_calls(), 2);
    assert_eq!(result.lookup_failures, 1);
    assert_eq!(result.siblings_added, 2);
    let sqlite: Vec<_> = result
        .chunks
        .iter()
        .filter(|c| c.metadata.source_id.as_deref() == Some("sqlite-notes"))
        .filter_map(|c| c.metadata.position)
        .collect();
    assert_eq!(sqlite, vec![0, 1, 2]);
}

#[tokio::test]
async fn hanging_sibling_lookup_degrades_expansion_in_the_engine() {
    let mut config = SiftConfig::default();
    config.expansion.lookup_timeout_ms = 100;
    let engine = engine(
        store().hanging_scroll_for("sqlite-notes"),
        None,
        Arc::new(LexicalOverlapProvider),
        config,
    );

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        engine.execute_named("focused", "sqlite wal readers", &options()),
    )
    .await
    .expect("call should not wait for the stalled lookup")
    .unwrap();

    assert!(!outcome.documents.is_empty());
    assert!(degraded_stages(&outcome).contains(&"context_expansion"));
}

#[tokio::test]
async fn slow_extract_keeps_the_other_extracts() {
    let mut config = SiftConfig::default();
    config.compression.timeout_ms = 100;
    let engine = RetrievalEngine::builder(Arc::new(store()))
        .compressor(Arc::new(StallingCompressor::default()))
        .config(config)
        .build();

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        engine.execute_named("deep", "tokio runtime scheduling", &options()),
    )
    .await
    .expect("call should not wait for the stalled extract")
    .unwrap();

    let sent = outcome.documents.len().min(5);
    assert!(sent >= 2);
    assert_eq!(outcome.metrics.docs_compressed, sent - 1);
    assert!(degraded_stages(&outcome).contains(&"compression"));

    let first = &outcome.documents[0];
    assert_eq!(first.metadata.original_content.as_deref(), Some(first.content.as_str()));
}

#[tokio::test]
async fn growing_extracts_are_rejected() {
    let engine = RetrievalEngine::builder(Arc::new(store()))
        .compressor(Arc::new(GrowingCompressor))
        .build();

    let outcome = engine
        .execute_named("deep", "tokio runtime", &options())
        .await
        .unwrap();

    assert_eq!(outcome.metrics.docs_compressed, 0);
    for doc in &outcome.documents {
        if let Some(original) = &doc.metadata.original_content {
            assert_eq!(&doc.content, original);
        }
    }
}

// ============================================================================
// PARTIAL AND TOTAL RETRIEVAL FAILURE
// ============================================================================

#[tokio::test]
async fn one_failing_entity_keeps_the_other() {
    let store = store().failing_queries_containing("async-std");
    let engine = engine(
        store,
        None,
        Arc::new(LexicalOverlapProvider),
        SiftConfig::default(),
    );

    let outcome = engine
        .execute_named("multi_aspect", "compare scheduling", &comparison_options())
        .await
        .unwrap();

    assert!(!outcome.documents.is_empty());
    assert!(outcome
        .documents
        .iter()
        .all(|d| d.metadata.comparison_entity.as_deref() == Some("tokio")));
    assert!(degraded_stages(&outcome).contains(&"entity_retrieval"));
}

#[tokio::test]
async fn every_entity_failing_is_an_error() {
    let engine = engine(
        store().failing_search(),
        None,
        Arc::new(LexicalOverlapProvider),
        SiftConfig::default(),
    );

    let result = engine
        .execute_named("multi_aspect", "compare scheduling", &comparison_options())
        .await;
    assert!(matches!(result, Err(RetrievalError::BaseRetrieval(_))));
}

#[tokio::test]
async fn base_retrieval_failure_is_an_error() {
    let engine = engine(
        store().failing_search(),
        Some(Arc::new(FailingEnhancer)),
        Arc::new(LexicalOverlapProvider),
        SiftConfig::default(),
    );

    for strategy in ["focused", "deep", "broad"] {
        let result = engine.execute_named(strategy, "tokio", &options()).await;
        assert!(
            matches!(result, Err(RetrievalError::BaseRetrieval(_))),
            "{strategy} should fail"
        );
    }
}

#[tokio::test]
async fn unknown_strategy_is_rejected() {
    let engine = RetrievalEngine::builder(Arc::new(store())).build();
    let result = engine.execute_named("exhaustive", "tokio", &options()).await;
    assert!(matches!(result, Err(RetrievalError::UnknownStrategy(_))));
}

// ============================================================================
// CANCELLATION
// ============================================================================

#[tokio::test]
async fn cancelled_before_start() {
    let flaky = store();
    let engine = RetrievalEngine::builder(Arc::new(flaky)).build();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = engine
        .execute_named("focused", "tokio", &options().with_cancel(cancel))
        .await;
    assert!(matches!(result, Err(RetrievalError::Cancelled)));
}

#[tokio::test]
async fn cancelled_during_slow_search() {
    let flaky = store().with_search_delay(Duration::from_secs(30));
    let engine = RetrievalEngine::builder(Arc::new(flaky)).build();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        engine.execute_named("focused", "tokio", &options().with_cancel(cancel)),
    )
    .await
    .expect("cancellation should end the call promptly");
    assert!(matches!(result, Err(RetrievalError::Cancelled)));
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_queries_agree() {
    let scenario = TestCorpusFactory::create_docs_scenario();
    let store = sift_core::InMemoryVectorStore::new(scenario.chunks);
    let sparse = InMemorySparseIndex::new(store.clone());
    let engine = Arc::new(
        RetrievalEngine::builder(Arc::new(store))
            .sparse(Arc::new(sparse))
            .cross_encoder(Arc::new(LexicalOverlapProvider))
            .build(),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .execute_named("focused", "tokio runtime scheduling", &options())
                    .await
                    .map(|o| {
                        o.documents
                            .into_iter()
                            .map(|d| d.content)
                            .collect::<Vec<_>>()
                    })
            })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }
    assert!(results.windows(2).all(|w| w[0] == w[1]));
    assert!(!results[0].is_empty());
}
