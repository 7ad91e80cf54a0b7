//! Strategy journeys
//!
//! Each test drives one strategy end to end over the documentation
//! scenario, with the in-memory reference collaborators.

use std::collections::HashSet;
use std::sync::Arc;

use sift_core::search::{LexicalOverlapProvider, TemplateQueryEnhancer};
use sift_core::{
    CallOptions, CandidateChunk, ExpansionType, InMemorySparseIndex, InMemoryVectorStore,
    RetrievalEngine, SiftConfig, Strategy, StrategyConfig,
};
use sift_e2e_tests::harness::{ScriptedEnhancer, SummaryCompressor};
use sift_e2e_tests::mocks::{TestCorpusFactory, TEST_WORKSPACE};

fn engine_with(enhancer: Arc<dyn sift_core::QueryEnhancer>) -> RetrievalEngine {
    let scenario = TestCorpusFactory::create_docs_scenario();
    let store = InMemoryVectorStore::new(scenario.chunks);
    let sparse = InMemorySparseIndex::new(store.clone());
    RetrievalEngine::builder(Arc::new(store))
        .sparse(Arc::new(sparse))
        .enhancer(enhancer)
        .compressor(Arc::new(SummaryCompressor))
        .cross_encoder(Arc::new(LexicalOverlapProvider))
        .build()
}

fn engine() -> RetrievalEngine {
    engine_with(Arc::new(TemplateQueryEnhancer))
}

fn count_source(docs: &[CandidateChunk], source: &str) -> usize {
    docs.iter()
        .filter(|d| d.metadata.source_id.as_deref() == Some(source))
        .count()
}

#[tokio::test]
async fn focused_query_is_grounded_in_the_matching_guide() {
    let outcome = engine()
        .execute_named(
            "focused",
            "how does tokio runtime scheduling work",
            &CallOptions::for_workspace(TEST_WORKSPACE),
        )
        .await
        .unwrap();

    assert_eq!(outcome.strategy_name, Strategy::Focused);
    assert!(count_source(&outcome.documents, "tokio-guide") >= 3);
    assert!(outcome.metrics.degraded.is_empty());
    assert!(outcome
        .documents
        .iter()
        .all(|d| d.metadata.expansion_type.is_some()));
    assert!(outcome
        .documents
        .iter()
        .any(|d| d.metadata.expansion_type == Some(ExpansionType::Original)));
}

#[tokio::test]
async fn focused_output_is_grouped_by_source_and_position() {
    let outcome = engine()
        .execute_named(
            "focused",
            "sqlite wal readers writer",
            &CallOptions::for_workspace(TEST_WORKSPACE),
        )
        .await
        .unwrap();

    let keys: Vec<(String, i64)> = outcome
        .documents
        .iter()
        .filter_map(|d| d.address().map(|(s, p)| (s.to_string(), p)))
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}

#[tokio::test]
async fn comparison_retrieves_each_entity_separately() {
    let options = CallOptions::for_workspace(TEST_WORKSPACE).with_entities(["tokio", "async-std"]);
    let outcome = engine()
        .execute_named("multi_aspect", "compare scheduling", &options)
        .await
        .unwrap();

    assert_eq!(outcome.metrics.retrieval_calls, 2);
    let entities: HashSet<String> = outcome
        .documents
        .iter()
        .filter_map(|d| d.metadata.comparison_entity.clone())
        .collect();
    assert!(entities.contains("tokio"));
    assert!(entities.contains("async-std"));
    assert_eq!(outcome.metrics.rerank_success, Some(true));
}

#[tokio::test]
async fn comparison_without_entities_falls_back_to_paraphrases() {
    let enhancer = Arc::new(ScriptedEnhancer::new(
        ["tokio scheduling", "async-std scheduling"],
        "unused",
    ));
    let outcome = engine_with(enhancer.clone())
        .execute_named(
            "multi_aspect",
            "runtime scheduling differences",
            &CallOptions::for_workspace(TEST_WORKSPACE),
        )
        .await
        .unwrap();

    assert_eq!(outcome.metrics.retrieval_calls, 3);
    assert!(outcome
        .documents
        .iter()
        .all(|d| d.metadata.comparison_entity.is_none()));
}

#[tokio::test]
async fn deep_query_unions_variants_and_hyde_then_compresses() {
    let enhancer = Arc::new(ScriptedEnhancer::new(
        ["tokio task scheduling", "tokio timers and deadlines"],
        "Tokio schedules tasks on a work-stealing runtime with timers.",
    ));
    let outcome = engine_with(enhancer.clone())
        .execute_named(
            "deep",
            "why does tokio use work stealing",
            &CallOptions::for_workspace(TEST_WORKSPACE),
        )
        .await
        .unwrap();

    // original + two variants + HyDE probe
    assert_eq!(outcome.metrics.retrieval_calls, 4);
    assert_eq!(enhancer.calls(), 2);
    assert!(outcome.metrics.docs_compressed >= 1);

    let compressed = outcome
        .documents
        .iter()
        .filter(|d| {
            d.metadata
                .original_content
                .as_deref()
                .is_some_and(|original| original != d.content)
        })
        .count();
    assert_eq!(compressed, outcome.metrics.docs_compressed);
    for doc in outcome.documents.iter().filter(|d| d.metadata.original_content.is_some()) {
        let original = doc.metadata.original_content.as_deref().unwrap_or_default();
        assert!(doc.content.len() <= original.len());
    }
}

#[tokio::test]
async fn repeated_deep_queries_hit_the_enhancement_caches() {
    let enhancer = Arc::new(ScriptedEnhancer::new(["tokio executor"], "A tokio passage."));
    let engine = engine_with(enhancer.clone());
    let options = CallOptions::for_workspace(TEST_WORKSPACE);

    engine.execute_named("deep", "tokio runtime", &options).await.unwrap();
    engine.execute_named("deep", "  Tokio   RUNTIME ", &options).await.unwrap();

    assert_eq!(enhancer.calls(), 2);
}

#[tokio::test]
async fn broad_query_spreads_across_sources() {
    let outcome = engine()
        .execute_named(
            "broad",
            "runtime overview",
            &CallOptions::for_workspace(TEST_WORKSPACE),
        )
        .await
        .unwrap();

    let leading: HashSet<String> = TestCorpusFactory::sources(&outcome.documents)
        .into_iter()
        .take(3)
        .collect();
    assert_eq!(leading.len(), 3);
    assert!(outcome
        .documents
        .iter()
        .all(|d| d.metadata.source_id.as_deref() != Some("toc-page")));
    assert!(outcome.documents.len() <= 12);
}

#[tokio::test]
async fn configured_overrides_change_strategy_defaults() {
    let mut config = SiftConfig::default();
    config.strategies.insert(
        Strategy::Focused,
        serde_json::from_str(r#"{"topK": 2, "useContextExpansion": false}"#).unwrap(),
    );

    let scenario = TestCorpusFactory::create_docs_scenario();
    let store = InMemoryVectorStore::new(scenario.chunks);
    let engine = RetrievalEngine::builder(Arc::new(store)).config(config).build();

    let outcome = engine
        .execute_named(
            "focused",
            "sqlite pragmas",
            &CallOptions::for_workspace(TEST_WORKSPACE),
        )
        .await
        .unwrap();
    assert_eq!(outcome.documents.len(), 2);
    assert_eq!(outcome.metrics.siblings_added, 0);
}

#[tokio::test]
async fn context_only_returns_conversation_context() {
    let context = vec![
        CandidateChunk::new("Earlier answer about tokio runtimes.").with_source("chat", 0),
    ];
    let options = CallOptions::for_workspace(TEST_WORKSPACE).with_context(context.clone());
    let outcome = engine()
        .execute_named("context_only", "and timers?", &options)
        .await
        .unwrap();
    assert_eq!(outcome.documents, context);
    assert_eq!(outcome.metrics.retrieval_calls, 0);
}

#[tokio::test]
async fn empty_strategies_return_nothing() {
    let engine = engine();
    for strategy in [Strategy::NoRetrieval, Strategy::Decline] {
        let outcome = engine
            .execute(
                strategy,
                "anything",
                &StrategyConfig::defaults_for(strategy),
                &CallOptions::for_workspace(TEST_WORKSPACE),
            )
            .await
            .unwrap();
        assert!(outcome.documents.is_empty());
        assert_eq!(outcome.metrics.retrieval_calls, 0);
        assert_eq!(outcome.metrics.candidates_retrieved, 0);
    }
}
