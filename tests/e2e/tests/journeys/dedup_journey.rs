//! Dedup journey
//!
//! Ingest, re-ingest, re-index and delete documents against a real SQLite
//! dedup index, the way an indexing pipeline would.

use sift_core::dedup::{generate_content_hash, DuplicateReason};
use sift_core::CandidateChunk;
use sift_e2e_tests::harness::TestDedupManager;
use sift_e2e_tests::mocks::TestCorpusFactory;

const WS: &str = "ws-journey";

fn doc(source: &str, texts: &[&str]) -> Vec<CandidateChunk> {
    texts
        .iter()
        .enumerate()
        .map(|(i, t)| CandidateChunk::new(*t).with_source(source, i as i64))
        .collect()
}

#[tokio::test]
async fn ingest_then_reingest_is_fully_deduplicated() {
    let db = TestDedupManager::new_temp();
    let chunks = doc("handbook", &["Welcome aboard.", "Expenses are filed monthly.", "Laptops are provided."]);

    let first = db.ingest(WS, "handbook", chunks.clone(), false).await;
    assert_eq!(first.stats.unique, 3);
    assert_eq!(db.count(WS).await, 3);

    let second = db.ingest(WS, "handbook", chunks, false).await;
    assert_eq!(second.stats.unique, 0);
    assert_eq!(second.stats.duplicates_indexed, 3);
    assert!(second
        .duplicates
        .iter()
        .all(|d| d.reason == DuplicateReason::Indexed));
    assert_eq!(db.count(WS).await, 3);
}

#[tokio::test]
async fn formatting_variants_collapse_to_one_hash() {
    let db = TestDedupManager::new_temp();
    let batch = TestCorpusFactory::create_variant_batch();

    let result = db.ingest(WS, "rust-book", batch, false).await;
    assert_eq!(result.stats.total, 4);
    assert_eq!(result.stats.unique, 2);
    assert_eq!(result.stats.duplicates_in_batch, 2);
    assert_eq!(
        result.unique[0].content_hash,
        generate_content_hash("it's the \"same\" paragraph about ownership.")
    );
}

#[tokio::test]
async fn reindexing_a_document_is_not_a_duplicate_of_itself() {
    let db = TestDedupManager::new_temp();
    db.ingest(WS, "policy", doc("policy", &["Intro.", "Old rule."]), false)
        .await;

    let updated = doc("policy", &["Intro.", "New rule."]);
    let result = db.ingest(WS, "policy", updated, true).await;
    assert_eq!(result.stats.unique, 2);
    assert_eq!(result.stats.duplicates_indexed, 0);

    // the old rule is still indexed until the source is cleaned up
    assert_eq!(db.count(WS).await, 3);
}

#[tokio::test]
async fn a_second_source_cannot_claim_existing_content() {
    let db = TestDedupManager::new_temp();
    db.ingest(WS, "original", doc("original", &["Shared boilerplate footer."]), false)
        .await;

    let copy = db
        .ingest(WS, "copy", doc("copy", &["shared   BOILERPLATE footer."]), true)
        .await;
    assert_eq!(copy.stats.duplicates_indexed, 1);
    assert!(copy.unique.is_empty());
}

#[tokio::test]
async fn deleting_a_source_frees_its_content() {
    let db = TestDedupManager::new_temp();
    db.ingest(WS, "draft", doc("draft", &["Draft text.", "More draft."]), false)
        .await;

    let removed = db.index.remove_source(WS, "draft").await.unwrap();
    assert_eq!(removed, 2);

    let again = db
        .ingest(WS, "final", doc("final", &["Draft text."]), false)
        .await;
    assert_eq!(again.stats.unique, 1);
}

#[tokio::test]
async fn workspaces_do_not_share_hashes() {
    let db = TestDedupManager::new_temp();
    db.ingest("ws-a", "doc", doc("doc", &["Same words."]), false).await;
    let other = db.ingest("ws-b", "doc", doc("doc", &["Same words."]), false).await;
    assert_eq!(other.stats.unique, 1);

    assert_eq!(db.index.remove_workspace("ws-a").await.unwrap(), 1);
    assert_eq!(db.count("ws-a").await, 0);
    assert_eq!(db.count("ws-b").await, 1);
}

#[tokio::test]
async fn index_survives_reopen() {
    let mut db = TestDedupManager::new_temp();
    let chunks = doc("notes", &["Persisted across restarts."]);
    db.ingest(WS, "notes", chunks.clone(), false).await;

    db.reopen();
    let result = db
        .index
        .deduplicate_chunks_at_index(WS, chunks, None)
        .await;
    assert_eq!(result.stats.duplicates_indexed, 1);
}

#[tokio::test]
async fn concurrent_indexers_of_the_same_content_do_not_fail() {
    let db = TestDedupManager::new_temp();
    let chunks = doc("race", &["Indexed twice at once.", "Second chunk."]);

    let first = db.index.deduplicate_chunks_at_index(WS, chunks.clone(), None).await;
    let second = db.index.deduplicate_chunks_at_index(WS, chunks, None).await;

    let (a, b) = tokio::join!(
        db.index.record_indexed_chunks(WS, "race", &first.unique),
        db.index.record_indexed_chunks(WS, "race", &second.unique),
    );
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(db.count(WS).await, 2);
}
