//! Corpus fixtures

mod fixtures;

pub use fixtures::{CorpusScenario, TestCorpusFactory, TEST_WORKSPACE};
