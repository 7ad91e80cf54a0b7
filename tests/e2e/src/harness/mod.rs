//! Test harness: collaborators with injectable failures and isolated
//! dedup databases.

mod collaborators;
mod db_manager;

pub use collaborators::{
    FailingCrossEncoder, FailingEnhancer, FlakyVectorStore, GrowingCompressor, HangingCrossEncoder,
    ScriptedEnhancer, SlowEnhancer, StallingCompressor, SummaryCompressor,
};
pub use db_manager::TestDedupManager;
