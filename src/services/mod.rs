//! Core services: filesystem indexing, git introspection, relevance scoring.

pub mod git;
pub mod indexer;
pub mod scorer;

pub use indexer::{FileIndexer, IndexLimits, WalkOutcome};
pub use scorer::{score_files, ScoringContext};
