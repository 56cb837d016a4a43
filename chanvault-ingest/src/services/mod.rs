//! Pipeline collaborators

pub mod classifier;
pub mod dedup_index;
pub mod fingerprinter;
pub mod stats;
pub mod storage;

pub use classifier::ClassificationEngine;
pub use dedup_index::{DuplicateIndex, ReserveOutcome};
pub use fingerprinter::Fingerprinter;
pub use stats::StatsAggregator;
pub use storage::StorageCoordinator;
