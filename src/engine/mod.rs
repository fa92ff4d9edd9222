//! Fusion engine: consensus, edge quality grading and signal history.

pub mod consensus;
pub mod fusion;
pub mod history;
pub mod quality;
pub mod summary;

pub use consensus::{aggregate, edge_signal, overall_confidence, Consensus};
pub use fusion::{FusionEngine, FusionEngineBuilder};
pub use history::{MemorySignalLog, SignalSink};
pub use quality::{EdgeQualityPolicy, EdgeQualityScorer, QualityBreakdown};
pub use summary::BatchSummary;
