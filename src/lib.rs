//! Multi-source probability fusion for prediction markets.
//!
//! Each `SourceAdapter` turns one external signal (sportsbook odds, a price
//! model, view counts, a crowd forecast, another exchange, an LLM) into a
//! fixed-shape `SourceEstimate`. The `FusionEngine` queries every adapter
//! concurrently under its own deadline, combines what comes back into a
//! confidence-weighted consensus and grades how far the divergence from the
//! market price can be trusted.

pub mod cache;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod intent;
pub mod logging;
pub mod matching;
pub mod models;
pub mod sources;

pub use config::FusionConfig;
pub use domain::{
    Absence, ConfidenceTier, EdgeDirection, EdgeGrade, EdgeSignal, FusedSignal,
    FusedSignalRecord, MarketQuery, SourceEstimate, SourceKey, SourceOutcome,
};
pub use engine::{BatchSummary, EdgeQualityPolicy, EdgeQualityScorer, FusionEngine, SignalSink};
pub use error::{FuseError, Result};
pub use sources::{SourceAdapter, SourceFeeds, SourceSet};
