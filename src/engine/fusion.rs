//! Fusion engine: fan out to every registered source, fan in one signal.

use chrono::Utc;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

use super::consensus::{aggregate, edge_signal};
use super::history::SignalSink;
use super::quality::EdgeQualityScorer;
use crate::config::{FusionConfig, SourcePolicy, SourcesConfig};
use crate::domain::{
    Absence, EdgeDirection, EdgeGrade, FusedSignal, FusedSignalRecord, MarketQuery,
    SkippedSource, SourceEstimate, SourceKey, SourceOutcome,
};
use crate::error::{FuseError, Result};
use crate::sources::{SourceAdapter, SourceSet};

/// Slack past the allotted deadline before the engine stops waiting on an
/// adapter that ignores it
const DEADLINE_GRACE: Duration = Duration::from_millis(250);

struct RegisteredSource {
    key: SourceKey,
    adapter: Arc<dyn SourceAdapter>,
    policy: SourcePolicy,
}

/// Builder for `FusionEngine`. Source policies default to the `[sources]`
/// section of the config the builder was created from.
pub struct FusionEngineBuilder {
    sources_config: SourcesConfig,
    scorer: EdgeQualityScorer,
    max_concurrent: usize,
    record_history: bool,
    sources: Vec<RegisteredSource>,
    sink: Option<Arc<dyn SignalSink>>,
}

impl FusionEngineBuilder {
    pub fn new(config: &FusionConfig) -> Self {
        Self {
            sources_config: config.sources.clone(),
            scorer: EdgeQualityScorer::new(config.quality.clone()),
            max_concurrent: config.fusion.max_concurrent_fusions,
            record_history: config.fusion.record_history,
            sources: Vec::new(),
            sink: None,
        }
    }

    /// Register an adapter with the configured policy for its key
    pub fn source(self, adapter: Arc<dyn SourceAdapter>) -> Self {
        let policy = self.sources_config.resolve(adapter.key());
        self.source_with_policy(adapter, policy)
    }

    pub fn source_with_policy(mut self, adapter: Arc<dyn SourceAdapter>, policy: SourcePolicy) -> Self {
        self.sources.push(RegisteredSource {
            key: adapter.key(),
            adapter,
            policy,
        });
        self
    }

    /// Register every adapter of a config-built set
    pub fn sources(self, set: SourceSet) -> Self {
        set.into_adapters()
            .into_iter()
            .fold(self, |builder, adapter| builder.source(adapter))
    }

    pub fn sink(mut self, sink: Arc<dyn SignalSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<FusionEngine> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.key) {
                return Err(FuseError::InvalidConfig(format!(
                    "source {} registered twice",
                    source.key
                )));
            }
            if !source.policy.weight.is_finite() || source.policy.weight < 0.0 {
                return Err(FuseError::InvalidConfig(format!(
                    "source {} has invalid weight {}",
                    source.key, source.policy.weight
                )));
            }
        }
        if self.max_concurrent == 0 {
            return Err(FuseError::InvalidConfig(
                "max_concurrent_fusions must be at least 1".to_string(),
            ));
        }
        self.scorer.policy().validate()?;

        Ok(FusionEngine {
            sources: self.sources,
            scorer: self.scorer,
            max_concurrent: self.max_concurrent,
            record_history: self.record_history,
            sink: self.sink,
        })
    }
}

/// Combines every registered source into one `FusedSignal` per market.
///
/// `fuse` always returns a result. Sources that are disabled, inapplicable,
/// failed or late are listed in `FusedSignal::absences`; if none contributed
/// the consensus is `None` ("no signal").
pub struct FusionEngine {
    sources: Vec<RegisteredSource>,
    scorer: EdgeQualityScorer,
    max_concurrent: usize,
    record_history: bool,
    sink: Option<Arc<dyn SignalSink>>,
}

impl FusionEngine {
    pub fn builder(config: &FusionConfig) -> FusionEngineBuilder {
        FusionEngineBuilder::new(config)
    }

    /// Registered source keys, in registration order
    pub fn source_keys(&self) -> Vec<SourceKey> {
        self.sources.iter().map(|s| s.key).collect()
    }

    pub fn scorer(&self) -> &EdgeQualityScorer {
        &self.scorer
    }

    pub async fn fuse(&self, query: &MarketQuery) -> FusedSignal {
        let span = info_span!("fuse", condition_id = %query.condition_id);
        self.fuse_inner(query).instrument(span).await
    }

    /// Fuse many markets, at most `max_concurrent_fusions` at a time.
    /// Output order matches input order.
    pub async fn fuse_batch(&self, queries: &[MarketQuery]) -> Vec<FusedSignal> {
        stream::iter(queries)
            .map(|query| self.fuse(query))
            .buffered(self.max_concurrent)
            .collect()
            .await
    }

    async fn fuse_inner(&self, query: &MarketQuery) -> FusedSignal {
        let started = Instant::now();
        let shared = Arc::new(query.clone());

        let calls = self.sources.iter().map(|source| {
            let query = Arc::clone(&shared);
            async move { (source, Self::call_source(source, query).await) }
        });
        let outcomes = join_all(calls).await;

        let mut estimates: Vec<(SourceEstimate, f64)> = Vec::new();
        let mut absences = Vec::new();
        for (source, outcome) in outcomes {
            match Self::admit(source.key, outcome) {
                Ok(estimate) => estimates.push((estimate, source.policy.weight)),
                Err(reason) => absences.push(SkippedSource {
                    source: source.key,
                    reason,
                }),
            }
        }

        let consensus = aggregate(&estimates);
        let divergence = consensus
            .prob
            .zip(query.market_price)
            .map(|(prob, market)| prob - market);
        let edge_signal = edge_signal(divergence, consensus.overall_confidence);
        let edge_quality = if consensus.prob.is_some() {
            self.scorer.score(
                &consensus.contributions,
                consensus.overall_confidence,
                query.market_price,
            )
        } else {
            0
        };
        let edge_grade = EdgeGrade::from_quality(edge_quality);

        let signal = FusedSignal {
            consensus_prob: consensus.prob,
            overall_confidence: consensus.overall_confidence,
            market_price: query.market_price,
            divergence,
            edge_signal,
            edge_direction: divergence.map(EdgeDirection::from_divergence),
            edge_quality,
            edge_grade,
            source_count: consensus.contributions.len(),
            source_breakdown: consensus.contributions,
            absences,
            timestamp: Utc::now(),
        };

        info!(
            consensus = ?signal.consensus_prob,
            market = ?signal.market_price,
            sources = signal.source_count,
            absent = signal.absences.len(),
            edge = %signal.edge_signal,
            quality = signal.edge_quality,
            grade = %signal.edge_grade,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fused signal"
        );

        if self.record_history {
            if let Some(sink) = &self.sink {
                let record =
                    FusedSignalRecord::new(&query.condition_id, &query.question, signal.clone());
                if let Err(e) = sink.record(record).await {
                    warn!(error = %e, "failed to record fused signal");
                }
            }
        }

        signal
    }

    /// Run one adapter in its own task under the source deadline. The adapter
    /// is allotted `policy.timeout`; one that overruns it anyway is detached,
    /// not aborted, so it can still fill its cache.
    async fn call_source(source: &RegisteredSource, query: Arc<MarketQuery>) -> SourceOutcome {
        if !source.policy.enabled {
            return SourceOutcome::Absent(Absence::Disabled);
        }

        let started = Instant::now();
        let adapter = Arc::clone(&source.adapter);
        let allotted = source.policy.timeout;
        let task = tokio::spawn(
            async move { adapter.estimate_within(&query, allotted).await }.in_current_span(),
        );

        let outcome = match tokio::time::timeout(allotted + DEADLINE_GRACE, task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(source = %source.key, error = %e, "source task aborted");
                SourceOutcome::failed(format!("adapter task failed: {}", e))
            }
            Err(_) => {
                warn!(
                    source = %source.key,
                    deadline_ms = source.policy.timeout.as_millis() as u64,
                    "source missed engine deadline"
                );
                SourceOutcome::Absent(Absence::TimedOut)
            }
        };
        debug!(
            source = %source.key,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "source settled"
        );
        outcome
    }

    /// Accept an estimate only if it is usable by the aggregator
    fn admit(key: SourceKey, outcome: SourceOutcome) -> std::result::Result<SourceEstimate, Absence> {
        match outcome {
            SourceOutcome::Absent(reason) => Err(reason),
            SourceOutcome::Estimate(e) if e.source != key => Err(Absence::Failed(format!(
                "registered as {} but produced an estimate for {}",
                key, e.source
            ))),
            SourceOutcome::Estimate(e) => match e.prob {
                None => Err(Absence::NotApplicable("estimate carried no probability".to_string())),
                Some(p) if !p.is_finite() => {
                    Err(Absence::Failed("non-finite probability".to_string()))
                }
                Some(_) => Ok(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConfidenceTier, EdgeSignal};
    use crate::engine::history::MemorySignalLog;
    use crate::sources::MockSourceAdapter;

    fn mock(key: SourceKey, prob: f64, confidence: ConfidenceTier) -> MockSourceAdapter {
        let mut adapter = MockSourceAdapter::new();
        adapter.expect_key().return_const(key);
        adapter.expect_estimate_within().returning(move |_, _| {
            SourceEstimate::new(key, prob, confidence).with_match(0.95, true).into()
        });
        adapter
    }

    fn query() -> MarketQuery {
        MarketQuery::new("Will the Lakers beat the Celtics?", "0xlakers").with_market_price(0.55)
    }

    #[tokio::test]
    async fn two_hard_sources_agreeing_is_a_strong_edge() {
        let engine = FusionEngine::builder(&FusionConfig::default())
            .source(Arc::new(mock(SourceKey::Sportsbook, 0.70, ConfidenceTier::High)))
            .source(Arc::new(mock(SourceKey::CryptoModel, 0.71, ConfidenceTier::High)))
            .build()
            .unwrap();

        let signal = engine.fuse(&query()).await;
        assert_eq!(signal.source_count, 2);
        assert_eq!(signal.overall_confidence, ConfidenceTier::High);
        assert_eq!(signal.edge_signal, EdgeSignal::Strong);
        assert_eq!(signal.edge_direction, Some(EdgeDirection::BuyYes));
        assert!(matches!(signal.edge_grade, EdgeGrade::A | EdgeGrade::B));
    }

    #[tokio::test]
    async fn disabled_source_is_never_called() {
        let mut config = FusionConfig::default();
        config.sources.get_mut(SourceKey::LlmReasoner).enabled = false;

        let mut llm = MockSourceAdapter::new();
        llm.expect_key().return_const(SourceKey::LlmReasoner);
        llm.expect_estimate_within().times(0);

        let engine = FusionEngine::builder(&config)
            .source(Arc::new(llm))
            .source(Arc::new(mock(SourceKey::Sportsbook, 0.6, ConfidenceTier::High)))
            .build()
            .unwrap();

        let signal = engine.fuse(&query()).await;
        assert_eq!(signal.absence_of(SourceKey::LlmReasoner), Some(&Absence::Disabled));
        assert!(signal.contributed(SourceKey::Sportsbook));
    }

    #[tokio::test]
    async fn no_sources_means_no_signal() {
        let engine = FusionEngine::builder(&FusionConfig::default()).build().unwrap();
        let signal = engine.fuse(&query()).await;
        assert_eq!(signal.consensus_prob, None);
        assert_eq!(signal.divergence, None);
        assert_eq!(signal.edge_direction, None);
        assert_eq!(signal.edge_signal, EdgeSignal::None);
        assert_eq!(signal.edge_quality, 0);
        assert_eq!(signal.edge_grade, EdgeGrade::D);
    }

    #[tokio::test]
    async fn duplicate_keys_are_rejected() {
        let result = FusionEngine::builder(&FusionConfig::default())
            .source(Arc::new(mock(SourceKey::Sportsbook, 0.6, ConfidenceTier::High)))
            .source(Arc::new(mock(SourceKey::Sportsbook, 0.7, ConfidenceTier::High)))
            .build();
        assert!(matches!(result, Err(FuseError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn mislabelled_estimates_are_failures() {
        let mut adapter = MockSourceAdapter::new();
        adapter.expect_key().return_const(SourceKey::CrowdForecast);
        adapter.expect_estimate_within().returning(|_, _| {
            SourceEstimate::new(SourceKey::Sportsbook, 0.9, ConfidenceTier::High).into()
        });
        let engine = FusionEngine::builder(&FusionConfig::default())
            .source(Arc::new(adapter))
            .build()
            .unwrap();

        let signal = engine.fuse(&query()).await;
        assert!(signal.consensus_prob.is_none());
        assert!(matches!(
            signal.absence_of(SourceKey::CrowdForecast),
            Some(Absence::Failed(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_times_out_without_blocking_others() {
        struct Stalled;

        #[async_trait::async_trait]
        impl SourceAdapter for Stalled {
            fn key(&self) -> SourceKey {
                SourceKey::LlmReasoner
            }

            async fn estimate(&self, _query: &MarketQuery) -> SourceOutcome {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                SourceOutcome::not_applicable("never reached")
            }
        }

        let engine = FusionEngine::builder(&FusionConfig::default())
            .source(Arc::new(Stalled))
            .source(Arc::new(mock(SourceKey::Sportsbook, 0.6, ConfidenceTier::High)))
            .build()
            .unwrap();

        let started = tokio::time::Instant::now();
        let signal = engine.fuse(&query()).await;
        assert!(started.elapsed() <= Duration::from_secs(16));
        assert_eq!(signal.absence_of(SourceKey::LlmReasoner), Some(&Absence::TimedOut));
        assert_eq!(signal.consensus_prob, Some(0.6));
    }

    #[tokio::test]
    async fn configured_timeout_is_allotted_to_the_adapter() {
        let mut config = FusionConfig::default();
        config.sources.get_mut(SourceKey::CrowdForecast).timeout_ms = Some(30_000);

        let mut crowd = MockSourceAdapter::new();
        crowd.expect_key().return_const(SourceKey::CrowdForecast);
        crowd
            .expect_estimate_within()
            .withf(|_, deadline| *deadline == Duration::from_secs(30))
            .times(1)
            .returning(|_, _| {
                SourceEstimate::new(SourceKey::CrowdForecast, 0.4, ConfidenceTier::Medium).into()
            });

        let engine = FusionEngine::builder(&config)
            .source(Arc::new(crowd))
            .build()
            .unwrap();
        let signal = engine.fuse(&query()).await;
        assert_eq!(signal.consensus_prob, Some(0.4));
    }

    #[tokio::test]
    async fn history_is_recorded_when_enabled() {
        let log = Arc::new(MemorySignalLog::new());
        let engine = FusionEngine::builder(&FusionConfig::default())
            .source(Arc::new(mock(SourceKey::Sportsbook, 0.6, ConfidenceTier::High)))
            .sink(log.clone())
            .build()
            .unwrap();

        engine.fuse(&query()).await;
        engine.fuse(&query()).await;
        let records = log.for_condition("0xlakers").await;
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].record_id, records[1].record_id);
        assert_eq!(records[0].signal.consensus_prob, Some(0.6));
    }
}
