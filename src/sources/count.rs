//! Count-metric adapters: view velocity and post counts.
//!
//! Both read a `CountSeries` for the subject named in the question. Views are
//! projected with the decay/power-law ensemble; posts use the daily count-rate
//! model. The subject match is structural, so `match_quality` instead reports
//! how much data backs the fit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{guarded, SourceAdapter};
use crate::cache::TtlCache;
use crate::config::default_timeout_ms;
use crate::domain::{ConfidenceTier, MarketQuery, SourceEstimate, SourceKey, SourceOutcome};
use crate::error::Result;
use crate::intent::{CountMetric, IntentParser};
use crate::models::count_rate::DEFAULT_WINDOW_DAYS;
use crate::models::{count_rate_probability, project, CountObservation, CountRateInput, DailyRateStats};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountSeries {
    pub subject: String,
    /// Count so far within the market's window
    pub current: f64,
    /// When counting started (video publication, window open)
    pub started_at: Option<DateTime<Utc>>,
    /// Cumulative samples since `started_at`
    #[serde(default)]
    pub observations: Vec<CountObservation>,
    /// Completed daily totals, oldest first
    #[serde(default)]
    pub daily_counts: Vec<f64>,
}

#[async_trait]
pub trait CountFeed: Send + Sync {
    /// `None` when the feed does not track `subject`
    async fn series(&self, metric: CountMetric, subject: &str) -> Result<Option<CountSeries>>;
}

/// Series published by a separate poller; lookups never block on I/O
#[derive(Debug, Default)]
pub struct MemoryCountFeed {
    series: DashMap<(CountMetric, String), CountSeries>,
}

impl MemoryCountFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, metric: CountMetric, series: CountSeries) {
        self.series
            .insert((metric, series.subject.to_lowercase()), series);
    }
}

#[async_trait]
impl CountFeed for MemoryCountFeed {
    async fn series(&self, metric: CountMetric, subject: &str) -> Result<Option<CountSeries>> {
        Ok(self
            .series
            .get(&(metric, subject.to_lowercase()))
            .map(|s| s.value().clone()))
    }
}

/// View samples at which a projection counts as fully supported
const FULL_SUPPORT_SAMPLES: f64 = 24.0;
/// Observed days at which a posting rate counts as fully supported
const FULL_SUPPORT_DAYS: f64 = 14.0;

fn view_fit_support(samples: usize) -> f64 {
    0.5 + 0.5 * (samples as f64 / FULL_SUPPORT_SAMPLES).min(1.0)
}

/// A prior alone scores below the weak-match threshold
fn post_rate_support(observed_days: usize) -> f64 {
    0.4 + 0.6 * (observed_days as f64 / FULL_SUPPORT_DAYS).min(1.0)
}

type SeriesCache = TtlCache<(CountMetric, String), Option<CountSeries>>;

async fn cached_series(
    cache: &SeriesCache,
    feed: &Arc<dyn CountFeed>,
    metric: CountMetric,
    subject: &str,
) -> Result<(Option<CountSeries>, bool)> {
    let feed = Arc::clone(feed);
    let owned = subject.to_string();
    let cached = cache
        .get_or_fetch((metric, subject.to_lowercase()), move || async move {
            feed.series(metric, &owned).await
        })
        .await?;
    let from_cache = cached.from_cache();
    Ok((cached.value, from_cache))
}

pub struct ViewVelocityAdapter {
    feed: Arc<dyn CountFeed>,
    intent: Arc<dyn IntentParser>,
    cache: SeriesCache,
    deadline: Duration,
}

impl ViewVelocityAdapter {
    pub fn new(feed: Arc<dyn CountFeed>, intent: Arc<dyn IntentParser>, ttl: Duration) -> Self {
        Self {
            feed,
            intent,
            cache: TtlCache::new("view_series", ttl),
            deadline: Duration::from_millis(default_timeout_ms(SourceKey::ViewVelocity)),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    async fn run(&self, query: &MarketQuery) -> Result<SourceOutcome> {
        let Some(target) = self
            .intent
            .count_target(query)
            .filter(|t| t.metric == CountMetric::Views)
        else {
            return Ok(SourceOutcome::not_applicable("not a view-count question"));
        };
        let Some(end) = query.end_date else {
            return Ok(SourceOutcome::not_applicable("market has no deadline"));
        };

        let (series, from_cache) =
            cached_series(&self.cache, &self.feed, CountMetric::Views, &target.subject).await?;
        let Some(series) = series else {
            return Ok(SourceOutcome::no_match(format!(
                "no view series for {}",
                target.subject
            )));
        };
        let Some(started) = series.started_at else {
            return Ok(SourceOutcome::no_match(format!(
                "{} has no publication time",
                series.subject
            )));
        };
        let deadline_hours = (end - started).num_seconds() as f64 / 3_600.0;

        let Some(projection) = project(&series.observations, deadline_hours, target.target) else {
            return Ok(SourceOutcome::not_applicable(
                "fewer than two usable view samples",
            ));
        };

        let points = series.observations.len();
        let confidence = if points >= 12 && projection.data_confidence >= 0.6 {
            ConfidenceTier::High
        } else if points >= 4 {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        };

        debug!(
            subject = %series.subject,
            projected = projection.projected,
            target = target.target,
            prob = projection.prob,
            "view velocity projection"
        );

        Ok(
            SourceEstimate::new(SourceKey::ViewVelocity, projection.prob, confidence)
                .with_match(view_fit_support(points), false)
                .with_detail(format!(
                    "{}: {:.0} views now, projected {:.0} vs target {:.0} ({} samples, power-law weight {:.2})",
                    series.subject,
                    projection.current,
                    projection.projected,
                    target.target,
                    points,
                    projection.weights.power_law
                ))
                .with_cached(from_cache)
                .into(),
        )
    }
}

#[async_trait]
impl SourceAdapter for ViewVelocityAdapter {
    fn key(&self) -> SourceKey {
        SourceKey::ViewVelocity
    }

    async fn estimate(&self, query: &MarketQuery) -> SourceOutcome {
        self.estimate_within(query, self.deadline).await
    }

    async fn estimate_within(&self, query: &MarketQuery, deadline: Duration) -> SourceOutcome {
        guarded(self.key(), deadline, self.run(query)).await
    }
}

pub struct PostCountAdapter {
    feed: Arc<dyn CountFeed>,
    intent: Arc<dyn IntentParser>,
    cache: SeriesCache,
    /// Used when the subject has too little history to learn from
    prior: Option<DailyRateStats>,
    deadline: Duration,
}

impl PostCountAdapter {
    pub fn new(feed: Arc<dyn CountFeed>, intent: Arc<dyn IntentParser>, ttl: Duration) -> Self {
        Self {
            feed,
            intent,
            cache: TtlCache::new("post_series", ttl),
            prior: None,
            deadline: Duration::from_millis(default_timeout_ms(SourceKey::PostCount)),
        }
    }

    pub fn with_prior(mut self, prior: DailyRateStats) -> Self {
        self.prior = Some(prior);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    async fn run(&self, query: &MarketQuery) -> Result<SourceOutcome> {
        let Some(target) = self
            .intent
            .count_target(query)
            .filter(|t| t.metric == CountMetric::Posts)
        else {
            return Ok(SourceOutcome::not_applicable("not a post-count question"));
        };
        let Some(days_remaining) = query.days_remaining() else {
            return Ok(SourceOutcome::not_applicable("market has no deadline"));
        };

        let (series, from_cache) =
            cached_series(&self.cache, &self.feed, CountMetric::Posts, &target.subject).await?;
        let Some(series) = series else {
            return Ok(SourceOutcome::no_match(format!(
                "no post series for {}",
                target.subject
            )));
        };

        let Some(stats) = DailyRateStats::from_daily_counts(&series.daily_counts, DEFAULT_WINDOW_DAYS)
            .or(self.prior)
        else {
            return Ok(SourceOutcome::not_applicable(format!(
                "no posting history for {}",
                series.subject
            )));
        };

        let output = count_rate_probability(&CountRateInput {
            current_count: series.current,
            threshold: target.target,
            days_remaining,
            stats,
        });

        let basis = if stats.observed_days > 0 {
            format!("{} observed days", stats.observed_days)
        } else {
            "prior".to_string()
        };
        Ok(
            SourceEstimate::new(SourceKey::PostCount, output.prob, output.confidence)
                .with_match(post_rate_support(stats.observed_days), false)
                .with_detail(format!(
                    "{}: {:.0} posts, needs {:.0} more in {:.1}d, expects {:.0} ({:.1}/d over {})",
                    series.subject,
                    series.current,
                    output.remaining_needed.max(0.0),
                    days_remaining.max(0.0),
                    output.expected_remaining,
                    stats.mean,
                    basis
                ))
                .with_cached(from_cache)
                .into(),
        )
    }
}

#[async_trait]
impl SourceAdapter for PostCountAdapter {
    fn key(&self) -> SourceKey {
        SourceKey::PostCount
    }

    async fn estimate(&self, query: &MarketQuery) -> SourceOutcome {
        self.estimate_within(query, self.deadline).await
    }

    async fn estimate_within(&self, query: &MarketQuery, deadline: Duration) -> SourceOutcome {
        guarded(self.key(), deadline, self.run(query)).await
    }
}
