//! Source adapters: one external signal each, one uniform contract.
//!
//! An adapter turns whatever its upstream returns into a fixed-shape
//! `SourceEstimate`, or a typed `Absence`. It never returns an error and never
//! outlives the deadline it is allotted; `guarded` enforces both for every
//! adapter. The engine allots each source its configured timeout through
//! `estimate_within`; a bare `estimate` falls back to the adapter's own.

pub mod count;
pub mod cross_exchange;
pub mod crowd;
pub mod factory;
pub mod http;
pub mod llm;
pub mod price;
pub mod sportsbook;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::{Absence, MarketQuery, SourceKey, SourceOutcome};
use crate::error::Result;

pub use count::{CountFeed, CountSeries, MemoryCountFeed, PostCountAdapter, ViewVelocityAdapter};
pub use cross_exchange::{CrossExchangeAdapter, ExchangeFeed, ExchangeMarket, KalshiFeed};
pub use crowd::{CrowdFeed, CrowdForecast, CrowdForecastAdapter, MetaculusFeed};
pub use factory::{SourceFeeds, SourceSet};
pub use llm::{parse_judgement, ChatClient, GrokClient, GrokConfig, Judgement, LlmReasonerAdapter};
pub use price::{AssetPrior, CoinGeckoFeed, PriceFeed, PriceHistory, PriceTargetAdapter, YahooChartFeed};
pub use sportsbook::{GameEvent, OddsApiConfig, OddsFeed, Sport, SportsbookAdapter, TheOddsApiFeed};

/// Uniform contract every evidence source implements
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn key(&self) -> SourceKey;

    /// Estimate P(YES) for `query`. Must not fail: problems come back as
    /// `SourceOutcome::Absent` with a reason.
    async fn estimate(&self, query: &MarketQuery) -> SourceOutcome;

    /// Estimate under a deadline allotted by the caller. Adapters that race
    /// their own calls use `deadline` in place of their built-in one.
    async fn estimate_within(&self, query: &MarketQuery, _deadline: Duration) -> SourceOutcome {
        self.estimate(query).await
    }
}

/// Run an adapter body under its own deadline, turning errors and timeouts
/// into typed absences and logging the cause.
pub async fn guarded<F>(key: SourceKey, deadline: Duration, body: F) -> SourceOutcome
where
    F: Future<Output = Result<SourceOutcome>>,
{
    match tokio::time::timeout(deadline, body).await {
        Ok(Ok(outcome)) => {
            if let SourceOutcome::Absent(reason) = &outcome {
                debug!(source = %key, %reason, "source absent");
            }
            outcome
        }
        Ok(Err(e)) => {
            warn!(source = %key, error = %e, "source failed");
            SourceOutcome::Absent(Absence::Failed(e.to_string()))
        }
        Err(_) => {
            warn!(source = %key, deadline_ms = deadline.as_millis() as u64, "source timed out");
            SourceOutcome::Absent(Absence::TimedOut)
        }
    }
}
