//! Builds the built-in adapters from `FusionConfig`.
//!
//! Cache TTLs come from `[cache]`, deadlines from the resolved `[sources]`
//! policy, and the CoinGecko lane from `[rate_limit]`. Adapters whose feed is
//! missing are skipped.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::count::{CountFeed, PostCountAdapter, ViewVelocityAdapter};
use super::cross_exchange::{CrossExchangeAdapter, ExchangeFeed, KalshiFeed};
use super::crowd::{CrowdFeed, CrowdForecastAdapter, MetaculusFeed};
use super::llm::{ChatClient, GrokClient, LlmReasonerAdapter};
use super::price::{CoinGeckoFeed, PriceFeed, PriceTargetAdapter, YahooChartFeed};
use super::sportsbook::{OddsFeed, SportsbookAdapter, TheOddsApiFeed};
use super::SourceAdapter;
use crate::cache::RequestLane;
use crate::config::FusionConfig;
use crate::domain::SourceKey;
use crate::error::Result;
use crate::intent::{IntentParser, KeywordIntentParser};
use crate::matching::{CachedMatchValidator, MatchValidator, TokenOverlapValidator};

/// Upstreams the built-in adapters read from
#[derive(Clone)]
pub struct SourceFeeds {
    pub odds: Option<Arc<dyn OddsFeed>>,
    pub crypto_prices: Option<Arc<dyn PriceFeed>>,
    pub equity_prices: Option<Arc<dyn PriceFeed>>,
    pub counts: Option<Arc<dyn CountFeed>>,
    pub crowd: Option<Arc<dyn CrowdFeed>>,
    pub exchange: Option<Arc<dyn ExchangeFeed>>,
    pub chat: Option<Arc<dyn ChatClient>>,
    pub intent: Arc<dyn IntentParser>,
    /// Wrapped in a `CachedMatchValidator` using `cache.match_ttl_secs`
    pub validator: Arc<dyn MatchValidator>,
}

impl Default for SourceFeeds {
    fn default() -> Self {
        Self {
            odds: None,
            crypto_prices: None,
            equity_prices: None,
            counts: None,
            crowd: None,
            exchange: None,
            chat: None,
            intent: Arc::new(KeywordIntentParser),
            validator: Arc::new(TokenOverlapValidator::default()),
        }
    }
}

impl SourceFeeds {
    /// Live HTTP feeds. Odds and LLM need credentials from the environment
    /// and are left unset without them. Must be called inside a tokio runtime.
    pub fn live(config: &FusionConfig) -> Result<Self> {
        let odds: Option<Arc<dyn OddsFeed>> = match TheOddsApiFeed::from_env() {
            Ok(feed) => Some(Arc::new(feed)),
            Err(e) => {
                warn!(error = %e, "sportsbook feed unavailable");
                None
            }
        };

        let grok = GrokClient::from_env()?;
        let chat: Option<Arc<dyn ChatClient>> = if grok.is_configured() {
            Some(Arc::new(grok))
        } else {
            warn!("GROK_API_KEY not set, LLM reasoner disabled");
            None
        };

        let lane = RequestLane::spawn("coingecko", config.rate_limit.lane_config());

        Ok(Self {
            odds,
            crypto_prices: Some(Arc::new(CoinGeckoFeed::new(lane)?)),
            equity_prices: Some(Arc::new(YahooChartFeed::new()?)),
            crowd: Some(Arc::new(MetaculusFeed::from_env()?)),
            exchange: Some(Arc::new(KalshiFeed::from_env()?)),
            chat,
            ..Self::default()
        })
    }
}

/// Adapters built from one config, ready to register with the engine
pub struct SourceSet {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl SourceSet {
    pub fn from_config(config: &FusionConfig, feeds: SourceFeeds) -> Self {
        let cache = &config.cache;
        let deadline = |key: SourceKey| -> Duration { config.sources.resolve(key).timeout };
        let validator: Arc<dyn MatchValidator> =
            Arc::new(CachedMatchValidator::new(feeds.validator, cache.match_ttl()));

        let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();

        if let Some(feed) = feeds.odds {
            adapters.push(Arc::new(
                SportsbookAdapter::new(feed, cache.odds_ttl())
                    .with_deadline(deadline(SourceKey::Sportsbook)),
            ));
        }
        if let Some(feed) = feeds.crypto_prices {
            adapters.push(Arc::new(
                PriceTargetAdapter::crypto(feed, Arc::clone(&feeds.intent), cache.price_ttl())
                    .with_deadline(deadline(SourceKey::CryptoModel)),
            ));
        }
        if let Some(feed) = feeds.equity_prices {
            adapters.push(Arc::new(
                PriceTargetAdapter::equity(feed, Arc::clone(&feeds.intent), cache.price_ttl())
                    .with_deadline(deadline(SourceKey::EquityModel)),
            ));
        }
        if let Some(feed) = feeds.counts {
            adapters.push(Arc::new(
                ViewVelocityAdapter::new(
                    Arc::clone(&feed),
                    Arc::clone(&feeds.intent),
                    cache.forecast_ttl(),
                )
                .with_deadline(deadline(SourceKey::ViewVelocity)),
            ));
            adapters.push(Arc::new(
                PostCountAdapter::new(feed, Arc::clone(&feeds.intent), cache.forecast_ttl())
                    .with_deadline(deadline(SourceKey::PostCount)),
            ));
        }
        if let Some(feed) = feeds.crowd {
            adapters.push(Arc::new(
                CrowdForecastAdapter::new(feed, Arc::clone(&validator), cache.forecast_ttl())
                    .with_deadline(deadline(SourceKey::CrowdForecast)),
            ));
        }
        if let Some(feed) = feeds.exchange {
            adapters.push(Arc::new(
                CrossExchangeAdapter::new(feed, Arc::clone(&validator), cache.odds_ttl())
                    .with_deadline(deadline(SourceKey::CrossExchange)),
            ));
        }
        if let Some(client) = feeds.chat {
            adapters.push(Arc::new(
                LlmReasonerAdapter::new(client, cache.llm_ttl())
                    .with_deadline(deadline(SourceKey::LlmReasoner)),
            ));
        }

        info!(sources = adapters.len(), "built source adapters from config");
        Self { adapters }
    }

    pub fn keys(&self) -> Vec<SourceKey> {
        self.adapters.iter().map(|a| a.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn into_adapters(self) -> Vec<Arc<dyn SourceAdapter>> {
        self.adapters
    }
}
