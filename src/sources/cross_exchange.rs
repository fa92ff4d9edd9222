//! Price of the same question on another prediction exchange (Kalshi).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::http::{from_cents_if_needed, pick_array, pick_f64, pick_str, send_json};
use super::{guarded, SourceAdapter};
use crate::cache::TtlCache;
use crate::config::default_timeout_ms;
use crate::domain::{ConfidenceTier, MarketQuery, SourceEstimate, SourceKey, SourceOutcome};
use crate::error::Result;
use crate::matching::{best_candidate, content_tokens, search_terms, MatchValidator};

const DEFAULT_KALSHI_API_BASE: &str = "https://api.elections.kalshi.com/trade-api/v2";
const MIN_EXCHANGE_MATCH: f64 = 0.4;
const SEARCH_TERMS: usize = 6;
const KALSHI_PAGE_LIMIT: &str = "200";
/// Listing pages walked per search before giving up
const KALSHI_MAX_PAGES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeMarket {
    pub ticker: String,
    pub title: String,
    /// YES price in [0, 1]
    pub yes_price: f64,
    /// Contracts traded
    pub volume: f64,
}

impl ExchangeMarket {
    fn confidence(&self) -> ConfidenceTier {
        if self.volume >= 10_000.0 {
            ConfidenceTier::High
        } else if self.volume >= 1_000.0 {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }

    /// Illiquid prices say less about whether the match is the same event
    fn liquidity_factor(&self) -> f64 {
        0.6 + 0.4 * (self.volume / 10_000.0).clamp(0.0, 1.0)
    }
}

#[async_trait]
pub trait ExchangeFeed: Send + Sync {
    /// Open markets whose titles share words with `terms`
    async fn search(&self, terms: &str) -> Result<Vec<ExchangeMarket>>;
}

pub struct CrossExchangeAdapter {
    feed: Arc<dyn ExchangeFeed>,
    validator: Arc<dyn MatchValidator>,
    cache: TtlCache<String, Vec<ExchangeMarket>>,
    deadline: Duration,
}

impl CrossExchangeAdapter {
    pub fn new(
        feed: Arc<dyn ExchangeFeed>,
        validator: Arc<dyn MatchValidator>,
        ttl: Duration,
    ) -> Self {
        Self {
            feed,
            validator,
            cache: TtlCache::new("exchange_markets", ttl),
            deadline: Duration::from_millis(default_timeout_ms(SourceKey::CrossExchange)),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    async fn run(&self, query: &MarketQuery) -> Result<SourceOutcome> {
        let terms = search_terms(&query.question, SEARCH_TERMS);
        if terms.is_empty() {
            return Ok(SourceOutcome::not_applicable("question has no searchable terms"));
        }

        let feed = Arc::clone(&self.feed);
        let search = terms.clone();
        let cached = self
            .cache
            .get_or_fetch(terms, move || async move { feed.search(&search).await })
            .await?;
        let markets = &cached.value;

        let best = best_candidate(self.validator.as_ref(), &query.question, markets, |m| {
            m.title.as_str()
        })
        .await?;
        let Some((index, verdict)) = best.filter(|(_, v)| v.quality >= MIN_EXCHANGE_MATCH) else {
            return Ok(SourceOutcome::no_match(format!(
                "{} exchange markets, none close enough",
                markets.len()
            )));
        };
        let market = &markets[index];

        Ok(
            SourceEstimate::new(SourceKey::CrossExchange, market.yes_price, market.confidence())
                .with_match(verdict.quality * market.liquidity_factor(), verdict.validated)
                .with_detail(format!(
                    "{} \"{}\" at {:.1}c, volume {:.0} (match {:.2})",
                    market.ticker,
                    market.title,
                    market.yes_price * 100.0,
                    market.volume,
                    verdict.quality
                ))
                .with_cached(cached.from_cache())
                .into(),
        )
    }
}

#[async_trait]
impl SourceAdapter for CrossExchangeAdapter {
    fn key(&self) -> SourceKey {
        SourceKey::CrossExchange
    }

    async fn estimate(&self, query: &MarketQuery) -> SourceOutcome {
        self.estimate_within(query, self.deadline).await
    }

    async fn estimate_within(&self, query: &MarketQuery, deadline: Duration) -> SourceOutcome {
        guarded(self.key(), deadline, self.run(query)).await
    }
}

/// Public Kalshi market listing (no credentials needed for reads)
#[derive(Clone)]
pub struct KalshiFeed {
    http: Client,
    base_url: String,
}

impl KalshiFeed {
    pub fn new(base_url: Option<&str>) -> Result<Self> {
        let base_url = base_url
            .unwrap_or(DEFAULT_KALSHI_API_BASE)
            .trim_end_matches('/')
            .to_string();
        let http = Client::builder()
            .user_agent("polyfuse/0.1")
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, base_url })
    }

    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("KALSHI_API_URL").ok();
        Self::new(base_url.as_deref())
    }

    fn next_cursor(value: &Value) -> Option<String> {
        pick_str(value, &["cursor", "next_cursor"])
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    }

    fn price(value: &Value) -> Option<f64> {
        let cents_field = |keys: &[&str]| {
            pick_f64(value, keys)
                .map(from_cents_if_needed)
                .filter(|p| *p > 0.0 && *p < 1.0)
        };
        cents_field(&["last_price", "last_price_dollars"]).or_else(|| {
            match (cents_field(&["yes_bid"]), cents_field(&["yes_ask"])) {
                (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
                (bid, ask) => bid.or(ask),
            }
        })
    }

    fn map_market(value: &Value) -> Option<ExchangeMarket> {
        let ticker = pick_str(value, &["ticker", "market_ticker", "id"])?.to_string();
        let title = pick_str(value, &["title", "question", "market_title"])?.to_string();
        let yes_price = Self::price(value)?;
        let volume = pick_f64(value, &["volume", "volume_24h"]).unwrap_or(0.0).max(0.0);
        Some(ExchangeMarket {
            ticker,
            title,
            yes_price,
            volume,
        })
    }

    /// Markets sharing at least two content words with the search terms
    fn filter_markets(value: &Value, terms: &str) -> Vec<ExchangeMarket> {
        let wanted: HashSet<String> = content_tokens(terms).into_iter().collect();
        let needed = wanted.len().min(2);
        pick_array(value, &["markets", "data", "results"])
            .unwrap_or_default()
            .iter()
            .filter_map(Self::map_market)
            .filter(|m| {
                content_tokens(&m.title)
                    .into_iter()
                    .collect::<HashSet<_>>()
                    .intersection(&wanted)
                    .count()
                    >= needed
            })
            .collect()
    }
}

#[async_trait]
impl ExchangeFeed for KalshiFeed {
    /// Walks the open-market listing page by page until the cursor runs out
    async fn search(&self, terms: &str) -> Result<Vec<ExchangeMarket>> {
        let mut found = Vec::new();
        let mut cursor: Option<String> = None;

        for page in 0..KALSHI_MAX_PAGES {
            let mut request = self
                .http
                .get(format!("{}/markets", self.base_url))
                .query(&[("status", "open"), ("limit", KALSHI_PAGE_LIMIT)]);
            if let Some(cursor) = &cursor {
                request = request.query(&[("cursor", cursor.as_str())]);
            }
            let value = send_json(request, "kalshi").await?;
            found.extend(Self::filter_markets(&value, terms));

            let listed = pick_array(&value, &["markets", "data", "results"])
                .map(|m| m.len())
                .unwrap_or(0);
            match Self::next_cursor(&value) {
                Some(next) if listed > 0 && cursor.as_deref() != Some(next.as_str()) => {
                    cursor = Some(next)
                }
                _ => {
                    debug!(pages = page + 1, matches = found.len(), "kalshi listing done");
                    return Ok(found);
                }
            }
        }

        warn!(
            pages = KALSHI_MAX_PAGES,
            matches = found.len(),
            "kalshi listing truncated at page limit"
        );
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Absence;
    use crate::error::FuseError;
    use crate::matching::{MatchVerdict, MockMatchValidator, TokenOverlapValidator};
    use serde_json::json;

    struct FixedMarkets(Vec<ExchangeMarket>);

    #[async_trait]
    impl ExchangeFeed for FixedMarkets {
        async fn search(&self, _terms: &str) -> Result<Vec<ExchangeMarket>> {
            Ok(self.0.clone())
        }
    }

    fn market(title: &str, yes_price: f64, volume: f64) -> ExchangeMarket {
        ExchangeMarket {
            ticker: "KXTEST-26".to_string(),
            title: title.to_string(),
            yes_price,
            volume,
        }
    }

    #[tokio::test]
    async fn liquid_validated_match_is_high_confidence() {
        let adapter = CrossExchangeAdapter::new(
            Arc::new(FixedMarkets(vec![market(
                "Will the Fed cut rates in March 2026?",
                0.58,
                25_000.0,
            )])),
            Arc::new(TokenOverlapValidator::default()),
            Duration::from_secs(300),
        );
        let outcome = adapter
            .estimate(&MarketQuery::new("Will the Fed cut rates in March 2026?", "fed"))
            .await;
        let estimate = outcome.estimate().unwrap();
        assert_eq!(estimate.prob, Some(0.58));
        assert_eq!(estimate.confidence, ConfidenceTier::High);
        assert!(estimate.match_validated);
    }

    #[tokio::test]
    async fn validator_rejection_is_no_match() {
        let mut validator = MockMatchValidator::new();
        validator.expect_validate().returning(|_, _| {
            Ok(MatchVerdict {
                quality: 0.1,
                validated: false,
            })
        });
        let adapter = CrossExchangeAdapter::new(
            Arc::new(FixedMarkets(vec![market("Fed decision", 0.5, 500.0)])),
            Arc::new(validator),
            Duration::from_secs(300),
        );
        let outcome = adapter
            .estimate(&MarketQuery::new("Will the Fed cut rates?", "fed"))
            .await;
        assert!(matches!(outcome, SourceOutcome::Absent(Absence::NoMatch(_))));
    }

    #[tokio::test]
    async fn validator_errors_become_failures() {
        let mut validator = MockMatchValidator::new();
        validator
            .expect_validate()
            .returning(|_, _| Err(FuseError::RateLimited("validator".into())));
        let adapter = CrossExchangeAdapter::new(
            Arc::new(FixedMarkets(vec![market("Fed decision", 0.5, 500.0)])),
            Arc::new(validator),
            Duration::from_secs(300),
        );
        let outcome = adapter
            .estimate(&MarketQuery::new("Will the Fed cut rates?", "fed"))
            .await;
        assert!(matches!(outcome, SourceOutcome::Absent(Absence::Failed(_))));
    }

    #[test]
    fn kalshi_prices_normalise_cents() {
        let value = json!({"markets": [
            {"ticker": "A", "title": "Fed cuts rates in March", "last_price": 62, "volume": 1200},
            {"ticker": "B", "title": "Fed cuts rates in June", "yes_bid": 40, "yes_ask": 44},
            {"ticker": "C", "title": "Lakers win title", "last_price": 30},
            {"ticker": "D", "title": "Fed rates unpriced"}
        ]});
        let markets = KalshiFeed::filter_markets(&value, "fed cut rates");
        assert_eq!(markets.len(), 2);
        assert!((markets[0].yes_price - 0.62).abs() < 1e-9);
        assert_eq!(markets[0].volume, 1200.0);
        assert!((markets[1].yes_price - 0.42).abs() < 1e-9);
    }

    #[test]
    fn listing_cursor_ends_on_empty_string() {
        assert_eq!(
            KalshiFeed::next_cursor(&json!({"markets": [], "cursor": "CgwI9"})),
            Some("CgwI9".to_string())
        );
        assert_eq!(KalshiFeed::next_cursor(&json!({"markets": [], "cursor": ""})), None);
        assert_eq!(KalshiFeed::next_cursor(&json!({"markets": []})), None);
    }
}
