//! Price-target adapters ("Will BTC reach $110k by March?").
//!
//! One implementation serves both asset classes; crypto and equity differ only
//! in their drift/volatility priors, the feed they read, and their key.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::http::{as_f64ish, pick_array, pick_obj, pick_f64, send_json};
use super::{guarded, SourceAdapter};
use crate::cache::{RequestLane, TtlCache};
use crate::config::default_timeout_ms;
use crate::domain::{ConfidenceTier, MarketQuery, SourceEstimate, SourceKey, SourceOutcome};
use crate::error::{FuseError, Result};
use crate::intent::{AssetClass, IntentParser};
use crate::models::{price_target_probability, LogReturnStats, PriceDirection, PriceTargetInput};

/// Daily drift / volatility used when history is too short to trust
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssetPrior {
    pub daily_drift: f64,
    pub daily_volatility: f64,
}

impl AssetPrior {
    pub fn for_class(class: AssetClass) -> Self {
        match class {
            AssetClass::Crypto => Self {
                daily_drift: 0.0,
                daily_volatility: 0.035,
            },
            AssetClass::Equity => Self {
                daily_drift: 0.0003,
                daily_volatility: 0.012,
            },
        }
    }
}

/// History samples (daily log returns) needed before trusting observed stats
const MIN_OBSERVED_RETURNS: usize = 10;
const HIGH_CONFIDENCE_RETURNS: usize = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct PriceHistory {
    pub spot: f64,
    /// Daily closes, oldest first
    pub daily_closes: Vec<f64>,
}

#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn history(&self, symbol: &str) -> Result<PriceHistory>;
}

pub struct PriceTargetAdapter {
    key: SourceKey,
    asset_class: AssetClass,
    feed: Arc<dyn PriceFeed>,
    intent: Arc<dyn IntentParser>,
    cache: TtlCache<String, PriceHistory>,
    deadline: Duration,
}

impl PriceTargetAdapter {
    pub fn crypto(feed: Arc<dyn PriceFeed>, intent: Arc<dyn IntentParser>, ttl: Duration) -> Self {
        Self::new(SourceKey::CryptoModel, AssetClass::Crypto, feed, intent, ttl)
    }

    pub fn equity(feed: Arc<dyn PriceFeed>, intent: Arc<dyn IntentParser>, ttl: Duration) -> Self {
        Self::new(SourceKey::EquityModel, AssetClass::Equity, feed, intent, ttl)
    }

    fn new(
        key: SourceKey,
        asset_class: AssetClass,
        feed: Arc<dyn PriceFeed>,
        intent: Arc<dyn IntentParser>,
        ttl: Duration,
    ) -> Self {
        let cache_name = match asset_class {
            AssetClass::Crypto => "crypto_history",
            AssetClass::Equity => "equity_history",
        };
        Self {
            key,
            asset_class,
            feed,
            intent,
            cache: TtlCache::new(cache_name, ttl),
            deadline: Duration::from_millis(default_timeout_ms(key)),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    async fn run(&self, query: &MarketQuery) -> Result<SourceOutcome> {
        let Some(target) = self.intent.price_target(query) else {
            return Ok(SourceOutcome::not_applicable("no price target in question"));
        };
        if target.asset_class != self.asset_class {
            return Ok(SourceOutcome::not_applicable(format!(
                "{} is not a {} symbol",
                target.symbol,
                self.asset_class.as_str()
            )));
        }
        let Some(days) = query.days_remaining() else {
            return Ok(SourceOutcome::not_applicable("market has no deadline"));
        };

        let feed = Arc::clone(&self.feed);
        let symbol = target.symbol.clone();
        let cached = self
            .cache
            .get_or_fetch(symbol.clone(), move || async move { feed.history(&symbol).await })
            .await?;
        let history = &cached.value;

        let prior = AssetPrior::for_class(self.asset_class);
        let observed = LogReturnStats::from_closes(&history.daily_closes)
            .filter(|s| s.samples >= MIN_OBSERVED_RETURNS && s.stddev > 0.0);
        let (drift, volatility, confidence, basis) = match observed {
            Some(s) if s.samples >= HIGH_CONFIDENCE_RETURNS => {
                (s.mean, s.stddev, ConfidenceTier::High, s.samples)
            }
            Some(s) => (s.mean, s.stddev, ConfidenceTier::Medium, s.samples),
            None => (
                prior.daily_drift,
                prior.daily_volatility,
                ConfidenceTier::Low,
                0,
            ),
        };

        let recent_return = history
            .daily_closes
            .last()
            .filter(|c| **c > 0.0)
            .map(|close| (history.spot / close).ln());

        let input = PriceTargetInput {
            spot: history.spot,
            target: target.target,
            direction: target.direction,
            horizon: days.max(0.0),
            drift,
            volatility,
            recent_return,
        };
        let output = price_target_probability(&input).ok_or_else(|| {
            FuseError::InvalidData(format!(
                "non-positive price for {}: spot {}, target {}",
                target.symbol, history.spot, target.target
            ))
        })?;

        debug!(
            symbol = %target.symbol,
            spot = history.spot,
            target = target.target,
            days,
            prob = output.prob,
            "price target model"
        );

        let side = match target.direction {
            PriceDirection::Above => "above",
            PriceDirection::Below => "below",
        };
        let basis = if basis > 0 {
            format!("{} daily returns", basis)
        } else {
            "asset-class prior".to_string()
        };
        Ok(SourceEstimate::new(self.key, output.prob, confidence)
            .with_detail(format!(
                "{} {} {} in {:.1}d from {:.2}: {:.1}% (vol {:.2}%/d, {})",
                target.symbol,
                side,
                target.target,
                days.max(0.0),
                history.spot,
                output.prob * 100.0,
                volatility * 100.0,
                basis
            ))
            .with_cached(cached.from_cache())
            .into())
    }
}

#[async_trait]
impl SourceAdapter for PriceTargetAdapter {
    fn key(&self) -> SourceKey {
        self.key
    }

    async fn estimate(&self, query: &MarketQuery) -> SourceOutcome {
        self.estimate_within(query, self.deadline).await
    }

    async fn estimate_within(&self, query: &MarketQuery, deadline: Duration) -> SourceOutcome {
        guarded(self.key, deadline, self.run(query)).await
    }
}

const COINGECKO_API_BASE: &str = "https://api.coingecko.com/api/v3";

fn coingecko_id(symbol: &str) -> Option<&'static str> {
    match symbol {
        "BTC" => Some("bitcoin"),
        "ETH" => Some("ethereum"),
        "SOL" => Some("solana"),
        "XRP" => Some("ripple"),
        "DOGE" => Some("dogecoin"),
        "ADA" => Some("cardano"),
        _ => None,
    }
}

/// CoinGecko daily market chart. The free tier allows ~30 calls/minute, so
/// every request goes through the shared lane.
#[derive(Clone)]
pub struct CoinGeckoFeed {
    client: Client,
    base_url: String,
    lane: RequestLane,
    days: u32,
}

impl CoinGeckoFeed {
    pub fn new(lane: RequestLane) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(5)).build()?;
        Ok(Self {
            client,
            base_url: COINGECKO_API_BASE.to_string(),
            lane,
            days: 60,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn parse_chart(value: &Value) -> Result<PriceHistory> {
        let prices: Vec<f64> = pick_array(value, &["prices"])
            .unwrap_or_default()
            .iter()
            .filter_map(|pair| pair.as_array().and_then(|p| p.get(1)).and_then(as_f64ish))
            .collect();
        let spot = *prices
            .last()
            .ok_or_else(|| FuseError::InvalidData("coingecko chart has no prices".into()))?;
        Ok(PriceHistory {
            spot,
            daily_closes: prices[..prices.len() - 1].to_vec(),
        })
    }
}

#[async_trait]
impl PriceFeed for CoinGeckoFeed {
    async fn history(&self, symbol: &str) -> Result<PriceHistory> {
        let id = coingecko_id(symbol)
            .ok_or_else(|| FuseError::InvalidData(format!("no coingecko id for {}", symbol)))?;
        let url = format!("{}/coins/{}/market_chart", self.base_url, id);
        let client = self.client.clone();
        let days = self.days.to_string();

        let value = self
            .lane
            .submit(move || {
                let request = client.get(&url).query(&[
                    ("vs_currency", "usd"),
                    ("days", days.as_str()),
                    ("interval", "daily"),
                ]);
                async move { send_json(request, "coingecko").await }
            })
            .await?;
        Self::parse_chart(&value)
    }
}

const YAHOO_CHART_BASE: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

fn yahoo_symbol(symbol: &str) -> String {
    match symbol {
        "SPX" => "^GSPC".to_string(),
        "NDX" => "^NDX".to_string(),
        other => other.to_string(),
    }
}

/// Yahoo Finance daily chart for equities and indices
#[derive(Clone)]
pub struct YahooChartFeed {
    client: Client,
    base_url: String,
}

impl YahooChartFeed {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .user_agent("Mozilla/5.0 (compatible; polyfuse)")
            .build()?;
        Ok(Self {
            client,
            base_url: YAHOO_CHART_BASE.to_string(),
        })
    }

    fn parse_chart(value: &Value) -> Result<PriceHistory> {
        let result = pick_obj(value, &["chart"])
            .and_then(|c| pick_array(c, &["result"]))
            .and_then(|r| r.first())
            .ok_or_else(|| FuseError::InvalidData("yahoo chart has no result".into()))?;

        let closes: Vec<f64> = pick_obj(result, &["indicators"])
            .and_then(|i| pick_array(i, &["quote"]))
            .and_then(|q| q.first())
            .and_then(|q| pick_array(q, &["close"]))
            .unwrap_or_default()
            .iter()
            .filter_map(as_f64ish)
            .collect();

        let spot = pick_obj(result, &["meta"])
            .and_then(|m| pick_f64(m, &["regularMarketPrice", "previousClose"]))
            .or_else(|| closes.last().copied())
            .ok_or_else(|| FuseError::InvalidData("yahoo chart has no price".into()))?;

        Ok(PriceHistory {
            spot,
            daily_closes: closes,
        })
    }
}

#[async_trait]
impl PriceFeed for YahooChartFeed {
    async fn history(&self, symbol: &str) -> Result<PriceHistory> {
        let url = format!("{}/{}", self.base_url, yahoo_symbol(symbol));
        let request = self
            .client
            .get(&url)
            .query(&[("range", "3mo"), ("interval", "1d")]);
        let value = send_json(request, "yahoo").await?;
        Self::parse_chart(&value)
    }
}
