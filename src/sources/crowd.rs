//! Crowd-forecast platform adapter (Metaculus-style community predictions).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::http::{pick_array, pick_f64, pick_obj, pick_str, send_json};
use super::{guarded, SourceAdapter};
use crate::cache::TtlCache;
use crate::config::default_timeout_ms;
use crate::domain::{ConfidenceTier, MarketQuery, SourceEstimate, SourceKey, SourceOutcome};
use crate::error::Result;
use crate::matching::{best_candidate, search_terms, MatchValidator};

/// Best candidates below this quality are reported as no match
pub const MIN_CROWD_MATCH: f64 = 0.35;
const SEARCH_TERMS: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrowdForecast {
    pub question: String,
    /// Community median P(YES)
    pub community_prob: f64,
    pub forecasters: u32,
    pub url: Option<String>,
}

impl CrowdForecast {
    fn confidence(&self) -> ConfidenceTier {
        match self.forecasters {
            n if n >= 100 => ConfidenceTier::High,
            n if n >= 20 => ConfidenceTier::Medium,
            _ => ConfidenceTier::Low,
        }
    }

    /// Match quality discount for thinly forecast questions
    fn crowd_factor(&self) -> f64 {
        0.5 + 0.5 * (self.forecasters as f64 / 50.0).min(1.0)
    }
}

#[async_trait]
pub trait CrowdFeed: Send + Sync {
    async fn search(&self, terms: &str) -> Result<Vec<CrowdForecast>>;
}

pub struct CrowdForecastAdapter {
    feed: Arc<dyn CrowdFeed>,
    validator: Arc<dyn MatchValidator>,
    cache: TtlCache<String, Vec<CrowdForecast>>,
    deadline: Duration,
}

impl CrowdForecastAdapter {
    pub fn new(
        feed: Arc<dyn CrowdFeed>,
        validator: Arc<dyn MatchValidator>,
        ttl: Duration,
    ) -> Self {
        Self {
            feed,
            validator,
            cache: TtlCache::new("crowd_forecasts", ttl),
            deadline: Duration::from_millis(default_timeout_ms(SourceKey::CrowdForecast)),
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
        let candidates = &cached.value;

        let best = best_candidate(
            self.validator.as_ref(),
            &query.question,
            candidates,
            |c| c.question.as_str(),
        )
        .await?;

        let Some((index, verdict)) = best.filter(|(_, v)| v.quality >= MIN_CROWD_MATCH) else {
            return Ok(SourceOutcome::no_match(format!(
                "{} crowd questions, none close enough",
                candidates.len()
            )));
        };
        let forecast = &candidates[index];

        Ok(
            SourceEstimate::new(SourceKey::CrowdForecast, forecast.community_prob, forecast.confidence())
                .with_match(verdict.quality * forecast.crowd_factor(), verdict.validated)
                .with_detail(format!(
                    "\"{}\": {:.1}% from {} forecasters (match {:.2})",
                    forecast.question,
                    forecast.community_prob * 100.0,
                    forecast.forecasters,
                    verdict.quality
                ))
                .with_cached(cached.from_cache())
                .into(),
        )
    }
}

#[async_trait]
impl SourceAdapter for CrowdForecastAdapter {
    fn key(&self) -> SourceKey {
        SourceKey::CrowdForecast
    }

    async fn estimate(&self, query: &MarketQuery) -> SourceOutcome {
        self.estimate_within(query, self.deadline).await
    }

    async fn estimate_within(&self, query: &MarketQuery, deadline: Duration) -> SourceOutcome {
        guarded(self.key(), deadline, self.run(query)).await
    }
}

const METACULUS_API_BASE: &str = "https://www.metaculus.com/api2";

/// Metaculus question search
#[derive(Clone)]
pub struct MetaculusFeed {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl MetaculusFeed {
    pub fn new(token: Option<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url: METACULUS_API_BASE.to_string(),
            token,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(std::env::var("METACULUS_TOKEN").ok())
    }

    fn community_prob(question: &Value) -> Option<f64> {
        let full = pick_obj(question, &["community_prediction"]).and_then(|c| pick_obj(c, &["full"]));
        full.and_then(|f| pick_f64(f, &["q2"]))
            .or_else(|| {
                pick_obj(question, &["aggregations"])
                    .and_then(|a| pick_obj(a, &["recency_weighted"]))
                    .and_then(|r| pick_obj(r, &["latest"]))
                    .and_then(|l| pick_array(l, &["centers"]))
                    .and_then(|c| c.first())
                    .and_then(|v| v.as_f64())
            })
            .filter(|p| (0.0..=1.0).contains(p))
    }

    fn parse_results(value: &Value) -> Vec<CrowdForecast> {
        pick_array(value, &["results", "data"])
            .unwrap_or_default()
            .iter()
            .filter_map(|q| {
                let question = pick_str(q, &["title", "question"])?.to_string();
                let community_prob = Self::community_prob(q)?;
                let forecasters = pick_f64(q, &["number_of_forecasters", "nr_forecasters"])
                    .unwrap_or(0.0)
                    .max(0.0) as u32;
                let url = pick_str(q, &["page_url", "url"]).map(str::to_string);
                Some(CrowdForecast {
                    question,
                    community_prob,
                    forecasters,
                    url,
                })
            })
            .collect()
    }
}

#[async_trait]
impl CrowdFeed for MetaculusFeed {
    async fn search(&self, terms: &str) -> Result<Vec<CrowdForecast>> {
        let mut request = self
            .client
            .get(format!("{}/questions/", self.base_url))
            .query(&[
                ("search", terms),
                ("status", "open"),
                ("type", "forecast"),
                ("limit", "10"),
            ]);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Token {}", token));
        }
        let value = send_json(request, "metaculus").await?;
        Ok(Self::parse_results(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Absence;
    use crate::matching::TokenOverlapValidator;
    use serde_json::json;

    struct FixedCrowd(Vec<CrowdForecast>);

    #[async_trait]
    impl CrowdFeed for FixedCrowd {
        async fn search(&self, _terms: &str) -> Result<Vec<CrowdForecast>> {
            Ok(self.0.clone())
        }
    }

    fn forecast(question: &str, prob: f64, forecasters: u32) -> CrowdForecast {
        CrowdForecast {
            question: question.to_string(),
            community_prob: prob,
            forecasters,
            url: None,
        }
    }

    fn adapter(forecasts: Vec<CrowdForecast>) -> CrowdForecastAdapter {
        CrowdForecastAdapter::new(
            Arc::new(FixedCrowd(forecasts)),
            Arc::new(TokenOverlapValidator::default()),
            Duration::from_secs(1_800),
        )
    }

    #[tokio::test]
    async fn picks_the_matching_question() {
        let adapter = adapter(vec![
            forecast("Will SpaceX land humans on Mars by 2030?", 0.08, 400),
            forecast("Will the Fed cut rates in March 2026?", 0.62, 150),
        ]);
        let estimate = adapter
            .estimate(&MarketQuery::new("Will the Fed cut rates in March 2026?", "fed"))
            .await
            .estimate()
            .cloned()
            .unwrap();
        assert_eq!(estimate.prob, Some(0.62));
        assert_eq!(estimate.confidence, ConfidenceTier::High);
        assert!(estimate.match_validated);
        assert!(estimate.match_quality.unwrap() > 0.9);
    }

    #[tokio::test]
    async fn thin_crowd_discounts_match_quality() {
        let adapter = adapter(vec![forecast("Will the Fed cut rates in March 2026?", 0.62, 5)]);
        let estimate = adapter
            .estimate(&MarketQuery::new("Will the Fed cut rates in March 2026?", "fed"))
            .await
            .estimate()
            .cloned()
            .unwrap();
        assert_eq!(estimate.confidence, ConfidenceTier::Low);
        assert!(estimate.match_quality.unwrap() < 0.6);
    }

    #[tokio::test]
    async fn poor_candidates_are_no_match() {
        let adapter = adapter(vec![forecast("Who wins the 2026 World Cup?", 0.2, 900)]);
        let outcome = adapter
            .estimate(&MarketQuery::new("Will the Fed cut rates in March?", "fed"))
            .await;
        assert!(matches!(outcome, SourceOutcome::Absent(Absence::NoMatch(_))));
    }

    #[test]
    fn parses_metaculus_results() {
        let value = json!({"results": [
            {"title": "Q1", "community_prediction": {"full": {"q2": 0.4}}, "number_of_forecasters": 77},
            {"title": "Q2", "aggregations": {"recency_weighted": {"latest": {"centers": [0.9]}}}},
            {"title": "no prediction"}
        ]});
        let parsed = MetaculusFeed::parse_results(&value);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].community_prob, 0.4);
        assert_eq!(parsed[0].forecasters, 77);
        assert_eq!(parsed[1].community_prob, 0.9);
        assert_eq!(parsed[1].forecasters, 0);
    }
}
