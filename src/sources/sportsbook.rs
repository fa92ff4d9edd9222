//! Sportsbook consensus from The Odds API.
//!
//! Moneyline prices from every returned bookmaker are de-vigged and averaged.
//! More books means a better-corroborated number: match quality and
//! confidence both scale with the count.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{guarded, SourceAdapter};
use crate::cache::TtlCache;
use crate::config::default_timeout_ms;
use crate::domain::{ConfidenceTier, MarketQuery, SourceEstimate, SourceKey, SourceOutcome};
use crate::error::{FuseError, Result};
use crate::matching::content_tokens;

const THE_ODDS_API_BASE: &str = "https://api.the-odds-api.com/v4";

/// Supported sports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sport {
    #[serde(rename = "basketball_nba")]
    NBA,
    #[serde(rename = "americanfootball_nfl")]
    NFL,
    #[serde(rename = "icehockey_nhl")]
    NHL,
    #[serde(rename = "baseball_mlb")]
    MLB,
    #[serde(rename = "basketball_ncaab")]
    NCAAB,
    #[serde(rename = "americanfootball_ncaaf")]
    NCAAF,
}

impl Sport {
    /// Searched in order when the question names no league
    pub const MAJOR: [Sport; 4] = [Sport::NBA, Sport::NFL, Sport::NHL, Sport::MLB];

    pub fn api_key(&self) -> &'static str {
        match self {
            Sport::NBA => "basketball_nba",
            Sport::NFL => "americanfootball_nfl",
            Sport::NHL => "icehockey_nhl",
            Sport::MLB => "baseball_mlb",
            Sport::NCAAB => "basketball_ncaab",
            Sport::NCAAF => "americanfootball_ncaaf",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Sport::NBA => "NBA",
            Sport::NFL => "NFL",
            Sport::NHL => "NHL",
            Sport::MLB => "MLB",
            Sport::NCAAB => "College Basketball",
            Sport::NCAAF => "College Football",
        }
    }

    /// League named in the question text or category
    pub fn detect(query: &MarketQuery) -> Option<Sport> {
        let text = format!(
            "{} {}",
            query.question_lower(),
            query.category.as_deref().unwrap_or("").to_lowercase()
        );
        let tokens = content_tokens(&text);
        let has = |w: &str| tokens.iter().any(|t| t == w);

        if has("ncaab") || (has("college") && has("basketball")) {
            Some(Sport::NCAAB)
        } else if has("ncaaf") || (has("college") && has("football")) {
            Some(Sport::NCAAF)
        } else if has("nba") || has("basketball") {
            Some(Sport::NBA)
        } else if has("nfl") || has("football") || has("super") && has("bowl") {
            Some(Sport::NFL)
        } else if has("nhl") || has("hockey") || has("stanley") {
            Some(Sport::NHL)
        } else if has("mlb") || has("baseball") {
            Some(Sport::MLB)
        } else {
            None
        }
    }
}

/// Odds from a single outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub name: String,
    /// American odds
    pub price: f64,
    #[serde(default)]
    pub point: Option<f64>,
}

impl Outcome {
    /// Convert American odds to decimal odds
    pub fn decimal_odds(&self) -> Option<f64> {
        let price = self.price;
        if !price.is_finite() || price.abs() < 100.0 {
            None
        } else if price > 0.0 {
            Some(price / 100.0 + 1.0)
        } else {
            Some(100.0 / price.abs() + 1.0)
        }
    }

    /// Implied probability, vig included
    pub fn implied_probability(&self) -> Option<f64> {
        self.decimal_odds().map(|d| 1.0 / d)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmakerOdds {
    pub key: String,
    pub title: String,
    pub markets: Vec<MarketOdds>,
}

impl BookmakerOdds {
    /// De-vigged moneyline probability for `team`
    pub fn fair_moneyline(&self, team: &str) -> Option<f64> {
        let market = self.markets.iter().find(|m| m.key == "h2h")?;
        if market.outcomes.len() < 2 {
            return None;
        }
        let implied: Vec<(&str, f64)> = market
            .outcomes
            .iter()
            .map(|o| o.implied_probability().map(|p| (o.name.as_str(), p)))
            .collect::<Option<Vec<_>>>()?;
        let overround: f64 = implied.iter().map(|(_, p)| p).sum();
        let (_, team_p) = implied.iter().find(|(name, _)| *name == team)?;
        (overround > 0.0).then(|| team_p / overround)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketOdds {
    pub key: String,
    pub outcomes: Vec<Outcome>,
}

/// Game event with odds from multiple bookmakers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEvent {
    pub id: String,
    pub sport_key: String,
    #[serde(default)]
    pub sport_title: String,
    pub commence_time: String,
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub bookmakers: Vec<BookmakerOdds>,
}

impl GameEvent {
    /// Mean de-vigged probability for `team` and the number of books used
    pub fn consensus_for(&self, team: &str) -> Option<(f64, usize)> {
        let probs: Vec<f64> = self
            .bookmakers
            .iter()
            .filter_map(|b| b.fair_moneyline(team))
            .collect();
        if probs.is_empty() {
            return None;
        }
        Some((probs.iter().sum::<f64>() / probs.len() as f64, probs.len()))
    }
}

#[async_trait]
pub trait OddsFeed: Send + Sync {
    async fn events(&self, sport: Sport) -> Result<Vec<GameEvent>>;
}

#[derive(Debug, Clone)]
pub struct OddsApiConfig {
    pub api_key: String,
    pub bookmakers: Vec<String>,
    pub region: String,
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for OddsApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            bookmakers: vec![
                "draftkings".to_string(),
                "fanduel".to_string(),
                "betmgm".to_string(),
                "williamhill_us".to_string(),
                "bovada".to_string(),
            ],
            region: "us".to_string(),
            base_url: THE_ODDS_API_BASE.to_string(),
            request_timeout: Duration::from_secs(6),
        }
    }
}

/// The Odds API client for fetching moneyline odds
pub struct TheOddsApiFeed {
    client: Client,
    config: OddsApiConfig,
}

impl TheOddsApiFeed {
    pub fn new(config: OddsApiConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(FuseError::InvalidConfig(
                "THE_ODDS_API_KEY not configured".into(),
            ));
        }
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    /// Create from environment
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("THE_ODDS_API_KEY")
            .map_err(|_| FuseError::InvalidConfig("THE_ODDS_API_KEY not set".into()))?;

        let mut config = OddsApiConfig {
            api_key,
            ..OddsApiConfig::default()
        };
        if let Ok(books) = std::env::var("ODDS_BOOKMAKERS") {
            config.bookmakers = books.split(',').map(|s| s.trim().to_string()).collect();
        }

        Self::new(config)
    }
}

#[async_trait]
impl OddsFeed for TheOddsApiFeed {
    async fn events(&self, sport: Sport) -> Result<Vec<GameEvent>> {
        let bookmakers = self.config.bookmakers.join(",");
        let url = format!("{}/sports/{}/odds", self.config.base_url, sport.api_key());

        debug!("Fetching odds from: {}", url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("apiKey", self.config.api_key.as_str()),
                ("regions", self.config.region.as_str()),
                ("markets", "h2h"),
                ("bookmakers", &bookmakers),
                ("oddsFormat", "american"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(FuseError::RateLimited("the-odds-api".into()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FuseError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        let events: Vec<GameEvent> = response.json().await?;
        info!(
            "Fetched {} {} games with odds",
            events.len(),
            sport.display_name()
        );
        Ok(events)
    }
}

/// How well a team name is present in the question: full name beats nickname
fn team_presence(question: &str, tokens: &[String], team: &str) -> Option<(f64, usize)> {
    let team_lower = team.to_lowercase();
    if let Some(pos) = question.find(&team_lower) {
        return Some((1.0, pos));
    }
    let nickname = team_lower.split_whitespace().last()?;
    if tokens.iter().any(|t| t == nickname) {
        return question.find(nickname).map(|pos| (0.85, pos));
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
struct EventMatch {
    event_index: usize,
    yes_team: String,
    name_score: f64,
}

/// Best event for the question; the YES side is the team named first
fn match_event(query: &MarketQuery, events: &[GameEvent]) -> Option<EventMatch> {
    let question = query.question_lower();
    let tokens = content_tokens(&question);

    events
        .iter()
        .enumerate()
        .filter_map(|(i, event)| {
            let home = team_presence(&question, &tokens, &event.home_team);
            let away = team_presence(&question, &tokens, &event.away_team);
            let (yes_team, name_score) = match (home, away) {
                (Some((h, hp)), Some((a, ap))) => {
                    let team = if hp <= ap {
                        &event.home_team
                    } else {
                        &event.away_team
                    };
                    (team.clone(), (h + a) / 2.0)
                }
                // One side named: plausible, but another fixture could share the team
                (Some((h, _)), None) => (event.home_team.clone(), h * 0.6),
                (None, Some((a, _))) => (event.away_team.clone(), a * 0.6),
                (None, None) => return None,
            };
            Some(EventMatch {
                event_index: i,
                yes_team,
                name_score,
            })
        })
        .max_by(|a, b| a.name_score.total_cmp(&b.name_score))
}

pub struct SportsbookAdapter {
    feed: Arc<dyn OddsFeed>,
    cache: TtlCache<Sport, Vec<GameEvent>>,
    deadline: Duration,
}

impl SportsbookAdapter {
    pub fn new(feed: Arc<dyn OddsFeed>, ttl: Duration) -> Self {
        Self {
            feed,
            cache: TtlCache::new("sportsbook_odds", ttl),
            deadline: Duration::from_millis(default_timeout_ms(SourceKey::Sportsbook)),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    async fn events(&self, sport: Sport) -> Result<(Vec<GameEvent>, bool)> {
        let feed = Arc::clone(&self.feed);
        let cached = self
            .cache
            .get_or_fetch(sport, move || async move { feed.events(sport).await })
            .await?;
        let from_cache = cached.from_cache();
        Ok((cached.value, from_cache))
    }

    async fn run(&self, query: &MarketQuery) -> Result<SourceOutcome> {
        let sports: Vec<Sport> = match Sport::detect(query) {
            Some(sport) => vec![sport],
            None => Sport::MAJOR.to_vec(),
        };

        let searching = sports.len() > 1;
        let mut best: Option<(EventMatch, Vec<GameEvent>, bool)> = None;
        for sport in sports {
            let (events, from_cache) = match self.events(sport).await {
                Ok(found) => found,
                // A broad search tolerates one league being unavailable
                Err(e) if searching => {
                    debug!(sport = sport.api_key(), error = %e, "skipping league");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if let Some(m) = match_event(query, &events) {
                let better = best
                    .as_ref()
                    .map(|(b, _, _)| m.name_score > b.name_score)
                    .unwrap_or(true);
                if better {
                    best = Some((m, events, from_cache));
                }
            }
        }

        let Some((matched, events, from_cache)) = best else {
            return Ok(SourceOutcome::no_match("no fixture names a team in the question"));
        };
        let event = &events[matched.event_index];

        let Some((prob, books)) = event.consensus_for(&matched.yes_team) else {
            return Ok(SourceOutcome::no_match(format!(
                "{} vs {} has no moneyline prices",
                event.home_team, event.away_team
            )));
        };

        let confidence = match books {
            n if n >= 4 => ConfidenceTier::High,
            n if n >= 2 => ConfidenceTier::Medium,
            _ => ConfidenceTier::Low,
        };
        let book_factor = (0.55 + 0.15 * books as f64).min(1.0);
        let match_quality = matched.name_score * book_factor;

        Ok(SourceEstimate::new(SourceKey::Sportsbook, prob, confidence)
            .with_match(match_quality, matched.name_score >= 0.85)
            .with_detail(format!(
                "{} {:.1}% across {} books ({} vs {})",
                matched.yes_team,
                prob * 100.0,
                books,
                event.away_team,
                event.home_team
            ))
            .with_cached(from_cache)
            .into())
    }
}

#[async_trait]
impl SourceAdapter for SportsbookAdapter {
    fn key(&self) -> SourceKey {
        SourceKey::Sportsbook
    }

    async fn estimate(&self, query: &MarketQuery) -> SourceOutcome {
        self.estimate_within(query, self.deadline).await
    }

    async fn estimate_within(&self, query: &MarketQuery, deadline: Duration) -> SourceOutcome {
        guarded(self.key(), deadline, self.run(query)).await
    }
}
