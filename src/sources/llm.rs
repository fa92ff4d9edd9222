//! LLM reasoner: a chat model asked for a calibrated probability.
//!
//! This is the only soft source. Its output has no external ground truth, so
//! the adapter never reports more than MEDIUM confidence whatever the model
//! claims.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::http::send_json;
use super::{guarded, SourceAdapter};
use crate::cache::TtlCache;
use crate::config::default_timeout_ms;
use crate::domain::{ConfidenceTier, MarketQuery, SourceEstimate, SourceKey, SourceOutcome};
use crate::error::{FuseError, Result};

const SYSTEM_PROMPT: &str = "You are a calibrated forecaster. Estimate the probability that a \
prediction market question resolves YES. Do not anchor on the market price. Answer with exactly \
two lines:\nPROBABILITY: <number between 0 and 1>\nCONFIDENCE: <HIGH|MEDIUM|LOW>";

/// Minimal chat-completion surface the reasoner needs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Grok API client configuration
#[derive(Debug, Clone)]
pub struct GrokConfig {
    pub api_key: String,
    pub base_url: String,
    /// Request timeout
    pub timeout_secs: u64,
    pub model: String,
}

impl Default for GrokConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.x.ai/v1".to_string(),
            timeout_secs: 30,
            model: "grok-4-1-fast-reasoning".to_string(),
        }
    }
}

impl GrokConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: std::env::var("GROK_API_KEY").unwrap_or_default(),
            base_url: std::env::var("GROK_API_URL").unwrap_or(defaults.base_url),
            timeout_secs: defaults.timeout_secs,
            model: std::env::var("GROK_MODEL").unwrap_or(defaults.model),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Grok chat-completions client
pub struct GrokClient {
    config: GrokConfig,
    http: Client,
}

impl GrokClient {
    pub fn new(config: GrokConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, http })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(GrokConfig::from_env())
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }
}

#[async_trait]
impl ChatClient for GrokClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        if !self.is_configured() {
            return Err(FuseError::InvalidConfig(
                "Grok API key not configured".to_string(),
            ));
        }

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: Some(0.2),
            max_tokens: Some(200),
        };

        let builder = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request);
        let value = send_json(builder, "grok").await?;
        let response: ChatResponse = serde_json::from_value(value)?;

        let content = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        debug!(chars = content.len(), "grok response received");
        Ok(content)
    }
}

/// Probability and self-reported confidence pulled from a model reply
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Judgement {
    pub prob: f64,
    pub confidence: ConfidenceTier,
}

fn labelled<'a>(reply: &'a str, label: &str) -> Option<&'a str> {
    reply.lines().find_map(|line| {
        let line = line.trim().trim_start_matches(['*', '-', ' ']);
        let (head, rest) = line.split_once(':')?;
        head.trim()
            .eq_ignore_ascii_case(label)
            .then(|| rest.trim().trim_matches('*').trim())
    })
}

/// Parse `PROBABILITY:` and `CONFIDENCE:` lines. Percentages are accepted.
/// Returns `None` when the reply carries no usable probability.
pub fn parse_judgement(reply: &str) -> Option<Judgement> {
    let raw = labelled(reply, "probability")?;
    let number: String = raw
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let mut prob: f64 = number.parse().ok()?;
    if raw[number.len()..].trim_start().starts_with('%') || prob > 1.0 {
        prob /= 100.0;
    }
    if !(0.0..=1.0).contains(&prob) {
        return None;
    }

    let confidence = match labelled(reply, "confidence").map(str::to_ascii_uppercase) {
        Some(c) if c.starts_with("HIGH") => ConfidenceTier::High,
        Some(c) if c.starts_with("MEDIUM") => ConfidenceTier::Medium,
        _ => ConfidenceTier::Low,
    };
    Some(Judgement { prob, confidence })
}

pub struct LlmReasonerAdapter {
    client: Arc<dyn ChatClient>,
    cache: TtlCache<String, String>,
    deadline: Duration,
}

impl LlmReasonerAdapter {
    pub fn new(client: Arc<dyn ChatClient>, ttl: Duration) -> Self {
        Self {
            client,
            cache: TtlCache::new("llm_replies", ttl),
            deadline: Duration::from_millis(default_timeout_ms(SourceKey::LlmReasoner)),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    fn prompt(query: &MarketQuery) -> String {
        let mut prompt = format!("Question: {}", query.question);
        if let Some(end) = query.end_date {
            prompt.push_str(&format!("\nResolves by: {}", end.format("%Y-%m-%d")));
        }
        if let Some(category) = &query.category {
            prompt.push_str(&format!("\nCategory: {}", category));
        }
        prompt
    }

    async fn run(&self, query: &MarketQuery) -> Result<SourceOutcome> {
        let client = Arc::clone(&self.client);
        let prompt = Self::prompt(query);
        let cached = self
            .cache
            .get_or_fetch(query.question.clone(), move || async move {
                client.complete(SYSTEM_PROMPT, &prompt).await
            })
            .await?;

        let Some(judgement) = parse_judgement(&cached.value) else {
            return Err(FuseError::InvalidData(
                "model reply had no PROBABILITY line".to_string(),
            ));
        };
        let confidence = judgement.confidence.min(ConfidenceTier::Medium);

        Ok(SourceEstimate::new(SourceKey::LlmReasoner, judgement.prob, confidence)
            .with_detail(format!(
                "model says {:.1}% ({} reported, {} used)",
                judgement.prob * 100.0,
                judgement.confidence,
                confidence
            ))
            .with_cached(cached.from_cache())
            .into())
    }
}

#[async_trait]
impl SourceAdapter for LlmReasonerAdapter {
    fn key(&self) -> SourceKey {
        SourceKey::LlmReasoner
    }

    async fn estimate(&self, query: &MarketQuery) -> SourceOutcome {
        self.estimate_within(query, self.deadline).await
    }

    async fn estimate_within(&self, query: &MarketQuery, deadline: Duration) -> SourceOutcome {
        guarded(self.key(), deadline, self.run(query)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Absence;

    #[test]
    fn parses_plain_and_percent_replies() {
        let j = parse_judgement("PROBABILITY: 0.72\nCONFIDENCE: MEDIUM").unwrap();
        assert_eq!(j.prob, 0.72);
        assert_eq!(j.confidence, ConfidenceTier::Medium);

        let j = parse_judgement("Some reasoning first.\n**Probability:** 35%\nConfidence: high").unwrap();
        assert!((j.prob - 0.35).abs() < 1e-9);
        assert_eq!(j.confidence, ConfidenceTier::High);

        let j = parse_judgement("probability: 0.1").unwrap();
        assert_eq!(j.confidence, ConfidenceTier::Low);
    }

    #[test]
    fn rejects_replies_without_probability() {
        assert!(parse_judgement("I cannot say.").is_none());
        assert!(parse_judgement("PROBABILITY: unknown").is_none());
        assert!(parse_judgement("PROBABILITY: 250").is_none());
    }

    #[tokio::test]
    async fn high_confidence_is_capped_at_medium() {
        let mut client = MockChatClient::new();
        client
            .expect_complete()
            .times(1)
            .returning(|_, _| Ok("PROBABILITY: 0.8\nCONFIDENCE: HIGH".to_string()));
        let adapter = LlmReasonerAdapter::new(Arc::new(client), Duration::from_secs(1_800));
        let query = MarketQuery::new("Will it rain in Paris tomorrow?", "rain");

        let first = adapter.estimate(&query).await;
        let estimate = first.estimate().unwrap();
        assert_eq!(estimate.confidence, ConfidenceTier::Medium);
        assert_eq!(estimate.prob, Some(0.8));
        assert!(!estimate.cached);

        // second call is served from cache, so the mock's times(1) holds
        let second = adapter.estimate(&query).await;
        assert!(second.estimate().unwrap().cached);
    }

    #[tokio::test]
    async fn unparseable_reply_is_a_failure() {
        let mut client = MockChatClient::new();
        client
            .expect_complete()
            .returning(|_, _| Ok("no idea".to_string()));
        let adapter = LlmReasonerAdapter::new(Arc::new(client), Duration::from_secs(1_800));
        let outcome = adapter.estimate(&MarketQuery::new("q", "id")).await;
        assert!(matches!(outcome, SourceOutcome::Absent(Absence::Failed(_))));
    }
}
