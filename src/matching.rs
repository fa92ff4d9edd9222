//! Cross-platform question matching.
//!
//! Crowd-forecast and cross-exchange adapters find candidate questions by
//! search, then ask a `MatchValidator` whether the candidate is the same
//! real-world event. The validator is injected at construction, so several
//! adapters share one (and its cache).

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::TtlCache;
use crate::error::Result;

/// Quality below which a validated match is not granted
pub const DEFAULT_VALIDATION_THRESHOLD: f64 = 0.6;
/// Ceiling for candidates whose numbers disagree with the market's
const NUMBER_MISMATCH_CEILING: f64 = 0.4;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "at", "be", "by", "for", "in", "is", "it", "of", "on", "or", "the",
    "to", "will", "with", "before", "after", "than", "this", "that", "does", "do", "what", "who",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchVerdict {
    /// Confidence the candidate is the same event, in [0, 1]
    pub quality: f64,
    pub validated: bool,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MatchValidator: Send + Sync {
    async fn validate(&self, market_question: &str, candidate: &str) -> Result<MatchVerdict>;
}

/// Lowercased content words, stopwords removed
pub fn content_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '.' && c != '$')
        .map(|t| t.trim_matches(|c: char| c == '.' || c == '$').to_lowercase())
        .filter(|t| !t.is_empty() && !STOPWORDS.contains(&t.as_str()))
        .filter(|t| t.len() > 1 || t.chars().all(|c| c.is_ascii_digit()))
        .collect()
}

/// Compact keyword query for upstream search endpoints
pub fn search_terms(question: &str, max_terms: usize) -> String {
    let mut seen = HashSet::new();
    content_tokens(question)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .take(max_terms)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Validate every candidate and keep the best-scoring one
pub async fn best_candidate<T, F>(
    validator: &dyn MatchValidator,
    market_question: &str,
    candidates: &[T],
    text: F,
) -> Result<Option<(usize, MatchVerdict)>>
where
    T: Sync,
    F: Fn(&T) -> &str,
{
    let mut best: Option<(usize, MatchVerdict)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        let verdict = validator.validate(market_question, text(candidate)).await?;
        if best.map(|(_, b)| verdict.quality > b.quality).unwrap_or(true) {
            best = Some((i, verdict));
        }
    }
    Ok(best)
}

fn numbers(tokens: &HashSet<String>) -> HashSet<&str> {
    tokens
        .iter()
        .filter(|t| t.chars().any(|c| c.is_ascii_digit()))
        .map(String::as_str)
        .collect()
}

/// Token overlap (F1 over content words) plus agreement of the numbers both
/// questions mention: a different threshold or year is a different question.
#[derive(Debug, Clone)]
pub struct TokenOverlapValidator {
    threshold: f64,
}

impl Default for TokenOverlapValidator {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_VALIDATION_THRESHOLD,
        }
    }
}

impl TokenOverlapValidator {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn score(&self, market_question: &str, candidate: &str) -> MatchVerdict {
        let a: HashSet<String> = content_tokens(market_question).into_iter().collect();
        let b: HashSet<String> = content_tokens(candidate).into_iter().collect();
        if a.is_empty() || b.is_empty() {
            return MatchVerdict {
                quality: 0.0,
                validated: false,
            };
        }

        let common = a.intersection(&b).count() as f64;
        let precision = common / b.len() as f64;
        let recall = common / a.len() as f64;
        let f1 = if common > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        let (na, nb) = (numbers(&a), numbers(&b));
        let numbers_agree = match (na.is_empty(), nb.is_empty()) {
            (true, true) => 1.0,
            (false, false) => na.intersection(&nb).count() as f64 / na.len().max(nb.len()) as f64,
            _ => 0.5,
        };

        let mut quality = 0.7 * f1 + 0.3 * numbers_agree;
        if !na.is_empty() && !nb.is_empty() && na != nb {
            quality = quality.min(NUMBER_MISMATCH_CEILING);
        }
        let quality = quality.clamp(0.0, 1.0);

        MatchVerdict {
            quality,
            validated: quality >= self.threshold,
        }
    }
}

#[async_trait]
impl MatchValidator for TokenOverlapValidator {
    async fn validate(&self, market_question: &str, candidate: &str) -> Result<MatchVerdict> {
        Ok(self.score(market_question, candidate))
    }
}

/// Memoises another validator's decisions (24 h by default)
#[derive(Clone)]
pub struct CachedMatchValidator {
    inner: Arc<dyn MatchValidator>,
    cache: TtlCache<(String, String), MatchVerdict>,
}

impl CachedMatchValidator {
    pub fn new(inner: Arc<dyn MatchValidator>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new("match_decisions", ttl),
        }
    }

    pub fn cached_decisions(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl MatchValidator for CachedMatchValidator {
    async fn validate(&self, market_question: &str, candidate: &str) -> Result<MatchVerdict> {
        let key = (market_question.to_string(), candidate.to_string());
        let inner = Arc::clone(&self.inner);
        let (question, candidate) = key.clone();
        let cached = self
            .cache
            .get_or_fetch(key, move || async move {
                inner.validate(&question, &candidate).await
            })
            .await?;
        Ok(cached.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_questions_validate() {
        let v = TokenOverlapValidator::default();
        let verdict = v.score(
            "Will Bitcoin exceed $100,000 by December 31, 2025?",
            "Will Bitcoin exceed $100,000 by December 31, 2025?",
        );
        assert!(verdict.quality > 0.95);
        assert!(verdict.validated);
    }

    #[test]
    fn different_thresholds_do_not_validate() {
        let v = TokenOverlapValidator::default();
        let verdict = v.score(
            "Will Bitcoin exceed $100,000 by December 31, 2025?",
            "Will Bitcoin exceed $150,000 by December 31, 2025?",
        );
        assert!(verdict.quality <= NUMBER_MISMATCH_CEILING);
        assert!(!verdict.validated);
    }

    #[test]
    fn unrelated_questions_score_low() {
        let v = TokenOverlapValidator::default();
        let verdict = v.score(
            "Will the Fed cut rates in March?",
            "Who will win the 2026 World Cup?",
        );
        assert!(verdict.quality < 0.3);
    }

    #[test]
    fn tokens_drop_stopwords() {
        assert_eq!(
            content_tokens("Will the Lakers win the title?"),
            vec!["lakers".to_string(), "win".to_string(), "title".to_string()]
        );
    }

    #[test]
    fn search_terms_are_deduplicated() {
        assert_eq!(
            search_terms("Will the Fed cut rates? The Fed meets in March", 4),
            "fed cut rates meets"
        );
    }

    #[tokio::test]
    async fn best_candidate_picks_highest_quality() {
        let v = TokenOverlapValidator::default();
        let candidates = vec![
            "Who will win the World Cup?".to_string(),
            "Will the Fed cut rates in March 2026?".to_string(),
            "Will the Fed hike rates?".to_string(),
        ];
        let (index, verdict) = best_candidate(
            &v,
            "Will the Fed cut interest rates in March 2026?",
            &candidates,
            |c| c.as_str(),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(index, 1);
        assert!(verdict.validated);

        let none = best_candidate(&v, "anything", &Vec::<String>::new(), |c| c.as_str())
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cached_validator_calls_inner_once() {
        let mut inner = MockMatchValidator::new();
        inner.expect_validate().times(1).returning(|_, _| {
            Ok(MatchVerdict {
                quality: 0.8,
                validated: true,
            })
        });
        let cached = CachedMatchValidator::new(Arc::new(inner), Duration::from_secs(86_400));

        for _ in 0..3 {
            let verdict = cached.validate("q", "candidate").await.unwrap();
            assert!(verdict.validated);
        }
        assert_eq!(cached.cached_decisions(), 1);
    }
}
