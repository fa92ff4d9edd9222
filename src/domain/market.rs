use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One market question as handed to the fusion engine.
///
/// `condition_id` is stable across repeated queries of the same market and is
/// the key for caches and history records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketQuery {
    pub question: String,
    pub condition_id: String,
    /// Current YES price in [0, 1]
    #[serde(default)]
    pub market_price: Option<f64>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// Free-form category hint from the market listing (e.g. "nba", "crypto")
    #[serde(default)]
    pub category: Option<String>,
    /// Snapshot time horizons are measured from; the wall clock when unset
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

impl MarketQuery {
    pub fn new(question: impl Into<String>, condition_id: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            condition_id: condition_id.into(),
            market_price: None,
            end_date: None,
            category: None,
            as_of: None,
        }
    }

    pub fn with_market_price(mut self, price: f64) -> Self {
        self.market_price = Some(price.clamp(0.0, 1.0));
        self
    }

    pub fn with_end_date(mut self, end_date: DateTime<Utc>) -> Self {
        self.end_date = Some(end_date);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = Some(as_of);
        self
    }

    /// Time horizons are measured from. Fixing `as_of` makes repeated
    /// fusions of one snapshot reproducible.
    pub fn reference_time(&self) -> DateTime<Utc> {
        self.as_of.unwrap_or_else(Utc::now)
    }

    /// Fractional days from `reference_time` until the deadline
    pub fn days_remaining(&self) -> Option<f64> {
        self.days_until_end(self.reference_time())
    }

    /// Fractional days from `now` until the deadline, if one is known
    pub fn days_until_end(&self, now: DateTime<Utc>) -> Option<f64> {
        self.end_date
            .map(|end| (end - now).num_seconds() as f64 / 86_400.0)
    }

    /// Lowercased question text, used by matchers
    pub fn question_lower(&self) -> String {
        self.question.to_lowercase()
    }

    /// Whether the category hint mentions `needle` (case-insensitive)
    pub fn category_is(&self, needle: &str) -> bool {
        self.category
            .as_deref()
            .map(|c| c.eq_ignore_ascii_case(needle))
            .unwrap_or(false)
    }
}
