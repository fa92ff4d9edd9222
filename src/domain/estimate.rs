use serde::{Deserialize, Serialize};

/// Identifies which adapter produced an estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKey {
    Sportsbook,
    CryptoModel,
    EquityModel,
    ViewVelocity,
    PostCount,
    CrowdForecast,
    CrossExchange,
    LlmReasoner,
}

impl SourceKey {
    pub const ALL: [SourceKey; 8] = [
        SourceKey::Sportsbook,
        SourceKey::CryptoModel,
        SourceKey::EquityModel,
        SourceKey::ViewVelocity,
        SourceKey::PostCount,
        SourceKey::CrowdForecast,
        SourceKey::CrossExchange,
        SourceKey::LlmReasoner,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKey::Sportsbook => "sportsbook",
            SourceKey::CryptoModel => "crypto_model",
            SourceKey::EquityModel => "equity_model",
            SourceKey::ViewVelocity => "view_velocity",
            SourceKey::PostCount => "post_count",
            SourceKey::CrowdForecast => "crowd_forecast",
            SourceKey::CrossExchange => "cross_exchange",
            SourceKey::LlmReasoner => "llm_reasoner",
        }
    }

    /// Evidentiary tier used by the edge quality scorer
    pub fn tier(&self) -> SourceTier {
        match self {
            SourceKey::Sportsbook
            | SourceKey::CryptoModel
            | SourceKey::EquityModel
            | SourceKey::ViewVelocity
            | SourceKey::PostCount => SourceTier::HardData,
            SourceKey::CrowdForecast | SourceKey::CrossExchange => SourceTier::CrossPlatform,
            SourceKey::LlmReasoner => SourceTier::Soft,
        }
    }

    /// Sources in the same family read the same underlying signal
    pub fn family(&self) -> SourceFamily {
        match self {
            SourceKey::Sportsbook => SourceFamily::Sportsbook,
            SourceKey::CryptoModel | SourceKey::EquityModel => SourceFamily::PriceModel,
            SourceKey::ViewVelocity | SourceKey::PostCount => SourceFamily::CountMetric,
            SourceKey::CrowdForecast => SourceFamily::Crowd,
            SourceKey::CrossExchange => SourceFamily::Exchange,
            SourceKey::LlmReasoner => SourceFamily::Reasoner,
        }
    }
}

impl std::fmt::Display for SourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    /// Priced markets or measured physical signals
    HardData,
    /// Match to this question needed explicit validation
    CrossPlatform,
    /// Reasoned estimates with no external ground truth
    Soft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFamily {
    Sportsbook,
    PriceModel,
    CountMetric,
    Crowd,
    Exchange,
    Reasoner,
}

/// Adapter-reported confidence in its own estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
}

impl ConfidenceTier {
    /// Weight multiplier applied by the consensus aggregator
    pub fn multiplier(&self) -> f64 {
        match self {
            ConfidenceTier::High => 1.0,
            ConfidenceTier::Medium => 0.7,
            ConfidenceTier::Low => 0.4,
        }
    }

    /// Ordinal score (HIGH=3, MEDIUM=2, LOW=1) for averaging
    pub fn score(&self) -> f64 {
        match self {
            ConfidenceTier::High => 3.0,
            ConfidenceTier::Medium => 2.0,
            ConfidenceTier::Low => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::High => "HIGH",
            ConfidenceTier::Medium => "MEDIUM",
            ConfidenceTier::Low => "LOW",
        }
    }
}

impl std::fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output of one adapter. Fixed shape regardless of the upstream payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEstimate {
    pub source: SourceKey,
    pub prob: Option<f64>,
    pub confidence: ConfidenceTier,
    /// How sure the adapter is that it matched the right external event.
    /// `None` means the match is structural (explicit symbol, entity id).
    pub match_quality: Option<f64>,
    pub match_validated: bool,
    pub detail: String,
    pub cached: bool,
}

impl SourceEstimate {
    pub fn new(source: SourceKey, prob: f64, confidence: ConfidenceTier) -> Self {
        Self {
            source,
            prob: Some(prob.clamp(0.0, 1.0)),
            confidence,
            match_quality: None,
            match_validated: false,
            detail: String::new(),
            cached: false,
        }
    }

    pub fn with_match(mut self, quality: f64, validated: bool) -> Self {
        self.match_quality = Some(quality.clamp(0.0, 1.0));
        self.match_validated = validated;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    /// Match quality with structural matches counted as certain
    pub fn effective_match_quality(&self) -> f64 {
        self.match_quality.unwrap_or(1.0)
    }
}

/// Why a source did not contribute to a fusion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum Absence {
    /// Turned off in configuration
    Disabled,
    /// The question is outside what this source covers
    NotApplicable(String),
    /// Candidates existed but none matched this market well enough
    NoMatch(String),
    /// Exceeded its deadline
    TimedOut,
    /// Upstream or internal failure
    Failed(String),
}

impl std::fmt::Display for Absence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Absence::Disabled => write!(f, "disabled"),
            Absence::NotApplicable(why) => write!(f, "not applicable: {}", why),
            Absence::NoMatch(why) => write!(f, "no match: {}", why),
            Absence::TimedOut => write!(f, "timed out"),
            Absence::Failed(why) => write!(f, "failed: {}", why),
        }
    }
}

/// What an adapter hands back to the engine
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    Estimate(SourceEstimate),
    Absent(Absence),
}

impl SourceOutcome {
    pub fn not_applicable(why: impl Into<String>) -> Self {
        SourceOutcome::Absent(Absence::NotApplicable(why.into()))
    }

    pub fn no_match(why: impl Into<String>) -> Self {
        SourceOutcome::Absent(Absence::NoMatch(why.into()))
    }

    pub fn failed(why: impl Into<String>) -> Self {
        SourceOutcome::Absent(Absence::Failed(why.into()))
    }

    pub fn estimate(&self) -> Option<&SourceEstimate> {
        match self {
            SourceOutcome::Estimate(e) => Some(e),
            SourceOutcome::Absent(_) => None,
        }
    }

    pub fn absence(&self) -> Option<&Absence> {
        match self {
            SourceOutcome::Estimate(_) => None,
            SourceOutcome::Absent(a) => Some(a),
        }
    }
}

impl From<SourceEstimate> for SourceOutcome {
    fn from(estimate: SourceEstimate) -> Self {
        SourceOutcome::Estimate(estimate)
    }
}
