use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::estimate::{Absence, ConfidenceTier, SourceKey};

/// Strength of the raw divergence, before quality grading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EdgeSignal {
    None,
    Weak,
    Moderate,
    Strong,
}

impl EdgeSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeSignal::None => "NONE",
            EdgeSignal::Weak => "WEAK",
            EdgeSignal::Moderate => "MODERATE",
            EdgeSignal::Strong => "STRONG",
        }
    }
}

impl std::fmt::Display for EdgeSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeDirection {
    BuyYes,
    BuyNo,
}

impl EdgeDirection {
    pub fn from_divergence(divergence: f64) -> Self {
        if divergence >= 0.0 {
            EdgeDirection::BuyYes
        } else {
            EdgeDirection::BuyNo
        }
    }
}

/// Letter grade for how far a divergence can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeGrade {
    A,
    B,
    C,
    D,
}

impl EdgeGrade {
    pub const A_MIN: u8 = 75;
    pub const B_MIN: u8 = 55;
    pub const C_MIN: u8 = 35;

    /// Grade is always derived from the quality score, never set directly
    pub fn from_quality(quality: u8) -> Self {
        if quality >= Self::A_MIN {
            EdgeGrade::A
        } else if quality >= Self::B_MIN {
            EdgeGrade::B
        } else if quality >= Self::C_MIN {
            EdgeGrade::C
        } else {
            EdgeGrade::D
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeGrade::A => "A",
            EdgeGrade::B => "B",
            EdgeGrade::C => "C",
            EdgeGrade::D => "D",
        }
    }
}

impl std::fmt::Display for EdgeGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One source's share of the consensus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceContribution {
    pub source: SourceKey,
    pub prob: f64,
    /// Effective weight after confidence and family adjustments
    pub weight: f64,
    pub confidence: ConfidenceTier,
    pub match_quality: Option<f64>,
    pub match_validated: bool,
    pub detail: String,
}

/// A registered source that did not contribute, and why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSource {
    pub source: SourceKey,
    pub reason: Absence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedSignal {
    /// `None` means no source answered: "no signal", not zero confidence
    pub consensus_prob: Option<f64>,
    pub overall_confidence: ConfidenceTier,
    pub market_price: Option<f64>,
    pub divergence: Option<f64>,
    pub edge_signal: EdgeSignal,
    pub edge_direction: Option<EdgeDirection>,
    pub edge_quality: u8,
    pub edge_grade: EdgeGrade,
    pub source_breakdown: Vec<SourceContribution>,
    pub source_count: usize,
    pub absences: Vec<SkippedSource>,
    pub timestamp: DateTime<Utc>,
}

impl FusedSignal {
    pub fn has_signal(&self) -> bool {
        self.consensus_prob.is_some()
    }

    pub fn contributed(&self, source: SourceKey) -> bool {
        self.source_breakdown.iter().any(|c| c.source == source)
    }

    pub fn absence_of(&self, source: SourceKey) -> Option<&Absence> {
        self.absences
            .iter()
            .find(|s| s.source == source)
            .map(|s| &s.reason)
    }
}

/// Append-only history row handed to the persistence collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedSignalRecord {
    pub record_id: Uuid,
    pub condition_id: String,
    pub question: String,
    #[serde(flatten)]
    pub signal: FusedSignal,
    pub recorded_at: DateTime<Utc>,
}

impl FusedSignalRecord {
    pub fn new(condition_id: &str, question: &str, signal: FusedSignal) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            condition_id: condition_id.to_string(),
            question: question.to_string(),
            signal,
            recorded_at: Utc::now(),
        }
    }
}
