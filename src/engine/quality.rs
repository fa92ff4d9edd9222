//! Edge quality scoring: how much a divergence deserves to be trusted.
//!
//! Structural caps (soft-only, weak matches, extreme market) are computed
//! first as a ceiling; the point sum is clamped to it afterwards, so no
//! combination of minor bonuses gets past a cap.

use serde::Deserialize;

use crate::domain::{ConfidenceTier, SourceContribution, SourceTier};
use crate::error::{FuseError, Result};

pub const FIRST_HARD_BONUS: f64 = 20.0;
pub const SECOND_HARD_BONUS: f64 = 8.0;
pub const VALIDATED_BONUS: f64 = 6.0;
pub const MAX_VALIDATED_BONUSES: usize = 2;
pub const SOFT_ONLY_POINTS: f64 = 5.0;
pub const SOFT_EXTRA_POINTS: f64 = 2.0;
pub const SOURCE_QUALITY_MAX: f64 = 40.0;
pub const MATCH_QUALITY_MAX: f64 = 25.0;
pub const AGREEMENT_MAX: f64 = 25.0;
/// Spread (max - min prob) at which agreement earns nothing
pub const AGREEMENT_SPREAD: f64 = 0.3;
pub const HIGH_CONFIDENCE_POINTS: f64 = 15.0;
pub const MEDIUM_CONFIDENCE_POINTS: f64 = 8.0;
pub const LOW_CONFIDENCE_POINTS: f64 = 3.0;
pub const WEAK_MATCH_THRESHOLD: f64 = 0.5;
pub const WEAK_MATCH_CAP: u8 = 30;
pub const EXTREME_LOW: f64 = 0.05;
pub const EXTREME_HIGH: f64 = 0.95;
pub const EXTREME_NO_HARD_CAP: u8 = 15;
pub const EXTREME_THIN_CAP: u8 = 35;
pub const SOFT_ONLY_CAP: u8 = 20;

/// Point allocation and caps. Hand-tuned; loaded from config so they can be
/// recalibrated against recorded history.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EdgeQualityPolicy {
    pub first_hard_bonus: f64,
    pub second_hard_bonus: f64,
    pub validated_bonus: f64,
    pub max_validated_bonuses: usize,
    pub soft_only_points: f64,
    pub soft_extra_points: f64,
    pub source_quality_max: f64,
    pub match_quality_max: f64,
    pub agreement_max: f64,
    pub agreement_spread: f64,
    pub high_confidence_points: f64,
    pub medium_confidence_points: f64,
    pub low_confidence_points: f64,
    pub weak_match_threshold: f64,
    pub weak_match_cap: u8,
    pub extreme_low: f64,
    pub extreme_high: f64,
    pub extreme_no_hard_cap: u8,
    pub extreme_thin_cap: u8,
    pub soft_only_cap: u8,
}

impl Default for EdgeQualityPolicy {
    fn default() -> Self {
        Self {
            first_hard_bonus: FIRST_HARD_BONUS,
            second_hard_bonus: SECOND_HARD_BONUS,
            validated_bonus: VALIDATED_BONUS,
            max_validated_bonuses: MAX_VALIDATED_BONUSES,
            soft_only_points: SOFT_ONLY_POINTS,
            soft_extra_points: SOFT_EXTRA_POINTS,
            source_quality_max: SOURCE_QUALITY_MAX,
            match_quality_max: MATCH_QUALITY_MAX,
            agreement_max: AGREEMENT_MAX,
            agreement_spread: AGREEMENT_SPREAD,
            high_confidence_points: HIGH_CONFIDENCE_POINTS,
            medium_confidence_points: MEDIUM_CONFIDENCE_POINTS,
            low_confidence_points: LOW_CONFIDENCE_POINTS,
            weak_match_threshold: WEAK_MATCH_THRESHOLD,
            weak_match_cap: WEAK_MATCH_CAP,
            extreme_low: EXTREME_LOW,
            extreme_high: EXTREME_HIGH,
            extreme_no_hard_cap: EXTREME_NO_HARD_CAP,
            extreme_thin_cap: EXTREME_THIN_CAP,
            soft_only_cap: SOFT_ONLY_CAP,
        }
    }
}

impl EdgeQualityPolicy {
    pub fn validate(&self) -> Result<()> {
        let points = [
            ("first_hard_bonus", self.first_hard_bonus),
            ("second_hard_bonus", self.second_hard_bonus),
            ("validated_bonus", self.validated_bonus),
            ("soft_only_points", self.soft_only_points),
            ("soft_extra_points", self.soft_extra_points),
            ("source_quality_max", self.source_quality_max),
            ("match_quality_max", self.match_quality_max),
            ("agreement_max", self.agreement_max),
            ("high_confidence_points", self.high_confidence_points),
            ("medium_confidence_points", self.medium_confidence_points),
            ("low_confidence_points", self.low_confidence_points),
        ];
        if let Some((name, value)) = points.iter().find(|(_, v)| !v.is_finite() || *v < 0.0) {
            return Err(FuseError::InvalidConfig(format!(
                "quality.{} must be a non-negative number, got {}",
                name, value
            )));
        }

        if !(self.agreement_spread > 0.0 && self.agreement_spread <= 1.0) {
            return Err(FuseError::InvalidConfig(format!(
                "quality.agreement_spread must be in (0, 1], got {}",
                self.agreement_spread
            )));
        }
        if !(0.0..=1.0).contains(&self.weak_match_threshold) {
            return Err(FuseError::InvalidConfig(format!(
                "quality.weak_match_threshold must be in [0, 1], got {}",
                self.weak_match_threshold
            )));
        }
        if !(0.0 < self.extreme_low && self.extreme_low < self.extreme_high && self.extreme_high < 1.0)
        {
            return Err(FuseError::InvalidConfig(format!(
                "quality.extreme_low/extreme_high must satisfy 0 < low < high < 1, got {} / {}",
                self.extreme_low, self.extreme_high
            )));
        }

        let caps = [
            ("weak_match_cap", self.weak_match_cap),
            ("extreme_no_hard_cap", self.extreme_no_hard_cap),
            ("extreme_thin_cap", self.extreme_thin_cap),
            ("soft_only_cap", self.soft_only_cap),
        ];
        if let Some((name, cap)) = caps.iter().find(|(_, c)| *c > 100) {
            return Err(FuseError::InvalidConfig(format!(
                "quality.{} must be at most 100, got {}",
                name, cap
            )));
        }
        if self.extreme_no_hard_cap > self.extreme_thin_cap {
            return Err(FuseError::InvalidConfig(
                "quality.extreme_no_hard_cap must not exceed quality.extreme_thin_cap".to_string(),
            ));
        }

        Ok(())
    }

    fn confidence_points(&self, tier: ConfidenceTier) -> f64 {
        match tier {
            ConfidenceTier::High => self.high_confidence_points,
            ConfidenceTier::Medium => self.medium_confidence_points,
            ConfidenceTier::Low => self.low_confidence_points,
        }
    }

    fn is_extreme(&self, market_price: f64) -> bool {
        market_price < self.extreme_low || market_price > self.extreme_high
    }
}

/// Per-component breakdown, mostly for logging and tests
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityBreakdown {
    pub source_quality: f64,
    pub match_quality: f64,
    pub agreement: f64,
    pub confidence: f64,
    pub ceiling: u8,
    pub total: u8,
}

#[derive(Debug, Clone, Copy, Default)]
struct TierCounts {
    hard: usize,
    cross: usize,
    validated: usize,
    soft: usize,
}

impl TierCounts {
    fn of(contributions: &[SourceContribution]) -> Self {
        let mut counts = TierCounts::default();
        for c in contributions {
            match c.source.tier() {
                SourceTier::HardData => counts.hard += 1,
                SourceTier::CrossPlatform => {
                    counts.cross += 1;
                    if c.match_validated {
                        counts.validated += 1;
                    }
                }
                SourceTier::Soft => counts.soft += 1,
            }
        }
        counts
    }

    fn total(&self) -> usize {
        self.hard + self.cross + self.soft
    }
}

#[derive(Debug, Clone, Default)]
pub struct EdgeQualityScorer {
    policy: EdgeQualityPolicy,
}

impl EdgeQualityScorer {
    pub fn new(policy: EdgeQualityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &EdgeQualityPolicy {
        &self.policy
    }

    pub fn score(
        &self,
        contributions: &[SourceContribution],
        overall_confidence: ConfidenceTier,
        market_price: Option<f64>,
    ) -> u8 {
        self.breakdown(contributions, overall_confidence, market_price)
            .total
    }

    pub fn breakdown(
        &self,
        contributions: &[SourceContribution],
        overall_confidence: ConfidenceTier,
        market_price: Option<f64>,
    ) -> QualityBreakdown {
        let p = &self.policy;
        let counts = TierCounts::of(contributions);

        if counts.total() == 0 {
            return QualityBreakdown {
                source_quality: 0.0,
                match_quality: 0.0,
                agreement: 0.0,
                confidence: 0.0,
                ceiling: 0,
                total: 0,
            };
        }

        let ceiling = self.ceiling(contributions, counts, market_price);

        let mut source_quality = 0.0;
        if counts.hard >= 1 {
            source_quality += p.first_hard_bonus;
        }
        if counts.hard >= 2 {
            source_quality += p.second_hard_bonus;
        }
        source_quality += p.validated_bonus * counts.validated.min(p.max_validated_bonuses) as f64;
        if counts.soft > 0 {
            source_quality += if counts.soft == counts.total() {
                p.soft_only_points
            } else {
                p.soft_extra_points
            };
        }
        let source_quality = source_quality.min(p.source_quality_max);

        // Soft sources have no match to speak of and are left out entirely
        let non_soft: Vec<f64> = contributions
            .iter()
            .filter(|c| c.source.tier() != SourceTier::Soft)
            .map(|c| c.match_quality.unwrap_or(1.0))
            .collect();
        let match_quality = if non_soft.is_empty() {
            0.0
        } else {
            p.match_quality_max * non_soft.iter().sum::<f64>() / non_soft.len() as f64
        };

        let agreement = if contributions.len() >= 2 {
            let (lo, hi) = contributions
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), c| {
                    (lo.min(c.prob), hi.max(c.prob))
                });
            p.agreement_max * (1.0 - ((hi - lo) / p.agreement_spread).min(1.0))
        } else {
            0.0
        };

        let confidence = p.confidence_points(overall_confidence);

        let raw = (source_quality + match_quality + agreement + confidence).round();
        let total = raw.clamp(0.0, ceiling as f64) as u8;

        QualityBreakdown {
            source_quality,
            match_quality,
            agreement,
            confidence,
            ceiling,
            total,
        }
    }

    fn ceiling(
        &self,
        contributions: &[SourceContribution],
        counts: TierCounts,
        market_price: Option<f64>,
    ) -> u8 {
        let p = &self.policy;
        let mut ceiling: u8 = 100;

        if counts.soft == counts.total() {
            ceiling = ceiling.min(p.soft_only_cap);
        }

        let all_weak = contributions
            .iter()
            .filter(|c| c.source.tier() != SourceTier::Soft)
            .all(|c| c.match_quality.unwrap_or(1.0) < p.weak_match_threshold);
        if counts.hard + counts.cross > 0 && all_weak {
            ceiling = ceiling.min(p.weak_match_cap);
        }

        if market_price.map(|m| p.is_extreme(m)).unwrap_or(false) {
            if counts.hard == 0 {
                ceiling = ceiling.min(p.extreme_no_hard_cap);
            } else if counts.hard < 2 && counts.validated == 0 {
                ceiling = ceiling.min(p.extreme_thin_cap);
            }
        }

        ceiling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SourceKey;

    fn contribution(source: SourceKey, prob: f64, match_quality: Option<f64>) -> SourceContribution {
        SourceContribution {
            source,
            prob,
            weight: 1.0,
            confidence: ConfidenceTier::High,
            match_quality,
            match_validated: match_quality.map(|q| q >= 0.5).unwrap_or(false),
            detail: String::new(),
        }
    }

    fn scorer() -> EdgeQualityScorer {
        EdgeQualityScorer::default()
    }

    #[test]
    fn two_agreeing_hard_sources_grade_high() {
        let sources = vec![
            contribution(SourceKey::Sportsbook, 0.70, Some(0.95)),
            contribution(SourceKey::CryptoModel, 0.71, None),
        ];
        let b = scorer().breakdown(&sources, ConfidenceTier::High, Some(0.55));
        assert_eq!(b.source_quality, 28.0);
        assert!(b.agreement > 23.0);
        assert!(b.total >= 75, "total {}", b.total);
        assert_eq!(b.ceiling, 100);
    }

    #[test]
    fn single_source_earns_no_agreement() {
        let sources = vec![contribution(SourceKey::Sportsbook, 0.70, Some(1.0))];
        let b = scorer().breakdown(&sources, ConfidenceTier::Medium, Some(0.5));
        assert_eq!(b.agreement, 0.0);
        assert_eq!(b.total, (20.0 + 25.0 + 8.0) as u8);
    }

    #[test]
    fn soft_only_is_capped() {
        let sources = vec![contribution(SourceKey::LlmReasoner, 0.95, None)];
        for confidence in [ConfidenceTier::High, ConfidenceTier::Medium, ConfidenceTier::Low] {
            assert!(scorer().score(&sources, confidence, Some(0.2)) <= SOFT_ONLY_CAP);
        }
    }

    #[test]
    fn weak_matches_cap_the_total() {
        let sources = vec![
            contribution(SourceKey::CrowdForecast, 0.60, Some(0.4)),
            contribution(SourceKey::CrossExchange, 0.61, Some(0.45)),
            contribution(SourceKey::LlmReasoner, 0.60, None),
        ];
        let b = scorer().breakdown(&sources, ConfidenceTier::High, Some(0.4));
        assert_eq!(b.ceiling, WEAK_MATCH_CAP);
        assert!(b.total <= WEAK_MATCH_CAP);
    }

    #[test]
    fn soft_sources_do_not_dilute_match_average() {
        let with_llm = vec![
            contribution(SourceKey::Sportsbook, 0.6, Some(0.8)),
            contribution(SourceKey::LlmReasoner, 0.6, None),
        ];
        let b = scorer().breakdown(&with_llm, ConfidenceTier::Medium, Some(0.5));
        assert!((b.match_quality - 20.0).abs() < 1e-9);
    }

    #[test]
    fn extreme_market_needs_hard_evidence() {
        let crowd_only = vec![
            contribution(SourceKey::CrowdForecast, 0.9, Some(0.9)),
            contribution(SourceKey::CrossExchange, 0.9, Some(0.9)),
        ];
        assert!(scorer().score(&crowd_only, ConfidenceTier::High, Some(0.01)) <= EXTREME_NO_HARD_CAP);

        let one_hard = vec![contribution(SourceKey::CryptoModel, 0.3, None)];
        assert!(scorer().score(&one_hard, ConfidenceTier::Medium, Some(0.97)) <= EXTREME_THIN_CAP);

        let hard_plus_validated = vec![
            contribution(SourceKey::CryptoModel, 0.30, None),
            contribution(SourceKey::CrossExchange, 0.31, Some(0.9)),
        ];
        assert!(scorer().score(&hard_plus_validated, ConfidenceTier::High, Some(0.97)) > EXTREME_THIN_CAP);
    }

    #[test]
    fn no_sources_scores_zero() {
        assert_eq!(scorer().score(&[], ConfidenceTier::Low, Some(0.5)), 0);
    }

    #[test]
    fn policy_validation_rejects_inverted_caps() {
        assert!(EdgeQualityPolicy::default().validate().is_ok());

        let policy = EdgeQualityPolicy {
            extreme_no_hard_cap: 50,
            extreme_thin_cap: 35,
            ..Default::default()
        };
        assert!(policy.validate().is_err());

        let policy = EdgeQualityPolicy {
            agreement_spread: 0.0,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn custom_policy_changes_caps() {
        let scorer = EdgeQualityScorer::new(EdgeQualityPolicy {
            soft_only_cap: 10,
            ..Default::default()
        });
        let sources = vec![contribution(SourceKey::LlmReasoner, 0.9, None)];
        assert!(scorer.score(&sources, ConfidenceTier::High, Some(0.5)) <= 10);
    }
}
