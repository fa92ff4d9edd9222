//! Normal approximation for "will the count reach N by the deadline" questions.

use serde::{Deserialize, Serialize};

use super::normal::{clamp_model_prob, normal_cdf, MAX_MODEL_PROB, MIN_MODEL_PROB};
use crate::domain::ConfidenceTier;

/// Observed days needed before the model reports MEDIUM
pub const MEDIUM_CONFIDENCE_DAYS: usize = 7;
/// Observed days needed before the model reports HIGH
pub const HIGH_CONFIDENCE_DAYS: usize = 14;
/// Rolling window used when learning daily stats
pub const DEFAULT_WINDOW_DAYS: usize = 30;

const STDDEV_FLOOR: f64 = 1e-6;
/// Values further than this many scaled MADs from the median are dropped
const OUTLIER_MADS: f64 = 3.0;

/// Daily mean / standard deviation of a count, either learned or a prior
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyRateStats {
    pub mean: f64,
    pub stddev: f64,
    /// Independent days behind the stats; 0 for a static prior
    pub observed_days: usize,
}

impl DailyRateStats {
    pub fn prior(mean: f64, stddev: f64) -> Self {
        Self {
            mean,
            stddev,
            observed_days: 0,
        }
    }

    /// Learn stats from per-day counts (oldest first), keeping the last
    /// `window` days and trimming outliers by median absolute deviation.
    pub fn from_daily_counts(counts: &[f64], window: usize) -> Option<Self> {
        let start = counts.len().saturating_sub(window.max(1));
        let recent: Vec<f64> = counts[start..]
            .iter()
            .copied()
            .filter(|c| c.is_finite() && *c >= 0.0)
            .collect();

        if recent.len() < 2 {
            return None;
        }

        let med = median(&recent);
        let deviations: Vec<f64> = recent.iter().map(|c| (c - med).abs()).collect();
        let mad = median(&deviations) * 1.4826;

        let kept: Vec<f64> = if mad > 0.0 {
            recent
                .into_iter()
                .filter(|c| (c - med).abs() <= OUTLIER_MADS * mad)
                .collect()
        } else {
            recent
        };

        if kept.len() < 2 {
            return None;
        }

        let n = kept.len() as f64;
        let mean = kept.iter().sum::<f64>() / n;
        let variance = kept.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / (n - 1.0);

        Some(Self {
            mean,
            stddev: variance.sqrt(),
            observed_days: kept.len(),
        })
    }

    /// Confidence escalates only with enough independent observed days
    pub fn confidence(&self) -> ConfidenceTier {
        if self.observed_days >= HIGH_CONFIDENCE_DAYS {
            ConfidenceTier::High
        } else if self.observed_days >= MEDIUM_CONFIDENCE_DAYS {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CountRateInput {
    pub current_count: f64,
    pub threshold: f64,
    pub days_remaining: f64,
    pub stats: DailyRateStats,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CountRateOutput {
    pub prob: f64,
    pub expected_remaining: f64,
    pub remaining_needed: f64,
    pub confidence: ConfidenceTier,
}

/// P(count reaches `threshold` by the deadline)
pub fn count_rate_probability(input: &CountRateInput) -> CountRateOutput {
    let remaining_needed = input.threshold - input.current_count;
    let days = input.days_remaining.max(0.0);
    let expected_remaining = input.stats.mean.max(0.0) * days;
    let confidence = input.stats.confidence();

    let prob = if remaining_needed <= 0.0 {
        MAX_MODEL_PROB
    } else if days <= 0.0 {
        MIN_MODEL_PROB
    } else {
        let stddev = input.stats.stddev.max(0.0) * days.sqrt();
        let z = (remaining_needed - expected_remaining) / stddev.max(STDDEV_FLOOR);
        clamp_model_prob(1.0 - normal_cdf(z))
    };

    CountRateOutput {
        prob,
        expected_remaining,
        remaining_needed,
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_pace_is_a_coin_flip() {
        let out = count_rate_probability(&CountRateInput {
            current_count: 100.0,
            threshold: 200.0,
            days_remaining: 4.0,
            stats: DailyRateStats::prior(25.0, 10.0),
        });
        assert!((out.prob - 0.5).abs() < 1e-6);
        assert_eq!(out.expected_remaining, 100.0);
        assert_eq!(out.confidence, ConfidenceTier::Low);
    }

    #[test]
    fn behind_pace_is_unlikely() {
        let out = count_rate_probability(&CountRateInput {
            current_count: 0.0,
            threshold: 300.0,
            days_remaining: 4.0,
            stats: DailyRateStats::prior(25.0, 10.0),
        });
        // z = (300 - 100) / 20 = 10
        assert_eq!(out.prob, MIN_MODEL_PROB);
    }

    #[test]
    fn already_reached_and_expired_branches() {
        let stats = DailyRateStats::prior(5.0, 0.0);
        let reached = count_rate_probability(&CountRateInput {
            current_count: 50.0,
            threshold: 40.0,
            days_remaining: 2.0,
            stats,
        });
        assert_eq!(reached.prob, MAX_MODEL_PROB);

        let expired = count_rate_probability(&CountRateInput {
            current_count: 10.0,
            threshold: 40.0,
            days_remaining: 0.0,
            stats,
        });
        assert_eq!(expired.prob, MIN_MODEL_PROB);
    }

    #[test]
    fn learned_stats_trim_outliers_and_gate_confidence() {
        let mut counts = vec![20.0, 22.0, 19.0, 21.0, 20.0, 23.0, 18.0, 20.0];
        counts.push(400.0);
        let stats = DailyRateStats::from_daily_counts(&counts, 30).unwrap();
        assert_eq!(stats.observed_days, 8);
        assert!((stats.mean - 20.375).abs() < 1e-9);
        assert_eq!(stats.confidence(), ConfidenceTier::Medium);

        let two_weeks: Vec<f64> = (0..14).map(|i| 10.0 + (i % 3) as f64).collect();
        let stats = DailyRateStats::from_daily_counts(&two_weeks, 30).unwrap();
        assert_eq!(stats.confidence(), ConfidenceTier::High);

        let short = DailyRateStats::from_daily_counts(&[5.0, 6.0, 7.0], 30).unwrap();
        assert_eq!(short.confidence(), ConfidenceTier::Low);
    }

    #[test]
    fn window_keeps_most_recent_days() {
        let counts: Vec<f64> = (0..40).map(|i| if i < 20 { 100.0 } else { 10.0 + (i % 2) as f64 }).collect();
        let stats = DailyRateStats::from_daily_counts(&counts, 10).unwrap();
        assert!(stats.mean < 12.0);
        assert_eq!(stats.observed_days, 10);
    }
}
