//! Confidence-weighted consensus across responding sources.

use std::collections::{HashMap, HashSet};

use crate::domain::{
    ConfidenceTier, EdgeSignal, SourceContribution, SourceEstimate, SourceFamily,
};

pub const STRONG_EDGE: f64 = 0.10;
pub const MODERATE_EDGE: f64 = 0.05;
pub const WEAK_EDGE: f64 = 0.02;

#[derive(Debug, Clone, PartialEq)]
pub struct Consensus {
    /// `None` when nothing contributed or every weight was zero
    pub prob: Option<f64>,
    pub overall_confidence: ConfidenceTier,
    pub contributions: Vec<SourceContribution>,
}

/// Combine probability-bearing estimates, each paired with its configured
/// base weight. Estimates without a probability are ignored.
///
/// Effective weight is `base * confidence multiplier`, split evenly across
/// estimates from the same `SourceFamily` so one upstream signal is not
/// counted twice.
pub fn aggregate(estimates: &[(SourceEstimate, f64)]) -> Consensus {
    let usable: Vec<(&SourceEstimate, f64, f64)> = estimates
        .iter()
        .filter_map(|(e, base)| e.prob.map(|p| (e, p, *base)))
        .collect();

    let mut per_family: HashMap<SourceFamily, usize> = HashMap::new();
    for (e, _, _) in &usable {
        *per_family.entry(e.source.family()).or_insert(0) += 1;
    }

    let contributions: Vec<SourceContribution> = usable
        .iter()
        .map(|(e, prob, base)| {
            let family_size = per_family.get(&e.source.family()).copied().unwrap_or(1).max(1);
            SourceContribution {
                source: e.source,
                prob: *prob,
                weight: base.max(0.0) * e.confidence.multiplier() / family_size as f64,
                confidence: e.confidence,
                match_quality: e.match_quality,
                match_validated: e.match_validated,
                detail: e.detail.clone(),
            }
        })
        .collect();

    let total_weight: f64 = contributions.iter().map(|c| c.weight).sum();
    let prob = if total_weight > 0.0 {
        let weighted: f64 = contributions.iter().map(|c| c.prob * c.weight).sum();
        Some((weighted / total_weight).clamp(0.0, 1.0))
    } else {
        None
    };

    let overall_confidence = overall_confidence(&contributions);

    Consensus {
        prob,
        overall_confidence,
        contributions,
    }
}

/// Overall confidence from count and mean tier of the contributors.
///
/// HIGH needs two non-LOW contributors from different families; a lone
/// source tops out at MEDIUM whatever it reports.
pub fn overall_confidence(contributions: &[SourceContribution]) -> ConfidenceTier {
    match contributions {
        [] => ConfidenceTier::Low,
        [only] => only.confidence.min(ConfidenceTier::Medium),
        _ => {
            let mean = contributions
                .iter()
                .map(|c| c.confidence.score())
                .sum::<f64>()
                / contributions.len() as f64;
            let corroborating: HashSet<SourceFamily> = contributions
                .iter()
                .filter(|c| c.confidence != ConfidenceTier::Low)
                .map(|c| c.source.family())
                .collect();

            if mean >= 2.5 && corroborating.len() >= 2 {
                ConfidenceTier::High
            } else if mean >= 1.75 {
                ConfidenceTier::Medium
            } else {
                ConfidenceTier::Low
            }
        }
    }
}

pub fn edge_signal(divergence: Option<f64>, confidence: ConfidenceTier) -> EdgeSignal {
    let Some(d) = divergence.map(f64::abs) else {
        return EdgeSignal::None;
    };
    if d >= STRONG_EDGE && confidence != ConfidenceTier::Low {
        EdgeSignal::Strong
    } else if d >= MODERATE_EDGE {
        EdgeSignal::Moderate
    } else if d >= WEAK_EDGE {
        EdgeSignal::Weak
    } else {
        EdgeSignal::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SourceKey;

    fn est(source: SourceKey, prob: f64, confidence: ConfidenceTier) -> SourceEstimate {
        SourceEstimate::new(source, prob, confidence)
    }

    #[test]
    fn weighted_mean_uses_confidence_multipliers() {
        let consensus = aggregate(&[
            (est(SourceKey::Sportsbook, 0.8, ConfidenceTier::High), 1.0),
            (est(SourceKey::LlmReasoner, 0.4, ConfidenceTier::Low), 1.0),
        ]);
        // (0.8 * 1.0 + 0.4 * 0.4) / 1.4
        let expected = (0.8 + 0.16) / 1.4;
        assert!((consensus.prob.unwrap() - expected).abs() < 1e-12);
        assert_eq!(consensus.contributions.len(), 2);
    }

    #[test]
    fn no_estimates_means_no_signal() {
        let consensus = aggregate(&[]);
        assert_eq!(consensus.prob, None);
        assert_eq!(consensus.overall_confidence, ConfidenceTier::Low);
    }

    #[test]
    fn estimates_without_probability_are_ignored() {
        let mut blank = est(SourceKey::CrowdForecast, 0.5, ConfidenceTier::High);
        blank.prob = None;
        let consensus = aggregate(&[(blank, 1.0)]);
        assert!(consensus.contributions.is_empty());
        assert_eq!(consensus.prob, None);
    }

    #[test]
    fn same_family_estimates_share_weight() {
        let consensus = aggregate(&[
            (est(SourceKey::CryptoModel, 0.6, ConfidenceTier::High), 0.8),
            (est(SourceKey::EquityModel, 0.6, ConfidenceTier::High), 0.8),
            (est(SourceKey::Sportsbook, 0.6, ConfidenceTier::High), 0.8),
        ]);
        let weights: Vec<f64> = consensus.contributions.iter().map(|c| c.weight).collect();
        assert!((weights[0] - 0.4).abs() < 1e-12);
        assert!((weights[1] - 0.4).abs() < 1e-12);
        assert!((weights[2] - 0.8).abs() < 1e-12);
    }

    #[test]
    fn zero_weights_leave_no_consensus() {
        let consensus = aggregate(&[(est(SourceKey::Sportsbook, 0.6, ConfidenceTier::High), 0.0)]);
        assert_eq!(consensus.prob, None);
        assert_eq!(consensus.contributions.len(), 1);
    }

    #[test]
    fn single_source_never_high() {
        let consensus = aggregate(&[(est(SourceKey::Sportsbook, 0.6, ConfidenceTier::High), 1.0)]);
        assert_eq!(consensus.overall_confidence, ConfidenceTier::Medium);
    }

    #[test]
    fn high_requires_independent_corroboration() {
        let two_families = aggregate(&[
            (est(SourceKey::Sportsbook, 0.6, ConfidenceTier::High), 1.0),
            (est(SourceKey::CrossExchange, 0.6, ConfidenceTier::High), 1.0),
        ]);
        assert_eq!(two_families.overall_confidence, ConfidenceTier::High);

        let one_family = aggregate(&[
            (est(SourceKey::CryptoModel, 0.6, ConfidenceTier::High), 1.0),
            (est(SourceKey::EquityModel, 0.6, ConfidenceTier::High), 1.0),
        ]);
        assert_eq!(one_family.overall_confidence, ConfidenceTier::Medium);

        let mostly_low = aggregate(&[
            (est(SourceKey::Sportsbook, 0.6, ConfidenceTier::Medium), 1.0),
            (est(SourceKey::CrowdForecast, 0.6, ConfidenceTier::Low), 1.0),
            (est(SourceKey::LlmReasoner, 0.6, ConfidenceTier::Low), 1.0),
        ]);
        assert_eq!(mostly_low.overall_confidence, ConfidenceTier::Low);
    }

    #[test]
    fn edge_signal_thresholds() {
        assert_eq!(edge_signal(Some(0.15), ConfidenceTier::Medium), EdgeSignal::Strong);
        assert_eq!(edge_signal(Some(-0.15), ConfidenceTier::High), EdgeSignal::Strong);
        assert_eq!(edge_signal(Some(0.15), ConfidenceTier::Low), EdgeSignal::Moderate);
        assert_eq!(edge_signal(Some(0.06), ConfidenceTier::High), EdgeSignal::Moderate);
        assert_eq!(edge_signal(Some(0.03), ConfidenceTier::High), EdgeSignal::Weak);
        assert_eq!(edge_signal(Some(0.01), ConfidenceTier::High), EdgeSignal::None);
        assert_eq!(edge_signal(None, ConfidenceTier::High), EdgeSignal::None);
    }
}
