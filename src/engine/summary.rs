use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::{EdgeGrade, EdgeSignal, FusedSignal};

/// Grade distribution and coverage over one batch run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    /// Fusions that produced a consensus
    pub with_signal: usize,
    /// Fusions with at least two contributing sources
    pub multi_source: usize,
    pub grade_counts: BTreeMap<EdgeGrade, usize>,
    pub strong_edges: usize,
    /// Mean edge quality over fusions with a signal
    pub mean_quality: Option<f64>,
}

impl BatchSummary {
    pub fn from_signals(signals: &[FusedSignal]) -> Self {
        let mut grade_counts: BTreeMap<EdgeGrade, usize> =
            [EdgeGrade::A, EdgeGrade::B, EdgeGrade::C, EdgeGrade::D]
                .into_iter()
                .map(|g| (g, 0))
                .collect();
        for signal in signals {
            *grade_counts.entry(signal.edge_grade).or_insert(0) += 1;
        }

        let qualities: Vec<f64> = signals
            .iter()
            .filter(|s| s.has_signal())
            .map(|s| s.edge_quality as f64)
            .collect();
        let mean_quality = (!qualities.is_empty())
            .then(|| qualities.iter().sum::<f64>() / qualities.len() as f64);

        Self {
            total: signals.len(),
            with_signal: qualities.len(),
            multi_source: signals.iter().filter(|s| s.source_count >= 2).count(),
            grade_counts,
            strong_edges: signals
                .iter()
                .filter(|s| s.edge_signal == EdgeSignal::Strong)
                .count(),
            mean_quality,
        }
    }

    /// Share of fusions backed by two or more sources
    pub fn multi_source_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.multi_source as f64 / self.total as f64
        }
    }

    pub fn grade(&self, grade: EdgeGrade) -> usize {
        self.grade_counts.get(&grade).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ConfidenceTier;
    use chrono::Utc;

    fn signal(prob: Option<f64>, sources: usize, quality: u8, edge: EdgeSignal) -> FusedSignal {
        FusedSignal {
            consensus_prob: prob,
            overall_confidence: ConfidenceTier::Medium,
            market_price: Some(0.5),
            divergence: prob.map(|p| p - 0.5),
            edge_signal: edge,
            edge_direction: None,
            edge_quality: quality,
            edge_grade: EdgeGrade::from_quality(quality),
            source_breakdown: Vec::new(),
            source_count: sources,
            absences: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn counts_grades_and_coverage() {
        let summary = BatchSummary::from_signals(&[
            signal(Some(0.7), 3, 80, EdgeSignal::Strong),
            signal(Some(0.6), 1, 20, EdgeSignal::Moderate),
            signal(None, 0, 0, EdgeSignal::None),
            signal(Some(0.52), 2, 60, EdgeSignal::Weak),
        ]);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.with_signal, 3);
        assert_eq!(summary.multi_source, 2);
        assert_eq!(summary.strong_edges, 1);
        assert_eq!(summary.grade(EdgeGrade::A), 1);
        assert_eq!(summary.grade(EdgeGrade::B), 1);
        assert_eq!(summary.grade(EdgeGrade::C), 0);
        assert_eq!(summary.grade(EdgeGrade::D), 2);
        assert!((summary.mean_quality.unwrap() - 160.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.multi_source_rate(), 0.5);
    }

    #[test]
    fn empty_batch() {
        let summary = BatchSummary::from_signals(&[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.mean_quality, None);
        assert_eq!(summary.multi_source_rate(), 0.0);
    }
}
