//! Decay / power-law projection of decelerating count series (views, posts).
//!
//! Three candidate projections to the deadline are blended:
//! linear extrapolation of the recent rate, the recent rate compounded by an
//! hourly decay factor, and a power-law fit `count(t) = exp(C) * t^alpha`.
//! The blend moves toward the power law as data accumulates.

use serde::{Deserialize, Serialize};

use super::normal::{logistic, MIN_MODEL_PROB};

/// Below this much data (hours) only the linear projection is used
pub const MIN_SPAN_HOURS_FOR_ENSEMBLE: f64 = 0.5;
/// Points (after publication) needed before a power-law fit is attempted
pub const MIN_POWER_LAW_POINTS: usize = 4;
/// Smallest probability once the target is already reached
pub const EXCEEDED_FLOOR: f64 = 0.95;
/// Limit approached as the overshoot grows
pub const EXCEEDED_CEILING: f64 = 0.99;

const DECAY_FACTOR_MIN: f64 = 0.5;
const DECAY_FACTOR_MAX: f64 = 1.05;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CountObservation {
    /// Hours since publication
    pub hours: f64,
    pub count: f64,
}

impl CountObservation {
    pub fn new(hours: f64, count: f64) -> Self {
        Self { hours, count }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerLawFit {
    pub alpha: f64,
    pub c: f64,
    pub r_squared: f64,
    pub points: usize,
}

impl PowerLawFit {
    pub fn predict(&self, hours: f64) -> f64 {
        (self.c + self.alpha * hours.ln()).exp()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleWeights {
    pub linear: f64,
    pub decay: f64,
    pub power_law: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VelocityProjection {
    pub current: f64,
    pub projected: f64,
    pub linear: f64,
    pub decay: Option<f64>,
    pub power_law: Option<PowerLawFit>,
    pub weights: EnsembleWeights,
    /// 0..1, grows with point count and time span
    pub data_confidence: f64,
    pub prob: f64,
}

/// OLS on (ln t, ln count). Rejects non-physical exponents outside (0, 2).
pub fn fit_power_law(observations: &[CountObservation]) -> Option<PowerLawFit> {
    let points: Vec<(f64, f64)> = observations
        .iter()
        .filter(|o| o.hours > 0.0 && o.count > 0.0)
        .map(|o| (o.hours.ln(), o.count.ln()))
        .collect();

    if points.len() < MIN_POWER_LAW_POINTS {
        return None;
    }

    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;

    let sxx: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
    let sxy: f64 = points.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
    let syy: f64 = points.iter().map(|p| (p.1 - mean_y).powi(2)).sum();

    if sxx <= f64::EPSILON {
        return None;
    }

    let alpha = sxy / sxx;
    if !(alpha > 0.0 && alpha < 2.0) {
        return None;
    }

    let c = mean_y - alpha * mean_x;
    let r_squared = if syy <= f64::EPSILON {
        1.0
    } else {
        (sxy * sxy) / (sxx * syy)
    };

    Some(PowerLawFit {
        alpha,
        c,
        r_squared,
        points: points.len(),
    })
}

fn rate_between(a: &CountObservation, b: &CountObservation) -> Option<f64> {
    let dh = b.hours - a.hours;
    if dh <= 0.0 {
        return None;
    }
    Some(((b.count - a.count) / dh).max(0.0))
}

/// Probability of finishing at or above `target` given a projection.
///
/// Once the target is already reached the answer rises smoothly from
/// `EXCEEDED_FLOOR` toward `EXCEEDED_CEILING` with the overshoot.
pub fn exceed_probability(current: f64, projected: f64, target: f64, data_confidence: f64) -> f64 {
    if target <= 0.0 {
        return EXCEEDED_CEILING;
    }

    if current >= target {
        let overshoot = current / target - 1.0;
        return EXCEEDED_CEILING - (EXCEEDED_CEILING - EXCEEDED_FLOOR) * (-10.0 * overshoot).exp();
    }

    let steepness = 6.0 + 10.0 * data_confidence.clamp(0.0, 1.0);
    logistic(projected / target, 1.0, steepness).clamp(MIN_MODEL_PROB, EXCEEDED_FLOOR)
}

/// Project a count series to `deadline_hours` after publication.
///
/// Needs at least two observations with increasing timestamps.
pub fn project(
    observations: &[CountObservation],
    deadline_hours: f64,
    target: f64,
) -> Option<VelocityProjection> {
    let mut obs: Vec<CountObservation> = observations
        .iter()
        .copied()
        .filter(|o| o.hours.is_finite() && o.count.is_finite())
        .collect();
    obs.sort_by(|a, b| a.hours.total_cmp(&b.hours));

    if obs.len() < 2 {
        return None;
    }

    let n = obs.len();
    let first = obs[0];
    let last = obs[n - 1];
    let span = last.hours - first.hours;
    if span <= 0.0 {
        return None;
    }

    let remaining = (deadline_hours - last.hours).max(0.0);
    let window = (n / 3).max(2);

    let recent_start = obs[n - window];
    let recent_rate = rate_between(&recent_start, &last)?;
    let linear = last.count + recent_rate * remaining;

    let data_confidence =
        0.5 * (n as f64 / 24.0).min(1.0) + 0.5 * (span / 24.0).min(1.0);

    let (decay, power_law, weights) = if span < MIN_SPAN_HOURS_FOR_ENSEMBLE {
        (
            None,
            None,
            EnsembleWeights {
                linear: 1.0,
                decay: 0.0,
                power_law: 0.0,
            },
        )
    } else {
        let decay = if n >= 4 {
            let early_end = obs[window - 1];
            let early_rate = rate_between(&first, &early_end).filter(|r| *r > 0.0);
            let gap = (last.hours + recent_start.hours) / 2.0 - (early_end.hours + first.hours) / 2.0;
            match early_rate {
                Some(early) if gap > 0.0 => {
                    let factor = (recent_rate / early)
                        .powf(1.0 / gap)
                        .clamp(DECAY_FACTOR_MIN, DECAY_FACTOR_MAX);
                    let ln_f = factor.ln();
                    let integral = if ln_f.abs() < 1e-9 {
                        remaining
                    } else {
                        (factor.powf(remaining) - 1.0) / ln_f
                    };
                    Some(last.count + recent_rate * integral)
                }
                _ => None,
            }
        } else {
            None
        };

        let power_law = fit_power_law(&obs);

        let power_weight = match &power_law {
            Some(fit) => {
                (0.25 + 0.05 * (fit.points - MIN_POWER_LAW_POINTS) as f64).min(0.65) * fit.r_squared
            }
            None => 0.0,
        };
        let rest = 1.0 - power_weight;
        let decay_weight = if decay.is_some() { rest * 0.6 } else { 0.0 };
        let weights = EnsembleWeights {
            linear: rest - decay_weight,
            decay: decay_weight,
            power_law: power_weight,
        };

        (decay, power_law, weights)
    };

    let power_projection = power_law
        .as_ref()
        .map(|fit| fit.predict(deadline_hours.max(last.hours)).max(last.count));

    let projected = weights.linear * linear
        + weights.decay * decay.unwrap_or(0.0)
        + weights.power_law * power_projection.unwrap_or(0.0);

    let prob = exceed_probability(last.count, projected, target, data_confidence);

    Some(VelocityProjection {
        current: last.count,
        projected,
        linear,
        decay,
        power_law,
        weights,
        data_confidence,
        prob,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn power_series(alpha: f64, c: f64, hours: impl Iterator<Item = f64>) -> Vec<CountObservation> {
        hours
            .map(|h| CountObservation::new(h, (c + alpha * h.ln()).exp()))
            .collect()
    }

    #[test]
    fn power_law_fit_recovers_exponent() {
        let obs = power_series(0.6, 1_000f64.ln(), (1..=24).map(|h| h as f64));
        let fit = fit_power_law(&obs).unwrap();
        assert!((fit.alpha - 0.6).abs() < 1e-9);
        assert!((fit.c - 1_000f64.ln()).abs() < 1e-9);
        assert!(fit.r_squared > 0.999_999);
    }

    #[test]
    fn power_law_rejects_non_physical_exponent() {
        let obs = power_series(2.5, 0.0, (1..=10).map(|h| h as f64));
        assert!(fit_power_law(&obs).is_none());

        let short = power_series(0.5, 3.0, (1..=3).map(|h| h as f64));
        assert!(fit_power_law(&short).is_none());
    }

    #[test]
    fn under_thirty_minutes_is_linear_only() {
        let obs = vec![
            CountObservation::new(0.0, 0.0),
            CountObservation::new(0.1, 1_000.0),
            CountObservation::new(0.2, 2_000.0),
            CountObservation::new(0.3, 3_000.0),
        ];
        let proj = project(&obs, 10.3, 200_000.0).unwrap();
        assert_eq!(proj.weights.linear, 1.0);
        assert!(proj.power_law.is_none());
        // 10k/hour for 10 more hours
        assert!((proj.projected - 103_000.0).abs() < 1e-6);
    }

    #[test]
    fn decelerating_series_projects_below_linear() {
        let obs = power_series(0.5, 10_000f64.ln(), (1..=24).map(|h| h as f64));
        let proj = project(&obs, 72.0, 1_000_000.0).unwrap();
        assert!(proj.power_law.is_some());
        assert!(proj.weights.power_law > 0.0);
        assert!(proj.projected < proj.linear + 1e-6);
        // sqrt law predicts 10_000 * sqrt(72) ~= 84_852
        let fit = proj.power_law.unwrap();
        assert!((fit.predict(72.0) - 84_852.8).abs() < 1.0);
    }

    #[test]
    fn exceeded_target_is_smooth_and_bounded() {
        let at = exceed_probability(100.0, 100.0, 100.0, 1.0);
        let over = exceed_probability(120.0, 120.0, 100.0, 1.0);
        let way_over = exceed_probability(1_000.0, 1_000.0, 100.0, 1.0);
        assert!((at - EXCEEDED_FLOOR).abs() < 1e-12);
        assert!(at < over && over < way_over);
        assert!(way_over < EXCEEDED_CEILING + 1e-12);
        assert!(way_over <= 1.0);
    }

    #[test]
    fn more_data_makes_the_curve_steeper() {
        let sparse = exceed_probability(10.0, 80.0, 100.0, 0.0);
        let dense = exceed_probability(10.0, 80.0, 100.0, 1.0);
        assert!(dense < sparse);
        assert!(sparse < 0.5);
    }

    #[test]
    fn too_little_data_yields_none() {
        assert!(project(&[CountObservation::new(1.0, 10.0)], 5.0, 100.0).is_none());
    }
}
