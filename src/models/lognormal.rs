//! Log-normal price-target model.
//!
//! P(S_T > K) under geometric Brownian motion with drift `mu` and volatility
//! `sigma` per unit of time (the adapters use days):
//!
//! z = (ln(K/S0) - (mu - sigma^2/2) T) / (sigma sqrt(T)),  P = 1 - Phi(z)
//!
//! Horizons shorter than one unit blend in recent momentum, since pure
//! diffusion underperforms there.

use serde::{Deserialize, Serialize};

use super::normal::{clamp_model_prob, normal_cdf, MAX_MODEL_PROB, MIN_MODEL_PROB};

/// Largest weight momentum can take (reached as the horizon goes to zero)
pub const MAX_MOMENTUM_WEIGHT: f64 = 0.35;
/// Probability shift momentum applies in its favoured direction
pub const MOMENTUM_TILT: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PriceDirection {
    Above,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceTargetInput {
    pub spot: f64,
    pub target: f64,
    pub direction: PriceDirection,
    /// Time to deadline, same unit as `drift` and `volatility`
    pub horizon: f64,
    pub drift: f64,
    pub volatility: f64,
    /// Most recent return (sign is what matters) for short-horizon blending
    pub recent_return: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceTargetOutput {
    pub prob: f64,
    /// `None` for the degenerate branches
    pub z: Option<f64>,
    pub momentum_weight: f64,
}

/// Mean and standard deviation of log returns
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogReturnStats {
    pub mean: f64,
    pub stddev: f64,
    pub samples: usize,
}

impl LogReturnStats {
    /// Stats over consecutive closes. Needs at least three closes.
    pub fn from_closes(closes: &[f64]) -> Option<Self> {
        let returns: Vec<f64> = closes
            .windows(2)
            .filter(|w| w[0] > 0.0 && w[1] > 0.0)
            .map(|w| (w[1] / w[0]).ln())
            .collect();

        if returns.len() < 2 {
            return None;
        }

        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);

        Some(Self {
            mean,
            stddev: variance.sqrt(),
            samples: returns.len(),
        })
    }
}

/// Probability that the price finishes on the `direction` side of `target`.
///
/// Returns `None` only for non-positive prices; every other degenerate input
/// has a deterministic answer clamped to [0.02, 0.98].
pub fn price_target_probability(input: &PriceTargetInput) -> Option<PriceTargetOutput> {
    if !(input.spot > 0.0) || !(input.target > 0.0) {
        return None;
    }

    if input.volatility <= 0.0 || input.horizon <= 0.0 {
        let projected = if input.horizon > 0.0 {
            input.spot * (input.drift * input.horizon).exp()
        } else {
            input.spot
        };
        let above = projected > input.target;
        let prob = match (input.direction, above) {
            (PriceDirection::Above, true) | (PriceDirection::Below, false) => MAX_MODEL_PROB,
            _ => MIN_MODEL_PROB,
        };
        return Some(PriceTargetOutput {
            prob,
            z: None,
            momentum_weight: 0.0,
        });
    }

    let sigma_sqrt_t = input.volatility * input.horizon.sqrt();
    let z = ((input.target / input.spot).ln()
        - (input.drift - input.volatility.powi(2) / 2.0) * input.horizon)
        / sigma_sqrt_t;

    let p_above = 1.0 - normal_cdf(z);
    let mut prob = match input.direction {
        PriceDirection::Above => p_above,
        PriceDirection::Below => 1.0 - p_above,
    };

    let mut momentum_weight = 0.0;
    if input.horizon < 1.0 {
        if let Some(ret) = input.recent_return.filter(|r| *r != 0.0) {
            momentum_weight = MAX_MOMENTUM_WEIGHT * (1.0 - input.horizon);
            let favours = match input.direction {
                PriceDirection::Above => ret > 0.0,
                PriceDirection::Below => ret < 0.0,
            };
            let tilt = if favours { MOMENTUM_TILT } else { -MOMENTUM_TILT };
            let momentum_prob = clamp_model_prob(prob + tilt);
            prob = (1.0 - momentum_weight) * prob + momentum_weight * momentum_prob;
        }
    }

    Some(PriceTargetOutput {
        prob: clamp_model_prob(prob),
        z: Some(z),
        momentum_weight,
    })
}
