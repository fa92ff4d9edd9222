/// Lowest probability a model may report. Markets never resolve with model certainty.
pub const MIN_MODEL_PROB: f64 = 0.02;
/// Highest probability a model may report
pub const MAX_MODEL_PROB: f64 = 0.98;

/// Standard normal CDF approximation (Abramowitz-Stegun 7.1.26)
/// Max absolute error ~1.5e-7
pub fn normal_cdf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let z = x.abs() / std::f64::consts::SQRT_2;

    let t = 1.0 / (1.0 + p * z);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-z * z).exp();

    0.5 * (1.0 + sign * y)
}

/// Clamp a model output into [MIN_MODEL_PROB, MAX_MODEL_PROB]
pub fn clamp_model_prob(p: f64) -> f64 {
    if p.is_nan() {
        return 0.5;
    }
    p.clamp(MIN_MODEL_PROB, MAX_MODEL_PROB)
}

/// Logistic function with steepness `k` centered at `center`
pub fn logistic(x: f64, center: f64, k: f64) -> f64 {
    1.0 / (1.0 + (-k * (x - center)).exp())
}
