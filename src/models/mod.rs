//! Shared quantitative models.
//!
//! Adapters for price-bearing and count-bearing markets call into these
//! instead of re-deriving statistics:
//! - `lognormal`: price-target probability under GBM
//! - `velocity`: decay / power-law projection of view or post counts
//! - `count_rate`: normal approximation for count thresholds

pub mod count_rate;
pub mod lognormal;
pub mod normal;
pub mod velocity;

pub use count_rate::{count_rate_probability, CountRateInput, CountRateOutput, DailyRateStats};
pub use lognormal::{
    price_target_probability, LogReturnStats, PriceDirection, PriceTargetInput, PriceTargetOutput,
};
pub use normal::{clamp_model_prob, normal_cdf, MAX_MODEL_PROB, MIN_MODEL_PROB};
pub use velocity::{fit_power_law, project, CountObservation, PowerLawFit, VelocityProjection};
