use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::cache::LaneConfig;
use crate::domain::SourceKey;
use crate::engine::EdgeQualityPolicy;
use crate::error::{FuseError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub fusion: FusionSettings,
    pub sources: SourcesConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub quality: EdgeQualityPolicy,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    /// Fusions allowed in flight at once during a batch run
    pub max_concurrent_fusions: usize,
    /// Append every fused signal to the history sink
    pub record_history: bool,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            max_concurrent_fusions: 4,
            record_history: true,
        }
    }
}

/// Per-source overrides. Unset weight/timeout fall back to the source default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub enabled: bool,
    pub weight: Option<f64>,
    pub timeout_ms: Option<u64>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: None,
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub sportsbook: SourceSettings,
    pub crypto_model: SourceSettings,
    pub equity_model: SourceSettings,
    pub view_velocity: SourceSettings,
    pub post_count: SourceSettings,
    pub crowd_forecast: SourceSettings,
    pub cross_exchange: SourceSettings,
    pub llm_reasoner: SourceSettings,
}

/// Resolved settings the engine runs a source with
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourcePolicy {
    pub enabled: bool,
    pub weight: f64,
    pub timeout: Duration,
}

impl SourcesConfig {
    pub fn get(&self, key: SourceKey) -> &SourceSettings {
        match key {
            SourceKey::Sportsbook => &self.sportsbook,
            SourceKey::CryptoModel => &self.crypto_model,
            SourceKey::EquityModel => &self.equity_model,
            SourceKey::ViewVelocity => &self.view_velocity,
            SourceKey::PostCount => &self.post_count,
            SourceKey::CrowdForecast => &self.crowd_forecast,
            SourceKey::CrossExchange => &self.cross_exchange,
            SourceKey::LlmReasoner => &self.llm_reasoner,
        }
    }

    pub fn get_mut(&mut self, key: SourceKey) -> &mut SourceSettings {
        match key {
            SourceKey::Sportsbook => &mut self.sportsbook,
            SourceKey::CryptoModel => &mut self.crypto_model,
            SourceKey::EquityModel => &mut self.equity_model,
            SourceKey::ViewVelocity => &mut self.view_velocity,
            SourceKey::PostCount => &mut self.post_count,
            SourceKey::CrowdForecast => &mut self.crowd_forecast,
            SourceKey::CrossExchange => &mut self.cross_exchange,
            SourceKey::LlmReasoner => &mut self.llm_reasoner,
        }
    }

    pub fn resolve(&self, key: SourceKey) -> SourcePolicy {
        let settings = self.get(key);
        SourcePolicy {
            enabled: settings.enabled,
            weight: settings.weight.unwrap_or_else(|| default_weight(key)),
            timeout: Duration::from_millis(
                settings.timeout_ms.unwrap_or_else(|| default_timeout_ms(key)),
            ),
        }
    }
}

/// Base weight of a source before confidence adjustment
pub fn default_weight(key: SourceKey) -> f64 {
    match key {
        SourceKey::Sportsbook => 1.0,
        SourceKey::CrossExchange => 0.9,
        SourceKey::CryptoModel | SourceKey::EquityModel => 0.8,
        SourceKey::ViewVelocity | SourceKey::PostCount => 0.7,
        SourceKey::CrowdForecast => 0.6,
        SourceKey::LlmReasoner => 0.3,
    }
}

/// Deadline per source, longer for slower or flakier upstreams
pub fn default_timeout_ms(key: SourceKey) -> u64 {
    match key {
        SourceKey::CryptoModel | SourceKey::EquityModel => 5_000,
        SourceKey::Sportsbook | SourceKey::CrossExchange => 8_000,
        SourceKey::ViewVelocity | SourceKey::PostCount => 10_000,
        SourceKey::CrowdForecast => 12_000,
        SourceKey::LlmReasoner => 15_000,
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Sportsbook odds
    pub odds_ttl_secs: u64,
    /// Spot prices and price history
    pub price_ttl_secs: u64,
    /// Crowd forecasts and count series
    pub forecast_ttl_secs: u64,
    pub llm_ttl_secs: u64,
    /// Cross-platform question-match decisions
    pub match_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            odds_ttl_secs: 300,
            price_ttl_secs: 300,
            forecast_ttl_secs: 1_800,
            llm_ttl_secs: 1_800,
            match_ttl_secs: 86_400,
        }
    }
}

impl CacheConfig {
    pub fn odds_ttl(&self) -> Duration {
        Duration::from_secs(self.odds_ttl_secs)
    }

    pub fn price_ttl(&self) -> Duration {
        Duration::from_secs(self.price_ttl_secs)
    }

    pub fn forecast_ttl(&self) -> Duration {
        Duration::from_secs(self.forecast_ttl_secs)
    }

    pub fn llm_ttl(&self) -> Duration {
        Duration::from_secs(self.llm_ttl_secs)
    }

    pub fn match_ttl(&self) -> Duration {
        Duration::from_secs(self.match_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Calls per minute allowed by the rate-limited price provider
    pub calls_per_minute: u32,
    /// Extra attempts after a rate-limited response
    pub max_retries: u32,
    /// First backoff delay in milliseconds
    pub backoff_base_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            calls_per_minute: 30,
            max_retries: 2,
            backoff_base_ms: 2_000,
        }
    }
}

impl RateLimitConfig {
    pub fn lane_config(&self) -> LaneConfig {
        LaneConfig {
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            ..LaneConfig::per_minute(self.calls_per_minute)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
    /// Directory for the daily rolling log file; console only when unset
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            log_dir: None,
        }
    }
}

impl FusionConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("POLYFUSE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (POLYFUSE__SOURCES__SPORTSBOOK__WEIGHT, etc.)
            .add_source(
                Environment::with_prefix("POLYFUSE")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: FusionConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document (unset keys take defaults)
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: FusionConfig = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make fusion meaningless. Run at startup.
    pub fn validate(&self) -> Result<()> {
        for key in SourceKey::ALL {
            let policy = self.sources.resolve(key);
            if !policy.weight.is_finite() || policy.weight < 0.0 {
                return Err(FuseError::InvalidConfig(format!(
                    "sources.{}.weight must be a non-negative number, got {}",
                    key, policy.weight
                )));
            }
            if policy.enabled && policy.timeout.is_zero() {
                return Err(FuseError::InvalidConfig(format!(
                    "sources.{}.timeout_ms must be positive for an enabled source",
                    key
                )));
            }
        }

        let ttls = [
            ("odds_ttl_secs", self.cache.odds_ttl_secs),
            ("price_ttl_secs", self.cache.price_ttl_secs),
            ("forecast_ttl_secs", self.cache.forecast_ttl_secs),
            ("llm_ttl_secs", self.cache.llm_ttl_secs),
            ("match_ttl_secs", self.cache.match_ttl_secs),
        ];
        if let Some((name, _)) = ttls.iter().find(|(_, ttl)| *ttl == 0) {
            return Err(FuseError::InvalidConfig(format!(
                "cache.{} must be positive",
                name
            )));
        }

        if self.fusion.max_concurrent_fusions == 0 {
            return Err(FuseError::InvalidConfig(
                "fusion.max_concurrent_fusions must be at least 1".to_string(),
            ));
        }

        if self.rate_limit.calls_per_minute == 0 {
            return Err(FuseError::InvalidConfig(
                "rate_limit.calls_per_minute must be at least 1".to_string(),
            ));
        }

        self.quality.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = FusionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sources.resolve(SourceKey::Sportsbook).weight, 1.0);
        assert_eq!(
            config.sources.resolve(SourceKey::LlmReasoner).timeout,
            Duration::from_secs(15)
        );
        assert_eq!(config.cache.match_ttl(), Duration::from_secs(86_400));
    }

    #[test]
    fn partial_toml_keeps_source_defaults() {
        let config = FusionConfig::from_toml_str(
            r#"
            [fusion]
            max_concurrent_fusions = 8

            [sources.llm_reasoner]
            enabled = false

            [sources.sportsbook]
            weight = 1.5
            "#,
        )
        .unwrap();

        assert_eq!(config.fusion.max_concurrent_fusions, 8);
        assert!(config.fusion.record_history);
        assert!(!config.sources.resolve(SourceKey::LlmReasoner).enabled);

        let sportsbook = config.sources.resolve(SourceKey::Sportsbook);
        assert_eq!(sportsbook.weight, 1.5);
        assert_eq!(sportsbook.timeout, Duration::from_millis(8_000));
    }

    #[test]
    fn negative_weight_fails_fast() {
        let err = FusionConfig::from_toml_str(
            r#"
            [sources.crowd_forecast]
            weight = -0.2
            "#,
        )
        .unwrap_err();
        match err {
            FuseError::InvalidConfig(msg) => assert!(msg.contains("crowd_forecast")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn zero_ttl_and_zero_timeout_are_rejected() {
        let mut config = FusionConfig::default();
        config.cache.odds_ttl_secs = 0;
        assert!(config.validate().is_err());

        let mut config = FusionConfig::default();
        config.sources.get_mut(SourceKey::PostCount).timeout_ms = Some(0);
        assert!(config.validate().is_err());

        config.sources.get_mut(SourceKey::PostCount).enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rate_limit_maps_to_lane() {
        let lane = RateLimitConfig::default().lane_config();
        assert_eq!(lane.min_interval, Duration::from_secs(2));
        assert_eq!(lane.max_retries, 2);
        assert_eq!(lane.backoff_base, Duration::from_secs(2));
    }
}
