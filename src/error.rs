use thiserror::Error;

/// Main error type for the fusion engine and its adapters
#[derive(Error, Debug)]
pub enum FuseError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Upstream returned status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("Deadline exceeded: {0}")]
    Timeout(String),

    #[error("Cache refresh failed ({cache}): {reason}")]
    RefreshFailed { cache: &'static str, reason: String },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Data errors
    #[error("Invalid upstream data: {0}")]
    InvalidData(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl FuseError {
    /// Whether the request lane should back off and retry this failure
    pub fn is_rate_limited(&self) -> bool {
        match self {
            FuseError::RateLimited(_) => true,
            FuseError::UpstreamStatus { status, .. } => *status == 429,
            _ => false,
        }
    }
}

/// Result type alias for FuseError
pub type Result<T> = std::result::Result<T, FuseError>;
