//! Error types for the dexpulse engine

use thiserror::Error;

/// Main error type for the engine
///
/// Variants carry string payloads so errors stay `Clone`: a deduplicated
/// fetch shares one outcome with every joined caller.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Rate limited by upstream")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Check if error is retryable on the next tick
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Backend(_) | EngineError::Timeout { .. } | EngineError::RateLimited
        )
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            EngineError::Timeout {
                operation: "backend request".to_string(),
            }
        } else {
            EngineError::Backend(e.to_string())
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
