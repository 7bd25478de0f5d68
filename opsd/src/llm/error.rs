//! Text-generation error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the generator
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::ApiError { status, .. } => *status >= 500,
            LlmError::Network(_) => true,
            LlmError::Timeout(_) => false,
            LlmError::InvalidResponse(_) => false,
            LlmError::Json(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(
            LlmError::ApiError {
                status: 503,
                message: "loading model".to_string()
            }
            .is_retryable()
        );
        assert!(
            !LlmError::ApiError {
                status: 404,
                message: "model not found".to_string()
            }
            .is_retryable()
        );
        // The timeout already is the caller's bound; retrying would exceed it
        assert!(!LlmError::Timeout(Duration::from_secs(1)).is_retryable());
    }
}
