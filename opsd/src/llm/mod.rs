//! Text-generation client module
//!
//! Provides the generator trait, a timeout wrapper, the Ollama HTTP client
//! and the structured-response parser.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

pub mod client;
mod error;
mod ollama;
mod parse;

pub use client::{BoundedGenerator, GenerateOptions, Generation, TextGenerator};
#[cfg(test)]
pub use client::mock;
pub use error::LlmError;
pub use ollama::OllamaClient;
pub use parse::{ParseError, ParsedResponse, parse_response, parse_typed};

use crate::config::LlmConfig;

/// Create a timeout-bounded generator for the configured provider
pub fn create_generator(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>, LlmError> {
    debug!(provider = %config.provider, model = %config.model, "create_generator: called");
    let inner: Arc<dyn TextGenerator> = match config.provider.as_str() {
        "ollama" => {
            debug!("create_generator: creating Ollama client");
            Arc::new(OllamaClient::from_config(config)?)
        }
        other => {
            debug!(provider = %other, "create_generator: unknown provider");
            return Err(LlmError::InvalidResponse(format!(
                "Unknown LLM provider: '{}'. Supported: ollama",
                other
            )));
        }
    };
    Ok(Arc::new(BoundedGenerator::new(
        inner,
        Duration::from_millis(config.timeout_ms),
    )))
}
