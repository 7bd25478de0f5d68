//! TextGenerator trait definition

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::LlmError;
use crate::config::LlmConfig;

/// Per-call generation options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub context_size: u32,
    pub thread_hint: Option<u32>,
    pub gpu_hint: Option<u32>,
    /// Ask for blunt, unhedged answers
    pub deep_truth_mode: bool,
}

impl GenerateOptions {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            context_size: config.context_size,
            thread_hint: config.thread_hint,
            gpu_hint: config.gpu_hint,
            deep_truth_mode: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_deep_truth(mut self) -> Self {
        self.deep_truth_mode = true;
        self
    }
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self::from_config(&LlmConfig::default())
    }
}

/// Generated text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub content: String,
}

/// Stateless text generator - each call is independent
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<Generation, LlmError>;
}

/// Wraps a generator so no call can outlive `timeout`
pub struct BoundedGenerator {
    inner: Arc<dyn TextGenerator>,
    timeout: Duration,
}

impl BoundedGenerator {
    pub fn new(inner: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        debug!(?timeout, "BoundedGenerator::new: called");
        Self { inner, timeout }
    }
}

#[async_trait]
impl TextGenerator for BoundedGenerator {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<Generation, LlmError> {
        debug!(prompt_len = prompt.len(), "BoundedGenerator::generate: called");
        match tokio::time::timeout(self.timeout, self.inner.generate(prompt, options)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.timeout, "Generation timed out");
                Err(LlmError::Timeout(self.timeout))
            }
        }
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::debug;

    type Responder = Box<dyn Fn(&str) -> Result<String, LlmError> + Send + Sync>;

    /// Scripted generator for unit tests
    ///
    /// Either replays a fixed list of responses in order, or answers each
    /// prompt through a closure.
    pub struct ScriptedGenerator {
        responses: Vec<String>,
        responder: Option<Responder>,
        call_count: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        pub fn new(responses: Vec<impl Into<String>>) -> Self {
            debug!(response_count = %responses.len(), "ScriptedGenerator::new: called");
            Self {
                responses: responses.into_iter().map(Into::into).collect(),
                responder: None,
                call_count: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn from_fn(f: impl Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static) -> Self {
            Self {
                responses: Vec::new(),
                responder: Some(Box::new(f)),
                call_count: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<Generation, LlmError> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            debug!(%idx, "ScriptedGenerator::generate: called");
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            let content = match &self.responder {
                Some(f) => f(prompt)?,
                None => self
                    .responses
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| LlmError::InvalidResponse("No more mock responses".to_string()))?,
            };
            Ok(Generation { content })
        }
    }

    /// Generator that never answers
    pub struct HangingGenerator;

    #[async_trait]
    impl TextGenerator for HangingGenerator {
        async fn generate(&self, _prompt: &str, _options: &GenerateOptions) -> Result<Generation, LlmError> {
            futures::future::pending::<()>().await;
            Err(LlmError::InvalidResponse("unreachable".to_string()))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_scripted_generator_replays_in_order() {
            let generator = ScriptedGenerator::new(vec!["one", "two"]);
            let opts = GenerateOptions::default();

            assert_eq!(generator.generate("a", &opts).await.unwrap().content, "one");
            assert_eq!(generator.generate("b", &opts).await.unwrap().content, "two");
            assert!(generator.generate("c", &opts).await.is_err());
            assert_eq!(generator.call_count(), 3);
            assert_eq!(generator.prompts(), vec!["a", "b", "c"]);
        }

        #[tokio::test]
        async fn test_bounded_generator_times_out() {
            let bounded = BoundedGenerator::new(Arc::new(HangingGenerator), Duration::from_millis(20));
            let err = bounded.generate("hello", &GenerateOptions::default()).await.unwrap_err();
            assert!(matches!(err, LlmError::Timeout(_)));
        }

        #[tokio::test]
        async fn test_bounded_generator_passes_through() {
            let inner = Arc::new(ScriptedGenerator::new(vec!["fine"]));
            let bounded = BoundedGenerator::new(inner, Duration::from_secs(5));
            let out = bounded.generate("hello", &GenerateOptions::default()).await.unwrap();
            assert_eq!(out.content, "fine");
        }
    }
}
