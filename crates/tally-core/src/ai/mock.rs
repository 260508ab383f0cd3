//! Mock backend for testing
//!
//! Returns canned classifications for well-known merchants and can be switched
//! into failing or slow modes to exercise timeouts and the circuit breaker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::types::AiClassification;
use super::AIBackend;

/// How the mock behaves on every call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockMode {
    Normal,
    /// Every call errors
    Failing,
    /// Every call sleeps before answering
    Slow(Duration),
}

/// Mock AI backend for testing
#[derive(Clone)]
pub struct MockBackend {
    /// Whether health_check should return true
    pub healthy: bool,
    mode: MockMode,
    /// Extra (needle, category, confidence) answers checked before the built-ins
    responses: Vec<(String, String, f64)>,
    calls: Arc<AtomicUsize>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create a new mock backend (healthy by default)
    pub fn new() -> Self {
        Self {
            healthy: true,
            mode: MockMode::Normal,
            responses: Vec::new(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create an unhealthy mock backend whose calls fail
    pub fn unhealthy() -> Self {
        Self {
            healthy: false,
            ..Self::failing()
        }
    }

    pub fn failing() -> Self {
        Self {
            mode: MockMode::Failing,
            ..Self::new()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            mode: MockMode::Slow(delay),
            ..Self::new()
        }
    }

    /// Answer `category`/`confidence` for descriptions containing `needle`
    pub fn with_response(mut self, needle: &str, category: &str, confidence: f64) -> Self {
        self.responses
            .push((needle.to_uppercase(), category.to_string(), confidence));
        self
    }

    /// Number of classify calls made so far (shared across clones)
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn answer(&self, text: &str) -> AiClassification {
        let upper = text.to_uppercase();

        if let Some((_, category, confidence)) = self
            .responses
            .iter()
            .find(|(needle, _, _)| upper.contains(needle.as_str()))
        {
            return AiClassification {
                category: category.clone(),
                confidence: *confidence,
            };
        }

        let (category, confidence) = match upper.as_str() {
            m if m.contains("STARBUCKS") => ("Meals & Entertainment", 0.55),
            m if m.contains("NETFLIX") || m.contains("SPOTIFY") => {
                ("Software & Subscriptions", 0.8)
            }
            m if m.contains("AMAZON") || m.contains("AMZN") => ("Office Supplies", 0.6),
            m if m.contains("DELTA") || m.contains("UNITED") => ("Travel", 0.9),
            m if m.contains("HOME DEPOT") => ("Equipment", 0.7),
            // A label outside the category set
            _ => ("Miscellaneous", 0.3),
        };

        AiClassification {
            category: category.to_string(),
            confidence,
        }
    }
}

#[async_trait]
impl AIBackend for MockBackend {
    async fn classify_merchant(&self, text: &str) -> Result<AiClassification> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match self.mode {
            MockMode::Normal => Ok(self.answer(text)),
            MockMode::Failing => Err(Error::AiUnavailable("mock backend failure".into())),
            MockMode::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.answer(text))
            }
        }
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn host(&self) -> &str {
        "mock://localhost"
    }
}
