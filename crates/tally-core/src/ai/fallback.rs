//! AI fallback tier: timeout and circuit breaker around an [`AIClient`]
//!
//! Any failure (timeout, transport error, unparseable reply, label outside
//! the category set) is reported as "no result" so a degraded classifier
//! never stalls categorization.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::models::Category;

use super::types::{AiStatus, AiVerdict, BreakerState};
use super::{AIBackend, AIClient};

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// When the half-open probe was handed out
    probe_started: Option<Instant>,
}

/// Consecutive-failure circuit breaker
///
/// Closed until `failure_threshold` failures in a row, then open for
/// `recovery_wait`. After that a single probe call is let through
/// (half-open); its outcome closes or re-opens the circuit.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_wait: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_wait: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_wait,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_started: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // Counters stay meaningful even if a holder panicked
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask permission to make a call
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let ready = inner
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.recovery_wait);
                if ready {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_started = Some(Instant::now());
                    debug!("AI circuit half-open, allowing probe");
                }
                ready
            }
            BreakerState::HalfOpen => {
                // A probe whose caller went away must not wedge the breaker
                let stale = inner
                    .probe_started
                    .map_or(true, |at| at.elapsed() >= self.recovery_wait);
                if stale {
                    inner.probe_started = Some(Instant::now());
                }
                stale
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != BreakerState::Closed {
            info!("AI circuit closed after successful probe");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_started = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        let trip = inner.state == BreakerState::HalfOpen
            || inner.consecutive_failures >= self.failure_threshold;
        if trip {
            if inner.state != BreakerState::Open {
                warn!(
                    failures = inner.consecutive_failures,
                    "AI circuit opened for {:?}", self.recovery_wait
                );
            }
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
            inner.probe_started = None;
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }
}

/// The AI tier as seen by the orchestrator
pub struct AiFallback {
    client: AIClient,
    timeout: Duration,
    breaker: CircuitBreaker,
}

impl AiFallback {
    pub fn new(client: AIClient, timeout: Duration, breaker: CircuitBreaker) -> Self {
        Self {
            client,
            timeout,
            breaker,
        }
    }

    /// Build from engine config; `None` when the AI tier is disabled
    pub fn from_config(client: AIClient, config: &EngineConfig) -> Option<Self> {
        if !config.ai_enabled {
            return None;
        }
        Some(Self::new(
            client,
            config.ai_timeout,
            CircuitBreaker::new(config.breaker_failure_threshold, config.breaker_recovery),
        ))
    }

    pub fn client(&self) -> &AIClient {
        &self.client
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Classify a cleaned description; any failure is "no result"
    pub async fn classify(&self, text: &str) -> Option<AiVerdict> {
        match self.try_classify(text).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("AI fallback unavailable: {}", e);
                None
            }
        }
    }

    /// Classify, reporting why no result was produced
    ///
    /// `Ok(None)` means the backend answered with a label outside the
    /// category set.
    pub async fn try_classify(&self, text: &str) -> Result<Option<AiVerdict>> {
        if !self.breaker.try_acquire() {
            return Err(Error::AiUnavailable("circuit open".into()));
        }

        let outcome = tokio::time::timeout(self.timeout, self.client.classify_merchant(text)).await;

        let classification = match outcome {
            Ok(Ok(c)) => {
                self.breaker.record_success();
                c
            }
            Ok(Err(e)) => {
                self.breaker.record_failure();
                return Err(e);
            }
            Err(_) => {
                self.breaker.record_failure();
                return Err(Error::AiTimeout(self.timeout));
            }
        };

        match classification.category.parse::<Category>() {
            Ok(category) => {
                debug!(
                    category = %category,
                    confidence = classification.confidence,
                    "AI classified '{}'", text
                );
                Ok(Some(AiVerdict {
                    category,
                    confidence: classification.confidence,
                }))
            }
            Err(_) => {
                debug!(
                    "AI returned unknown category '{}' for '{}'",
                    classification.category, text
                );
                Ok(None)
            }
        }
    }

    /// Current health of the AI tier
    pub async fn status(&self) -> AiStatus {
        AiStatus {
            backend: self.client.backend_name().to_string(),
            model: self.client.model().to_string(),
            host: self.client.host().to_string(),
            reachable: self.client.health_check().await,
            breaker: self.breaker.state(),
            consecutive_failures: self.breaker.consecutive_failures(),
        }
    }
}
