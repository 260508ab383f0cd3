//! AI backend response types
//!
//! These types are backend-agnostic and used across all AI implementations.

use serde::{Deserialize, Serialize};

use crate::models::Category;

/// Raw classification as returned by a backend
///
/// `category` is whatever label the model produced; it is only trusted once
/// mapped onto [`Category`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiClassification {
    #[serde(alias = "label")]
    pub category: String,
    #[serde(alias = "score")]
    pub confidence: f64,
}

/// A classification mapped onto the closed category set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AiVerdict {
    pub category: Category,
    pub confidence: f64,
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls flow normally
    Closed,
    /// Calls are skipped until the recovery wait elapses
    Open,
    /// One probe call is allowed to test recovery
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of the AI tier for health reporting
#[derive(Debug, Clone, Serialize)]
pub struct AiStatus {
    pub backend: String,
    pub model: String,
    pub host: String,
    pub reachable: bool,
    pub breaker: BreakerState,
    pub consecutive_failures: u32,
}
