//! Tally Core Library
//!
//! Transaction categorization engine:
//! - Merchant token normalization
//! - Learned pattern store (per-user corrections, SQLite)
//! - Rule table classifier (embedded TOML with file override)
//! - AI fallback tier (Ollama) behind a timeout and circuit breaker
//! - Confidence and review policy
//! - Categorization orchestrator, corrections and bulk re-categorization jobs

pub mod ai;
pub mod categorize;
pub mod config;
pub mod corrections;
pub mod db;
pub mod error;
pub mod import;
pub mod models;
pub mod normalize;
pub mod policy;
pub mod recategorize;
pub mod rules;

/// Test utilities including mock Ollama server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use ai::{AIBackend, AIClient, AiFallback, AiStatus, CircuitBreaker, MockBackend, OllamaBackend};
pub use categorize::{CategorizeResult, Categorizer, IngestResult, ProgressCallback, Resolution};
pub use config::EngineConfig;
pub use corrections::correct_category;
pub use db::{AuditEntry, Database, TransactionInsertResult};
pub use error::{Error, Result};
pub use models::{
    CategorizationMethod, CategorizedTransaction, Category, JobStatus, LearnedPattern,
    NewTransaction, RecategorizeJob, TierBreakdown, Transaction,
};
pub use normalize::normalize_merchant;
pub use policy::{ReviewPolicy, Verdict};
pub use rules::{RuleMatch, RuleTable};
