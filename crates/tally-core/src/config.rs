//! Engine configuration
//!
//! ## Configuration Resolution
//!
//! 1. Explicit path (`--config`)
//! 2. Override in data dir (~/.local/share/tally/config/engine.toml)
//! 3. Embedded defaults (compiled into binary)
//!
//! Environment variables are applied on top of whichever file was used.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::policy::{ReviewPolicy, DEFAULT_REVIEW_THRESHOLD};
use crate::recategorize::DEFAULT_BATCH_SIZE;

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/engine.toml");

pub const REVIEW_THRESHOLD_ENV: &str = "TALLY_REVIEW_THRESHOLD";
pub const AI_TIMEOUT_ENV: &str = "TALLY_AI_TIMEOUT_SECS";
pub const RULES_PATH_ENV: &str = "TALLY_RULES_PATH";
pub const BATCH_SIZE_ENV: &str = "TALLY_BATCH_SIZE";

/// Runtime configuration for the categorization engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Rule/AI results below this are flagged for review
    pub review_threshold: f64,
    /// Custom rule table (embedded table when `None`)
    pub rules_path: Option<PathBuf>,
    /// Whether the AI tier is consulted at all
    pub ai_enabled: bool,
    pub ai_timeout: Duration,
    pub breaker_failure_threshold: u32,
    pub breaker_recovery: Duration,
    /// Transactions per bulk job batch
    pub batch_size: i64,
    /// File the config was read from (`None` for embedded)
    pub source: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            review_threshold: DEFAULT_REVIEW_THRESHOLD,
            rules_path: None,
            ai_enabled: true,
            ai_timeout: Duration::from_secs(10),
            breaker_failure_threshold: 3,
            breaker_recovery: Duration::from_secs(300),
            batch_size: DEFAULT_BATCH_SIZE,
            source: None,
        }
    }
}

impl EngineConfig {
    /// Load config from file layers, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from file layers only
    pub fn load_file(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        if let Some(default_path) = default_config_path() {
            if default_path.exists() {
                return Self::from_file(&default_path);
            }
        }
        Self::from_toml(DEFAULT_CONFIG)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml(&content)?;
        config.source = Some(path.to_path_buf());
        debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Parse config from TOML content; missing keys keep their defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))?;

        let mut config = Self::default();

        if let Some(cat) = raw.categorization {
            if let Some(threshold) = cat.review_threshold {
                config.review_threshold = threshold;
            }
            if let Some(path) = cat.rules_path {
                config.rules_path = Some(PathBuf::from(path));
            }
        }

        if let Some(ai) = raw.ai {
            if let Some(enabled) = ai.enabled {
                config.ai_enabled = enabled;
            }
            if let Some(secs) = ai.timeout_secs {
                config.ai_timeout = Duration::from_secs(secs);
            }
            if let Some(threshold) = ai.breaker_failure_threshold {
                config.breaker_failure_threshold = threshold;
            }
            if let Some(secs) = ai.breaker_recovery_secs {
                config.breaker_recovery = Duration::from_secs(secs);
            }
        }

        if let Some(jobs) = raw.jobs {
            if let Some(size) = jobs.batch_size {
                config.batch_size = size;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply `TALLY_*` overrides using the given variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(REVIEW_THRESHOLD_ENV) {
            self.review_threshold = parse_env(REVIEW_THRESHOLD_ENV, &value)?;
        }
        if let Some(value) = lookup(AI_TIMEOUT_ENV) {
            self.ai_timeout = Duration::from_secs(parse_env(AI_TIMEOUT_ENV, &value)?);
        }
        if let Some(value) = lookup(RULES_PATH_ENV) {
            if !value.trim().is_empty() {
                self.rules_path = Some(PathBuf::from(value.trim()));
            }
        }
        if let Some(value) = lookup(BATCH_SIZE_ENV) {
            self.batch_size = parse_env(BATCH_SIZE_ENV, &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        // Reuse the policy's own range check
        ReviewPolicy::new(self.review_threshold)?;

        if self.batch_size <= 0 {
            return Err(Error::Config(format!(
                "batch_size must be positive, got {}",
                self.batch_size
            )));
        }
        if self.ai_timeout.is_zero() {
            return Err(Error::Config("AI timeout must be at least 1 second".into()));
        }
        if self.breaker_failure_threshold == 0 {
            return Err(Error::Config(
                "breaker_failure_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// The review policy for this config
    pub fn review_policy(&self) -> Result<ReviewPolicy> {
        ReviewPolicy::new(self.review_threshold)
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("tally").join("config").join("engine.toml"))
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid {}='{}': {}", key, value, e)))
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    categorization: Option<RawCategorization>,
    ai: Option<RawAi>,
    jobs: Option<RawJobs>,
}

#[derive(Debug, Deserialize)]
struct RawCategorization {
    review_threshold: Option<f64>,
    rules_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAi {
    enabled: Option<bool>,
    timeout_secs: Option<u64>,
    breaker_failure_threshold: Option<u32>,
    breaker_recovery_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawJobs {
    batch_size: Option<i64>,
}
