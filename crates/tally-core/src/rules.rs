//! Rule-based classifier
//!
//! A static, ordered table of (matcher, category, base confidence) tested
//! against normalized merchant tokens. The first matching rule wins.
//!
//! ## Table Resolution
//!
//! 1. Explicit path (engine.toml `rules_path` or `TALLY_RULES_PATH`)
//! 2. Override in data dir (~/.local/share/tally/config/rules.toml)
//! 3. Embedded defaults (compiled into binary)

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::Category;

/// Embedded default rule table (compiled into binary)
const DEFAULT_RULES: &str = include_str!("../../../config/rules.toml");

/// How a rule's pattern is matched against a merchant token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    /// Whole-word phrase match, `|` separates alternatives
    Contains,
    /// Regular expression
    Regex,
    /// Token equals the pattern
    Exact,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::Regex => "regex",
            Self::Exact => "exact",
        }
    }
}

impl std::str::FromStr for PatternType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "contains" => Ok(Self::Contains),
            "regex" => Ok(Self::Regex),
            "exact" => Ok(Self::Exact),
            _ => Err(format!("Unknown pattern type: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Phrases(Vec<String>),
    Regex(Regex),
    Exact(String),
}

impl Matcher {
    fn matches(&self, token: &str) -> bool {
        match self {
            Self::Phrases(phrases) => {
                // Pad so " uber trip " only matches on word boundaries
                let padded = format!(" {} ", token);
                phrases
                    .iter()
                    .any(|p| padded.contains(&format!(" {} ", p)))
            }
            Self::Regex(re) => re.is_match(token),
            Self::Exact(pattern) => token == pattern,
        }
    }
}

/// A single classification rule
#[derive(Debug, Clone, Serialize)]
pub struct Rule {
    pub name: String,
    pub pattern: String,
    pub pattern_type: PatternType,
    pub category: Category,
    pub confidence: f64,
    #[serde(skip)]
    matcher: Matcher,
}

impl Rule {
    /// Build a rule, compiling its matcher
    pub fn new(
        name: impl Into<String>,
        pattern: impl Into<String>,
        pattern_type: PatternType,
        category: Category,
        confidence: f64,
    ) -> Result<Self> {
        let name = name.into();
        let pattern = pattern.into();

        if !(0.0..=1.0).contains(&confidence) {
            return Err(Error::Config(format!(
                "Rule '{}': confidence {} is outside [0, 1]",
                name, confidence
            )));
        }

        let matcher = match pattern_type {
            PatternType::Contains => {
                let phrases: Vec<String> = pattern
                    .split('|')
                    .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
                    .filter(|p| !p.is_empty())
                    .collect();
                if phrases.is_empty() {
                    return Err(Error::Config(format!("Rule '{}': empty pattern", name)));
                }
                Matcher::Phrases(phrases)
            }
            PatternType::Regex => Matcher::Regex(Regex::new(&pattern).map_err(|e| {
                Error::Config(format!("Rule '{}': invalid regex: {}", name, e))
            })?),
            PatternType::Exact => {
                let exact = pattern.trim().to_lowercase();
                if exact.is_empty() {
                    return Err(Error::Config(format!("Rule '{}': empty pattern", name)));
                }
                Matcher::Exact(exact)
            }
        };

        Ok(Self {
            name,
            pattern,
            pattern_type,
            category,
            confidence,
            matcher,
        })
    }

    /// Test this rule against a normalized merchant token
    pub fn matches(&self, token: &str) -> bool {
        self.matcher.matches(token)
    }
}

/// Outcome of a rule hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleMatch {
    pub rule: String,
    pub category: Category,
    pub confidence: f64,
}

impl From<&Rule> for RuleMatch {
    fn from(rule: &Rule) -> Self {
        Self {
            rule: rule.name.clone(),
            category: rule.category,
            confidence: rule.confidence,
        }
    }
}

/// Ordered rule table
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<Rule>,
    source: Option<PathBuf>,
}

impl RuleTable {
    /// Load the rule table (explicit path first, then data dir override, then embedded)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        if let Some(default_path) = default_rules_path() {
            if default_path.exists() {
                return Self::from_file(&default_path);
            }
        }
        Self::embedded()
    }

    /// The table compiled into the binary
    pub fn embedded() -> Result<Self> {
        Self::from_toml(DEFAULT_RULES)
    }

    /// Load a table from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read rules {}: {}", path.display(), e))
        })?;
        let mut table = Self::from_toml(&content)?;
        table.source = Some(path.to_path_buf());
        debug!("Loaded {} rules from {}", table.len(), path.display());
        Ok(table)
    }

    /// Parse and validate a table from TOML content
    pub fn from_toml(content: &str) -> Result<Self> {
        let raw: RawRuleTable = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid rules TOML: {}", e)))?;

        let rules = raw
            .rules
            .into_iter()
            .map(|r| {
                let category: Category = r
                    .category
                    .parse()
                    .map_err(|e| Error::Config(format!("Rule '{}': {}", r.name, e)))?;
                Rule::new(r.name, r.pattern, r.pattern_type, category, r.confidence)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rules,
            source: None,
        })
    }

    /// Build a table from already-constructed rules
    pub fn from_rules(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            source: None,
        }
    }

    /// Classify a merchant token; `None` means no rule matched
    pub fn classify(&self, token: &str) -> Option<RuleMatch> {
        self.rules
            .iter()
            .find(|rule| rule.matches(token))
            .map(RuleMatch::from)
    }

    /// Every rule matching the token, in table order (diagnostics)
    pub fn test_rules(&self, token: &str) -> Vec<RuleMatch> {
        self.rules
            .iter()
            .filter(|rule| rule.matches(token))
            .map(RuleMatch::from)
            .collect()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// File the table was loaded from (`None` for embedded)
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

/// Default rule override path
pub fn default_rules_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("tally").join("config").join("rules.toml"))
}

#[derive(Debug, Deserialize)]
struct RawRuleTable {
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    name: String,
    pattern: String,
    #[serde(default = "default_pattern_type")]
    pattern_type: PatternType,
    category: String,
    confidence: f64,
}

fn default_pattern_type() -> PatternType {
    PatternType::Contains
}
