//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `Engine` - Config, rule table and AI tier loaded once per command
//! - `cmd_init` - Initialize the database
//! - `cmd_categories` - Print the category set

use std::path::Path;

use anyhow::{Context, Result};
use tally_core::ai::{AIBackend, AIClient, AiFallback};
use tally_core::models::Category;
use tally_core::{Categorizer, Database, EngineConfig, RuleTable};
use tracing::debug;

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path must be valid UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Everything a categorizing command needs besides the database
pub struct Engine {
    pub config: EngineConfig,
    pub rules: RuleTable,
    pub ai: Option<AiFallback>,
}

impl Engine {
    /// Load config and rules; the AI tier comes from OLLAMA_HOST / AI_BACKEND
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = EngineConfig::load(config_path).context("Failed to load engine config")?;
        let rules = RuleTable::load(config.rules_path.as_deref())
            .context("Failed to load rule table")?;
        let ai = AIClient::from_env().and_then(|client| AiFallback::from_config(client, &config));
        debug!(
            config = ?config.source,
            rules = rules.len(),
            ai = ai.is_some(),
            "Loaded engine"
        );
        Ok(Self::new(config, rules, ai))
    }

    pub fn new(config: EngineConfig, rules: RuleTable, ai: Option<AiFallback>) -> Self {
        Self { config, rules, ai }
    }

    pub fn categorizer<'a>(&'a self, db: &'a Database) -> Result<Categorizer<'a>> {
        Ok(Categorizer::new(
            db,
            &self.rules,
            self.ai.as_ref(),
            self.config.review_policy()?,
        ))
    }

    /// Print which tiers are active
    pub fn describe(&self) {
        println!("   📏 Rules: {}", self.rules.len());
        match self.ai {
            Some(ref ai) => println!(
                "   🤖 AI fallback: {} ({}, timeout {}s)",
                ai.client().host(),
                ai.client().model(),
                ai.timeout().as_secs()
            ),
            None => println!("   💡 Tip: Set OLLAMA_HOST to enable the AI fallback tier"),
        }
    }
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    open_db(db_path, no_encrypt)?;

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Ingest transactions: tally ingest --user 1 --file sync.csv");
    println!("  2. Review low-confidence results: tally review --user 1");
    println!("  3. Start the API: tally serve");

    Ok(())
}

pub fn cmd_categories() -> Result<()> {
    println!("🏷️  Categories");
    println!();
    for category in Category::all() {
        println!("   {:<28} {}", category.as_str(), category.slug());
    }
    Ok(())
}
