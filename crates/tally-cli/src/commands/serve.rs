//! Server command implementation

use std::path::Path;

use anyhow::{Context, Result};
use tally_core::EngineConfig;

use super::open_db;

pub async fn cmd_serve(
    db_path: &Path,
    host: &str,
    port: u16,
    no_auth: bool,
    no_encrypt: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    println!("🚀 Starting Tally web server...");
    println!("   Database: {}", db_path.display());
    println!("   Listening: http://{}:{}", host, port);

    let engine = EngineConfig::load(config_path).context("Failed to load engine config")?;
    match engine.source {
        Some(ref path) => println!("   Config: {}", path.display()),
        None => println!("   Config: built-in defaults"),
    }
    println!("   Review threshold: {:.2}", engine.review_threshold);

    let config = tally_server::ServerConfig::from_env(!no_auth);

    if no_auth {
        println!();
        println!("   ⚠️  Authentication DISABLED - do not expose to network!");
    } else if config.api_keys.is_empty() {
        println!("   ⚠️  No API keys configured - set TALLY_API_KEYS");
    } else {
        println!(
            "   🔑 API keys: {} configured (TALLY_API_KEYS)",
            config.api_keys.len()
        );
    }
    if !config.allowed_origins.is_empty() {
        println!(
            "   🌐 Allowed origins: {}",
            config.allowed_origins.join(", ")
        );
    }
    if no_encrypt {
        println!("   ⚠️  Encryption DISABLED (--no-encrypt)");
    }
    println!();
    println!("   Press Ctrl+C to stop");

    let db = open_db(db_path, no_encrypt)?;

    tally_server::serve_with_config(db, host, port, config, engine).await?;

    Ok(())
}
