//! Ingestion and categorization commands

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use tally_core::import::parse_csv;
use tally_core::{CategorizeResult, Database, TierBreakdown};

use super::{truncate, Engine};

pub async fn cmd_ingest(db: &Database, engine: &Engine, user_id: i64, file: &Path) -> Result<()> {
    println!("📥 Ingesting {} for user {}...", file.display(), user_id);
    engine.describe();

    let reader =
        File::open(file).with_context(|| format!("Failed to open {}", file.display()))?;
    let records = parse_csv(reader).context("Failed to parse sync export")?;
    println!("   Parsed {} records", records.len());

    let categorizer = engine.categorizer(db)?;
    let result = categorizer.ingest(user_id, &records).await?;

    println!();
    println!("✅ Ingest complete");
    println!("   Inserted: {}", result.inserted);
    println!("   Skipped (already ingested): {}", result.skipped);
    if result.failed > 0 {
        println!(
            "   ⚠️  {} left uncategorized (run 'tally categorize --user {}')",
            result.failed, user_id
        );
    }

    let review = result.categorized.iter().filter(|t| t.needs_review).count();
    if review > 0 {
        println!(
            "   👀 {} need review (run 'tally review --user {}')",
            review, user_id
        );
    }

    Ok(())
}

pub async fn cmd_categorize(db: &Database, engine: &Engine, user_id: i64, limit: i64) -> Result<()> {
    println!("🏷️  Categorizing pending transactions for user {}...", user_id);
    engine.describe();

    let categorizer = engine.categorizer(db)?;
    let result = categorizer.categorize_pending(user_id, limit, None).await?;

    if result.processed == 0 {
        println!("✅ Nothing to categorize");
        return Ok(());
    }

    print_breakdown(&result);
    Ok(())
}

fn print_breakdown(result: &CategorizeResult) {
    println!();
    println!("📊 Categorized {} transactions", result.processed);
    println!("   ─────────────────────────────");
    print_breakdown_totals(&result.breakdown);
    println!("   AI answers cached: {}", result.by_ai_cached);
    println!("   Needs review:     {}", result.needs_review);
}

/// Print how many transactions each tier resolved
pub fn print_breakdown_totals(b: &TierBreakdown) {
    println!("   Learned patterns: {}", b.by_learned);
    println!("   Rules:            {}", b.by_rule);
    println!("   AI fallback:      {}", b.by_ai);
    println!("   Default (Other):  {}", b.fallback_to_other);
}

/// Dry run: resolve a description without saving anything
pub async fn cmd_test(db: &Database, engine: &Engine, user_id: i64, description: &str) -> Result<()> {
    let categorizer = engine.categorizer(db)?;
    let resolution = categorizer.resolve(user_id, description).await;
    let verdict = &resolution.verdict;

    println!("🔎 {}", truncate(description, 60));
    println!("   Token:      {}", resolution.merchant_token);
    println!("   Category:   {}", verdict.category);
    println!(
        "   Method:     {}",
        verdict
            .method
            .map(|m| m.to_string())
            .unwrap_or_else(|| "default".to_string())
    );
    if let Some(ref rule) = resolution.rule {
        println!("   Rule:       {}", rule);
    }
    println!("   Confidence: {:.2}", verdict.confidence);
    if verdict.needs_review {
        println!(
            "   👀 Would be flagged for review (threshold {:.2})",
            categorizer.policy().review_threshold()
        );
    }

    Ok(())
}
