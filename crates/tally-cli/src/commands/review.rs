//! Review queue, corrections and learned patterns

use anyhow::{Context, Result};
use tally_core::{correct_category, Database};

use super::truncate;

pub fn cmd_review(db: &Database, user_id: i64, limit: i64) -> Result<()> {
    let total = db.count_needs_review(user_id)?;
    let transactions = db.list_needs_review(user_id, limit, 0)?;

    if transactions.is_empty() {
        println!("✅ Nothing to review for user {}", user_id);
        return Ok(());
    }

    println!("👀 {} transactions need review (showing {})", total, transactions.len());
    println!();
    println!(
        "   {:>6}  {:<10}  {:>10}  {:<36}  {:<24}  {:>5}",
        "ID", "Date", "Amount", "Description", "Category", "Conf"
    );
    println!("   {}", "─".repeat(100));

    for tx in &transactions {
        println!(
            "   {:>6}  {:<10}  {:>10.2}  {:<36}  {:<24}  {:>5.2}",
            tx.id,
            tx.date,
            tx.amount,
            truncate(&tx.description, 36),
            tx.category.map(|c| c.as_str()).unwrap_or("-"),
            tx.confidence.unwrap_or(0.0)
        );
    }

    println!();
    println!("Fix one with: tally correct --user {} <ID> <CATEGORY>", user_id);
    Ok(())
}

pub fn cmd_correct(db: &Database, user_id: i64, tx_id: i64, category: &str) -> Result<()> {
    let updated = correct_category(db, user_id, tx_id, category)
        .with_context(|| format!("Failed to correct transaction {}", tx_id))?;

    db.log_audit(
        "cli",
        "correct_category",
        Some("transaction"),
        Some(tx_id),
        Some(&format!(
            "user={}, category={}, token={}",
            user_id, updated.category, updated.merchant_token
        )),
    )?;

    println!("✅ Transaction {} → {}", tx_id, updated.category);
    println!(
        "   Learned: '{}' → {} (applies to new transactions)",
        updated.merchant_token, updated.category
    );
    println!(
        "   Run 'tally recategorize --user {}' to apply it to past ones",
        user_id
    );
    Ok(())
}

pub fn cmd_patterns_list(db: &Database, user_id: i64) -> Result<()> {
    let patterns = db.list_learned_patterns(user_id)?;

    if patterns.is_empty() {
        println!("No learned patterns for user {}", user_id);
        return Ok(());
    }

    println!("🧠 Learned patterns for user {}", user_id);
    println!();
    for p in &patterns {
        println!(
            "   {:<40} → {:<24} {}",
            truncate(&p.merchant_token, 40),
            p.category.as_str(),
            p.corrected_at.format("%Y-%m-%d")
        );
    }
    Ok(())
}

pub fn cmd_patterns_forget(db: &Database, user_id: i64, token: &str) -> Result<()> {
    if !db.delete_learned_pattern(user_id, token)? {
        anyhow::bail!("No learned pattern '{}' for user {}", token, user_id);
    }

    db.log_audit(
        "cli",
        "delete_pattern",
        Some("learned_pattern"),
        None,
        Some(&format!("user={}, token={}", user_id, token)),
    )?;

    println!("🗑️  Forgot pattern '{}'", token);
    Ok(())
}
