//! Rule table commands

use anyhow::Result;
use tally_core::normalize_merchant;
use tally_core::RuleTable;

pub fn cmd_rules_list(rules: &RuleTable) -> Result<()> {
    match rules.source() {
        Some(path) => println!("📏 {} rules from {}", rules.len(), path.display()),
        None => println!("📏 {} rules (built-in table)", rules.len()),
    }
    println!();

    for rule in rules.rules() {
        println!(
            "   {:<28} {:<24} {:.2}  {} {}",
            rule.name,
            rule.category.as_str(),
            rule.confidence,
            rule.pattern_type.as_str(),
            rule.pattern
        );
    }
    Ok(())
}

pub fn cmd_rules_test(rules: &RuleTable, description: &str) -> Result<()> {
    let token = normalize_merchant(description);
    let matches = rules.test_rules(&token);

    println!("🔎 Token: {}", token);
    if matches.is_empty() {
        println!("   No rule matches");
        return Ok(());
    }

    for (i, m) in matches.iter().enumerate() {
        let marker = if i == 0 { "✅" } else { "  " };
        println!(
            "   {} {:<28} → {} ({:.2})",
            marker, m.rule, m.category, m.confidence
        );
    }
    if matches.len() > 1 {
        println!();
        println!("   First match wins; the rest are shadowed");
    }
    Ok(())
}
