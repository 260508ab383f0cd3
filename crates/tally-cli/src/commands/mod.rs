//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Shared utilities (open_db, engine loading) and init/categories
//! - `ingest` - Sync ingestion, pending categorization, dry-run testing
//! - `jobs` - Bulk re-categorization jobs
//! - `review` - Review queue, corrections, learned patterns
//! - `rules` - Rule table listing and testing
//! - `serve` - Web server command

pub mod core;
pub mod ingest;
pub mod jobs;
pub mod review;
pub mod rules;
pub mod serve;

// Re-export command functions for main.rs
pub use core::*;
pub use ingest::*;
pub use jobs::*;
pub use review::*;
pub use rules::*;
pub use serve::*;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
