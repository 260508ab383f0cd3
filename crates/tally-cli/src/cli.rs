//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tally - Categorize ledger transactions
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Transaction categorization engine for small-business ledgers", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "tally.db", global = true)]
    pub db: PathBuf,

    /// Engine config file (defaults to the data dir override, then built-in defaults)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set TALLY_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Ingest a ledger sync export (CSV) and categorize the new transactions
    ///
    /// Required columns: date, description, amount.
    /// Optional columns: merchant, external_id.
    Ingest {
        /// User the transactions belong to
        #[arg(short, long)]
        user: i64,

        /// CSV file to ingest
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Categorize transactions that have no category yet
    Categorize {
        #[arg(short, long)]
        user: i64,

        /// Maximum transactions to process
        #[arg(short, long, default_value = "1000")]
        limit: i64,
    },

    /// Show how a description would be categorized (nothing is saved)
    Test {
        /// Raw transaction description
        description: String,

        /// User whose learned patterns apply
        #[arg(short, long, default_value = "1")]
        user: i64,
    },

    /// Correct a transaction's category and remember it for the merchant
    Correct {
        #[arg(short, long)]
        user: i64,

        /// Transaction ID
        transaction: i64,

        /// Category label or slug (e.g. "Travel" or "vehicle_fuel")
        category: String,
    },

    /// List transactions waiting for review
    Review {
        #[arg(short, long)]
        user: i64,

        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// List learned patterns
    Patterns {
        #[arg(short, long)]
        user: i64,

        /// Forget the pattern for this merchant token
        #[arg(long)]
        forget: Option<String>,
    },

    /// Show the rule table
    Rules {
        /// Show every rule matching this description instead
        #[arg(long)]
        test: Option<String>,
    },

    /// List the category set
    Categories,

    /// Re-run categorization over all of a user's transactions
    Recategorize {
        #[arg(short, long)]
        user: i64,

        /// Resume a cancelled or failed job from its checkpoint
        #[arg(long)]
        resume: Option<i64>,

        /// Transactions per batch (overrides config)
        #[arg(long)]
        batch_size: Option<i64>,
    },

    /// Show re-categorization jobs
    Jobs {
        /// Job ID to show
        id: Option<i64>,

        /// List jobs for this user
        #[arg(short, long)]
        user: Option<i64>,

        /// Request cancellation of the job
        #[arg(long, requires = "id")]
        cancel: bool,
    },

    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Disable authentication (for local development only)
        ///
        /// WARNING: Do not use this flag when exposing the server to a network.
        /// By default, the server requires an API key from TALLY_API_KEYS.
        #[arg(long)]
        no_auth: bool,
    },
}
