//! Tally CLI - Transaction categorization engine
//!
//! Usage:
//!   tally init                              Initialize database
//!   tally ingest --user 1 --file sync.csv   Ingest and categorize a sync export
//!   tally correct --user 1 42 Travel        Correct a category
//!   tally recategorize --user 1             Re-run categorization in bulk
//!   tally serve --port 3000                 Start web server

mod cli;
mod commands;

#[cfg(test)]
mod tests;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let config = cli.config.as_deref();

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Ingest { user, file } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let engine = commands::Engine::load(config)?;
            commands::cmd_ingest(&db, &engine, user, &file).await
        }
        Commands::Categorize { user, limit } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let engine = commands::Engine::load(config)?;
            commands::cmd_categorize(&db, &engine, user, limit).await
        }
        Commands::Test { description, user } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let engine = commands::Engine::load(config)?;
            commands::cmd_test(&db, &engine, user, &description).await
        }
        Commands::Correct {
            user,
            transaction,
            category,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_correct(&db, user, transaction, &category)
        }
        Commands::Review { user, limit } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_review(&db, user, limit)
        }
        Commands::Patterns { user, forget } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match forget {
                Some(token) => commands::cmd_patterns_forget(&db, user, &token),
                None => commands::cmd_patterns_list(&db, user),
            }
        }
        Commands::Rules { test } => {
            let engine = commands::Engine::load(config)?;
            match test {
                Some(description) => commands::cmd_rules_test(&engine.rules, &description),
                None => commands::cmd_rules_list(&engine.rules),
            }
        }
        Commands::Categories => commands::cmd_categories(),
        Commands::Recategorize {
            user,
            resume,
            batch_size,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let engine = commands::Engine::load(config)?;
            commands::cmd_recategorize(&db, &engine, user, resume, batch_size).await
        }
        Commands::Jobs { id, user, cancel } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match (id, user) {
                (Some(id), _) if cancel => commands::cmd_job_cancel(&db, id),
                (Some(id), _) => commands::cmd_job_show(&db, id),
                (None, Some(user)) => commands::cmd_jobs_list(&db, user),
                (None, None) => anyhow::bail!("Pass a job ID or --user"),
            }
        }
        Commands::Serve {
            port,
            host,
            no_auth,
        } => commands::cmd_serve(&cli.db, &host, port, no_auth, cli.no_encrypt, config).await,
    }
}
