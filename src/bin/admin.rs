//! CLI administration tool for link-router.
//!
//! Inspects evaluation records, interrupted workflow checkpoints and flushed
//! click aggregates directly in PostgreSQL, without going through the HTTP API.
//!
//! # Usage
//!
//! ```bash
//! # Show the stored verdict for a destination
//! cargo run --bin admin -- evaluations show https://example.com/landing
//!
//! # List records not checked in the last hour
//! cargo run --bin admin -- evaluations stale --older-than 3600
//!
//! # List and purge interrupted workflow checkpoints
//! cargo run --bin admin -- jobs list
//! cargo run --bin admin -- jobs purge
//!
//! # Show one flushed bucket
//! cargo run --bin admin -- aggregates show 42 1700000040000
//!
//! # Check database connection
//! cargo run --bin admin -- db check
//! ```
//!
//! # Environment Variables
//!
//! - `DATABASE_URL` (required): PostgreSQL connection string

use link_router::domain::entities::{EvaluationRecord, Verdict};
use link_router::domain::repositories::{
    CheckpointRepository, ClickAggregateRepository, EvaluationRepository,
};
use link_router::infrastructure::persistence::{
    PgCheckpointRepository, PgClickAggregateRepository, PgEvaluationRepository,
};

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use dialoguer::Confirm;
use sqlx::PgPool;
use std::sync::Arc;

/// CLI tool for inspecting link-router state.
#[derive(Parser)]
#[command(name = "admin")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect destination evaluation records
    Evaluations {
        #[command(subcommand)]
        action: EvaluationAction,
    },

    /// Inspect interrupted evaluation workflows
    Jobs {
        #[command(subcommand)]
        action: JobAction,
    },

    /// Inspect flushed click aggregates
    Aggregates {
        #[command(subcommand)]
        action: AggregateAction,
    },

    /// Database operations
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

#[derive(Subcommand)]
enum EvaluationAction {
    /// Show the record for one destination URL
    Show { url: String },

    /// List records last checked before a cutoff
    Stale {
        /// Age in seconds
        #[arg(long, default_value_t = 3600)]
        older_than: i64,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum JobAction {
    /// List workflow checkpoints that have not reached a terminal step
    List,

    /// Delete checkpoints so they are not resumed on the next start
    Purge {
        /// Only delete this job key
        #[arg(long)]
        key: Option<String>,

        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum AggregateAction {
    /// Show counts for one bucket
    Show { link_id: i64, bucket_start_ms: i64 },
}

#[derive(Subcommand)]
enum DbAction {
    /// Check database connection
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let pool = PgPool::connect(&database_url)
        .await
        .context("Failed to connect to database")?;
    let pool = Arc::new(pool);

    match cli.command {
        Commands::Evaluations { action } => handle_evaluation_action(action, pool).await?,
        Commands::Jobs { action } => handle_job_action(action, pool).await?,
        Commands::Aggregates { action } => handle_aggregate_action(action, pool).await?,
        Commands::Db { action } => handle_db_action(action, &pool).await?,
    }

    Ok(())
}

async fn handle_evaluation_action(action: EvaluationAction, pool: Arc<PgPool>) -> Result<()> {
    let repo = PgEvaluationRepository::new(pool);

    match action {
        EvaluationAction::Show { url } => {
            println!("{}", "🔎 Evaluation Record".bright_blue().bold());
            println!();

            let record = repo
                .get(&url)
                .await
                .map_err(|e| anyhow::anyhow!("Database error: {}", e))?;

            match record {
                Some(record) => print_record(&record),
                None => println!("{}", "  Not evaluated yet".yellow()),
            }
            println!();
        }
        EvaluationAction::Stale { older_than, limit } => {
            println!("{}", "⏳ Stale Evaluations".bright_blue().bold());
            println!();

            let cutoff = Utc::now() - Duration::seconds(older_than);
            let records = repo
                .list_stale(cutoff, limit)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to list records: {}", e))?;

            if records.is_empty() {
                println!("{}", "  Nothing older than the cutoff".green());
                return Ok(());
            }

            println!(
                "  {:<10} {:<6} {:<20} {}",
                "Verdict".bright_white().bold(),
                "Score".bright_white().bold(),
                "Checked".bright_white().bold(),
                "Destination".bright_white().bold()
            );
            println!("  {}", "─".repeat(75).bright_black());

            for record in &records {
                println!(
                    "  {:<10} {:<6} {:<20} {}",
                    colored_verdict(record.verdict),
                    record.quality_score,
                    record
                        .last_checked_at
                        .format("%Y-%m-%d %H:%M")
                        .to_string()
                        .bright_black(),
                    record.destination_url.cyan()
                );
            }

            println!();
            println!(
                "  Total: {}",
                records.len().to_string().bright_white().bold()
            );
            println!();
        }
    }

    Ok(())
}

async fn handle_job_action(action: JobAction, pool: Arc<PgPool>) -> Result<()> {
    let repo = PgCheckpointRepository::new(pool);

    let pending = repo
        .list_pending()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list checkpoints: {}", e))?;

    match action {
        JobAction::List => {
            println!("{}", "📋 Interrupted Evaluations".bright_blue().bold());
            println!();

            if pending.is_empty() {
                println!("{}", "  No interrupted jobs".green());
                return Ok(());
            }

            for checkpoint in &pending {
                println!(
                    "  {:<12} link {:<8} attempt {:<3} {}",
                    checkpoint.state.name().yellow(),
                    checkpoint.job.link_id.to_string().bright_black(),
                    checkpoint.job.attempt,
                    checkpoint.job.destination_url.cyan()
                );
            }
            println!();
        }
        JobAction::Purge { key, yes } => {
            let targets: Vec<String> = match key {
                Some(key) => {
                    if !pending.iter().any(|c| c.key == key) {
                        println!("{}", "⚠️  No pending job with that key".yellow());
                        return Ok(());
                    }
                    vec![key]
                }
                None => pending.into_iter().map(|c| c.key).collect(),
            };

            if targets.is_empty() {
                println!("{}", "  No interrupted jobs".green());
                return Ok(());
            }

            println!("  Jobs to purge: {}", targets.len().to_string().cyan());

            if !yes {
                let confirmed = Confirm::new()
                    .with_prompt("Purge these checkpoints? They will not resume.")
                    .default(false)
                    .interact()?;

                if !confirmed {
                    println!("{}", "❌ Cancelled".red());
                    return Ok(());
                }
            }

            for key in &targets {
                repo.delete(key)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to delete {}: {}", key, e))?;
            }

            println!("{}", "✅ Checkpoints purged".green().bold());
        }
    }

    Ok(())
}

async fn handle_aggregate_action(action: AggregateAction, pool: Arc<PgPool>) -> Result<()> {
    let repo = PgClickAggregateRepository::new(pool);

    match action {
        AggregateAction::Show {
            link_id,
            bucket_start_ms,
        } => {
            println!("{}", "📊 Click Aggregate".bright_blue().bold());
            println!();

            let aggregate = repo
                .get(link_id, bucket_start_ms)
                .await
                .map_err(|e| anyhow::anyhow!("Database error: {}", e))?;

            let Some(aggregate) = aggregate else {
                println!("{}", "  No flushed bucket at that window".yellow());
                return Ok(());
            };

            for (key, count) in &aggregate.counts {
                println!(
                    "  {:<8} {:<8} {}",
                    key.region_code.cyan(),
                    key.device_class.as_str(),
                    count.to_string().bright_green()
                );
            }
            println!();
            println!(
                "  Total: {}",
                aggregate.total().to_string().bright_white().bold()
            );
            println!();
        }
    }

    Ok(())
}

async fn handle_db_action(action: DbAction, pool: &PgPool) -> Result<()> {
    match action {
        DbAction::Check => {
            println!("{}", "🔍 Checking database connection...".bright_blue());

            sqlx::query("SELECT 1").fetch_one(pool).await?;

            let version: String = sqlx::query_scalar("SELECT version()")
                .fetch_one(pool)
                .await?;

            println!("{}", "✅ Database connection OK".green().bold());
            println!("  PostgreSQL: {}", version.bright_white());
        }
    }

    Ok(())
}

fn print_record(record: &EvaluationRecord) {
    println!("  URL:            {}", record.destination_url.cyan());
    println!("  Link:           {}", record.link_id);
    println!("  Verdict:        {}", colored_verdict(record.verdict));
    println!("  Quality score:  {}", record.quality_score);
    println!(
        "  Last checked:   {}",
        record.last_checked_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!("  Failure streak: {}", record.failure_streak);
}

fn colored_verdict(verdict: Verdict) -> ColoredString {
    match verdict {
        Verdict::Healthy => verdict.as_str().green(),
        Verdict::Degraded => verdict.as_str().yellow(),
        Verdict::Dead => verdict.as_str().red(),
        Verdict::Unknown => verdict.as_str().bright_black(),
    }
}
