use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod attention;
mod cache;
mod config;
mod db;
mod error;
mod insights;
mod loader;
#[cfg(test)]
mod memory_store;
mod models;
mod report;
mod scoring;
mod store;

use attention::AttentionEngine;
use config::EngineArgs;
use db::PgStore;
use insights::InsightDetector;
use models::{AttentionQueue, Insight};
use store::StoreGateway;

#[derive(Parser)]
#[command(name = "attention-engine")]
#[command(about = "Attention scoring and insight engine for coaching operations", long_about = None)]
struct Cli {
    #[command(flatten)]
    engine: EngineArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a realistic demo population
    Seed,
    /// Show the attention queue, from cache when available
    Queue {
        #[arg(long)]
        json: bool,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Recompute and persist the attention queue, ignoring the cache
    Refresh {
        #[arg(long)]
        json: bool,
    },
    /// Detect anomalies and opportunities
    Insights {
        #[arg(long)]
        json: bool,
        /// Show persisted insights instead of running detection
        #[arg(long)]
        active: bool,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "attention-report.md")]
        out: PathBuf,
    },
    /// Export the attention queue as CSV
    Export {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Delete expired scores and insights
    Purge,
}

fn print_queue(queue: &AttentionQueue, limit: usize) {
    if queue.is_empty() {
        println!("No entities need attention.");
        return;
    }
    for (label, items) in [("Red", &queue.red), ("Amber", &queue.amber), ("Green", &queue.green)] {
        println!("{label} ({}):", items.len());
        for item in items.iter().take(limit) {
            println!(
                "- {} [{}] score {}: {}",
                item.name,
                item.score.entity_type,
                item.score.score,
                item.score.reasons.join("; ")
            );
        }
        if items.len() > limit {
            println!("  ... {} more", items.len() - limit);
        }
    }
}

fn print_insights(insights: &[Insight]) {
    if insights.is_empty() {
        println!("No insights.");
        return;
    }
    for insight in insights {
        println!(
            "- [{}] {}: {}",
            insight.severity, insight.title, insight.description
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let config = cli.engine.engine_config();
    let store = Arc::new(
        PgStore::connect(&database_url, cli.engine.max_connections, config.query_timeout).await?,
    );
    let engine = AttentionEngine::new(Arc::clone(&store), config.clone());
    let detector = InsightDetector::new(Arc::clone(&store), config);

    // Detached write-backs must finish before the runtime shuts down, even
    // when the command itself fails.
    let outcome: anyhow::Result<()> = async {
        match cli.command {
            Commands::InitDb => {
                db::init_db(store.pool()).await?;
                println!("Schema ready.");
            }
            Commands::Seed => {
                db::seed(store.pool()).await?;
                println!("Seed data inserted.");
            }
            Commands::Queue { json, limit } => {
                let queue = engine
                    .compute_queue()
                    .await
                    .context("failed to compute attention queue")?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&queue)?);
                } else {
                    print_queue(&queue, limit);
                }
            }
            Commands::Refresh { json } => {
                let queue = engine
                    .refresh_queue()
                    .await
                    .context("failed to refresh attention queue")?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&queue)?);
                } else {
                    println!(
                        "Refreshed: {} red, {} amber, {} green.",
                        queue.red.len(),
                        queue.amber.len(),
                        queue.green.len()
                    );
                }
            }
            Commands::Insights { json, active } => {
                let insights = if active {
                    detector.active_insights_at(Utc::now()).await?
                } else {
                    let run = detector
                        .detect_anomalies()
                        .await
                        .context("failed to detect insights")?;
                    if !run.persisted {
                        eprintln!("Warning: insights were detected but could not be saved.");
                    }
                    run.insights
                };
                if json {
                    println!("{}", serde_json::to_string_pretty(&insights)?);
                } else {
                    print_insights(&insights);
                }
            }
            Commands::Report { out } => {
                let now = Utc::now();
                let queue = engine.compute_queue_at(now).await?;
                let insights = detector.active_insights_at(now).await?;
                let report = report::build_report(&queue, &insights, now);
                std::fs::write(&out, report)?;
                println!("Report written to {}.", out.display());
            }
            Commands::Export { csv } => {
                let queue = engine.compute_queue().await?;
                let file = std::fs::File::create(&csv)
                    .with_context(|| format!("failed to create {}", csv.display()))?;
                let rows = report::write_queue_csv(&queue, file)?;
                println!("Exported {rows} rows to {}.", csv.display());
            }
            Commands::Purge => {
                let now = Utc::now();
                let scores = store.delete_expired_scores(now).await?;
                let insights = store.delete_expired_insights(now).await?;
                println!("Purged {scores} expired scores and {insights} expired insights.");
            }
        }
        Ok(())
    }
    .await;

    engine.flush_write_backs().await;
    outcome
}
