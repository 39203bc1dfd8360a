use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{AttentionItem, AttentionQueue, Insight, Priority, QueueSource};

fn write_group(output: &mut String, title: &str, items: &[AttentionItem]) {
    let _ = writeln!(output, "### {} ({})", title, items.len());
    if items.is_empty() {
        let _ = writeln!(output, "Nothing in this tier.");
        let _ = writeln!(output);
        return;
    }
    for item in items {
        let contact = item
            .email
            .as_deref()
            .map(|email| format!(", {email}"))
            .unwrap_or_default();
        let _ = writeln!(
            output,
            "- **{}** ({}{}) score {}: {}",
            item.name,
            item.score.entity_type,
            contact,
            item.score.score,
            item.score.reasons.join("; ")
        );
        if !item.score.suggested_actions.is_empty() {
            let _ = writeln!(
                output,
                "  - Suggested: {}",
                item.score.suggested_actions.join("; ")
            );
        }
    }
    let _ = writeln!(output);
}

pub fn build_report(
    queue: &AttentionQueue,
    insights: &[Insight],
    generated_at: DateTime<Utc>,
) -> String {
    let mut output = String::new();
    let source = match queue.source {
        QueueSource::Cache => "cached scores",
        QueueSource::Computed => "a fresh computation",
    };

    let _ = writeln!(output, "# Attention Report");
    let _ = writeln!(
        output,
        "Generated {} from {}",
        generated_at.format("%Y-%m-%d %H:%M UTC"),
        source
    );
    if let Some(window) = queue.cache_window {
        let expiry = window
            .next_expiry
            .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        let _ = writeln!(
            output,
            "Cached scores computed {}, next expiry {}",
            window.oldest_computed_at.format("%Y-%m-%d %H:%M UTC"),
            expiry
        );
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "## Attention Queue");

    if queue.is_empty() {
        let _ = writeln!(output, "No clients, coaches or cohorts need attention.");
        let _ = writeln!(output);
    } else {
        write_group(&mut output, "Red", &queue.red);
        write_group(&mut output, "Amber", &queue.amber);
        write_group(&mut output, "Green", &queue.green);
    }

    let _ = writeln!(output, "## Insights");
    if insights.is_empty() {
        let _ = writeln!(output, "No active insights.");
    } else {
        for insight in insights {
            let marker = match insight.severity {
                Priority::Red => "[red]",
                Priority::Amber => "[amber]",
                Priority::Green => "[green]",
            };
            let _ = writeln!(
                output,
                "- {} {}: {}",
                marker, insight.title, insight.description
            );
        }
    }

    output
}

#[derive(Serialize)]
struct QueueCsvRow<'a> {
    priority: &'a str,
    score: i32,
    entity_type: &'a str,
    entity_id: String,
    name: &'a str,
    email: &'a str,
    reasons: String,
    suggested_actions: String,
}

/// Write the queue as CSV, one row per entity, red first. Returns rows written.
pub fn write_queue_csv<W: std::io::Write>(queue: &AttentionQueue, writer: W) -> anyhow::Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut written = 0usize;
    for item in queue.iter() {
        csv_writer.serialize(QueueCsvRow {
            priority: item.score.priority.as_str(),
            score: item.score.score,
            entity_type: item.score.entity_type.as_str(),
            entity_id: item.score.entity_id.to_string(),
            name: &item.name,
            email: item.email.as_deref().unwrap_or(""),
            reasons: item.score.reasons.join("; "),
            suggested_actions: item.score.suggested_actions.join("; "),
        })?;
        written += 1;
    }
    csv_writer.flush()?;
    Ok(written)
}
