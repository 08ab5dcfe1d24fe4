use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use console::style;

use migrate_core::migration::{MigrationStatus, MigrationStatusSummary};

/// Show applied and pending migrations.
#[derive(Parser)]
pub struct StatusCommand {
    /// Print the summary as JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusCommand {
    /// Exit code 1 when migrations are pending.
    pub async fn execute(self, config_path: &Path) -> Result<ExitCode> {
        let runner = super::connect(config_path, true).await?;
        let summary = runner.status().await?;
        runner.disconnect().await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            print_summary(&summary);
        }

        Ok(super::exit_code(summary.is_up_to_date()))
    }
}

fn print_summary(summary: &MigrationStatusSummary) {
    super::print_header("Migration Status");

    if summary.applied.is_empty() && summary.pending.is_empty() {
        println!("  {} No migrations found", style("ℹ").blue());
        println!();
        return;
    }

    if !summary.applied.is_empty() {
        println!("  {} Applied:", style("✓").green());
        for m in &summary.applied {
            let marker = match m.status {
                MigrationStatus::Success => style("✓").green().to_string(),
                _ => style("✗").red().to_string(),
            };
            println!(
                "    {} {} {} {} {}",
                marker,
                style(&m.name).cyan(),
                style("at").dim(),
                m.applied_at.format("%Y-%m-%d %H:%M:%S"),
                style(format!("by {}", m.applied_by)).dim()
            );
            if let Some(message) = &m.error_message {
                println!("        {}", style(message).red());
            }
        }
    }

    if !summary.pending.is_empty() {
        if !summary.applied.is_empty() {
            println!();
        }
        println!("  {} Pending:", style("○").yellow());
        for m in &summary.pending {
            println!("    {} {}", style("→").dim(), style(&m.name).yellow());
        }
    }

    println!();
    println!(
        "  {} {} applied, {} pending",
        style("ℹ").blue(),
        summary.applied_count,
        summary.pending_count
    );
    println!();
}
