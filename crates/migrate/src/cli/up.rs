use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use console::style;

use migrate_core::migration::{Direction, UpOptions};

/// Apply pending migrations.
#[derive(Parser)]
pub struct UpCommand {
    /// Apply at most this many migrations.
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Stop after this migration (name or timestamp).
    #[arg(long)]
    pub to: Option<String>,

    /// Validate the SQL without touching the database.
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt.
    #[arg(short, long)]
    pub yes: bool,
}

impl UpCommand {
    pub async fn execute(self, config_path: &Path) -> Result<ExitCode> {
        let runner = super::connect(config_path, false).await?;
        let options = UpOptions {
            count: self.count,
            to: self.to,
            dry_run: self.dry_run,
            require_confirmation: !self.yes,
        };

        super::print_header(if options.dry_run {
            "Migrations (dry run)"
        } else {
            "Migrations"
        });

        if !options.dry_run && !self.yes {
            let plan = runner.pending(&options).await?;
            if plan.is_empty() {
                println!("  {} Database is up to date", style("ℹ").blue());
                println!();
                runner.disconnect().await?;
                return Ok(ExitCode::SUCCESS);
            }

            println!("  {} Pending:", style("○").yellow());
            for migration in &plan {
                let marker = if runner.is_destructive(migration.sql(Direction::Up)) {
                    style(" destructive").yellow().to_string()
                } else {
                    String::new()
                };
                println!("    {} {}{}", style("→").dim(), migration.name, marker);
            }
            println!();

            if !super::confirm(&format!("Apply {} migration(s)?", plan.len()))? {
                println!("  {} Aborted", style("ℹ").blue());
                runner.disconnect().await?;
                return Ok(ExitCode::SUCCESS);
            }
            println!();
        }

        let results = runner.up(&options).await?;
        runner.disconnect().await?;

        if results.is_empty() {
            println!("  {} Database is up to date", style("ℹ").blue());
            println!();
            return Ok(ExitCode::SUCCESS);
        }

        let verb = if options.dry_run { "Validated" } else { "Applied" };
        Ok(super::exit_code(super::print_results(&results, verb)))
    }
}
