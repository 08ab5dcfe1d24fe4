use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use console::style;

use migrate_core::migration::{Direction, DownOptions};

/// Roll back applied migrations.
#[derive(Parser)]
pub struct DownCommand {
    /// Number of migrations to roll back.
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Roll back everything applied after this migration (name or timestamp).
    #[arg(long)]
    pub to: Option<String>,

    /// Skip the confirmation prompt.
    #[arg(short, long)]
    pub yes: bool,
}

impl DownCommand {
    pub async fn execute(self, config_path: &Path) -> Result<ExitCode> {
        let runner = super::connect(config_path, false).await?;
        let options = DownOptions {
            count: self.count,
            to: self.to,
            require_confirmation: !self.yes,
        };

        super::print_header("Rollback");

        if options.count == Some(0) {
            println!("  {} Nothing to roll back (count=0)", style("ℹ").blue());
            println!();
            runner.disconnect().await?;
            return Ok(ExitCode::SUCCESS);
        }

        if !self.yes {
            let plan = runner.rollback_plan(&options).await?;
            if plan.is_empty() {
                println!("  {} No migrations to roll back", style("ℹ").blue());
                println!();
                runner.disconnect().await?;
                return Ok(ExitCode::SUCCESS);
            }

            println!("  {} Will roll back:", style("↓").yellow());
            for migration in &plan {
                let marker = if runner.is_destructive(migration.sql(Direction::Down)) {
                    style(" destructive").yellow().to_string()
                } else {
                    String::new()
                };
                println!("    {} {}{}", style("→").dim(), migration.name, marker);
            }
            println!();

            if !super::confirm(&format!("Roll back {} migration(s)?", plan.len()))? {
                println!("  {} Aborted", style("ℹ").blue());
                runner.disconnect().await?;
                return Ok(ExitCode::SUCCESS);
            }
            println!();
        }

        let results = runner.down(&options).await?;
        runner.disconnect().await?;

        if results.is_empty() {
            println!("  {} No migrations to roll back", style("ℹ").blue());
            println!();
            return Ok(ExitCode::SUCCESS);
        }

        Ok(super::exit_code(super::print_results(&results, "Rolled back")))
    }
}
