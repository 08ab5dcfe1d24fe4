use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use console::style;

use migrate_runtime::VerifyReport;

/// Check applied migrations against their files on disk.
#[derive(Parser)]
pub struct VerifyCommand {
    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl VerifyCommand {
    /// Exit code 1 on checksum drift or missing files.
    pub async fn execute(self, config_path: &Path) -> Result<ExitCode> {
        let runner = super::connect(config_path, true).await?;
        let report = runner.verify().await?;
        runner.disconnect().await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }

        Ok(super::exit_code(report.is_clean()))
    }
}

fn print_report(report: &VerifyReport) {
    super::print_header("Checksum Verification");

    for drift in &report.drifted {
        println!(
            "  {} {} was modified after being applied",
            style("✗").red(),
            style(&drift.name).red()
        );
        println!("      Expected: {}", drift.expected);
        println!("      Actual:   {}", drift.actual);
    }
    for name in &report.missing {
        println!(
            "  {} {} is applied but its file is missing",
            style("✗").red(),
            style(name).red()
        );
    }

    if report.is_clean() {
        println!(
            "  {} {} applied migration(s) match their files",
            style("✓").green(),
            report.checked
        );
    } else {
        println!();
        println!(
            "  {} Do not edit applied migrations. Create a new migration instead.",
            style("ℹ").blue()
        );
    }
    println!();
}
