use std::fs;
use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use console::style;

use migrate_core::config::MigrateConfig;

/// Create a configuration file and the migrations directory.
#[derive(Parser)]
pub struct InitCommand {
    /// Overwrite an existing configuration file.
    #[arg(long)]
    pub force: bool,

    /// Database URL to write. Defaults to `${DATABASE_URL}`, resolved at load time.
    #[arg(long, default_value = "${DATABASE_URL}")]
    pub database_url: String,
}

impl InitCommand {
    pub fn execute(self, config_path: &Path) -> Result<ExitCode> {
        if config_path.exists() && !self.force {
            anyhow::bail!(
                "Configuration file already exists: {}\nUse --force to overwrite it.",
                config_path.display()
            );
        }

        MigrateConfig::write_default(config_path, &self.database_url)?;
        let config = MigrateConfig::default_with_database_url(&self.database_url);
        fs::create_dir_all(&config.migrations_dir)?;

        println!();
        println!(
            "  {} Created {}",
            style("✓").green(),
            style(config_path.display()).cyan()
        );
        println!(
            "  {} Migrations go in {}",
            style("✓").green(),
            style(&config.migrations_dir).cyan()
        );
        println!();
        println!("Next steps:");
        println!(
            "  {} add {} and {}",
            style("→").dim(),
            style("YYYYMMDDHHMMSS_description.up.sql").dim(),
            style(".down.sql").dim()
        );
        println!("  {} {}", style("→").dim(), style("migrate up").dim());
        println!();

        Ok(ExitCode::SUCCESS)
    }
}
