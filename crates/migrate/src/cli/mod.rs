mod down;
mod init;
mod logging;
mod status;
mod up;
mod verify;

pub use down::DownCommand;
pub use init::InitCommand;
pub use status::StatusCommand;
pub use up::UpCommand;
pub use verify::VerifyCommand;

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;

use migrate_core::config::{MigrateConfig, DEFAULT_CONFIG_FILE};
use migrate_core::migration::MigrationResult;
use migrate_runtime::MigrationRunner;

/// Versioned SQL migrations for PostgreSQL, MySQL and SQLite
#[derive(Parser)]
#[command(name = "migrate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Create a configuration file and the migrations directory.
    Init(InitCommand),

    /// Apply pending migrations.
    Up(UpCommand),

    /// Roll back applied migrations.
    Down(DownCommand),

    /// Show applied and pending migrations.
    Status(StatusCommand),

    /// Check applied migrations against their files on disk.
    Verify(VerifyCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<ExitCode> {
        // Load .env if present
        dotenvy::dotenv().ok();

        let config = Path::new(&self.config);
        match self.command {
            Commands::Init(cmd) => cmd.execute(config),
            Commands::Up(cmd) => cmd.execute(config).await,
            Commands::Down(cmd) => cmd.execute(config).await,
            Commands::Status(cmd) => cmd.execute(config).await,
            Commands::Verify(cmd) => cmd.execute(config).await,
        }
    }

    /// Exit code used when the command fails before producing a result.
    pub fn fatal_exit_code(&self) -> ExitCode {
        match self.command {
            Commands::Status(_) | Commands::Verify(_) => ExitCode::from(2),
            _ => ExitCode::FAILURE,
        }
    }
}

/// Load configuration, set up logging and connect.
///
/// `quiet` keeps logs below `error` out of the way of command output unless
/// `RUST_LOG` asks for them.
async fn connect(config_path: &Path, quiet: bool) -> Result<MigrationRunner> {
    let config = MigrateConfig::load(config_path)?;
    logging::init(&config.logging, quiet)?;

    tracing::debug!(
        database = %migrate_core::config::redact_url(&config.database.url),
        migrations_dir = %config.migrations_dir,
        "Loaded configuration"
    );

    Ok(MigrationRunner::connect(&config).await?)
}

fn print_header(title: &str) {
    println!();
    println!("  {}", style(title).bold().cyan());
    println!();
}

/// Ask before changing the database. Non-interactive sessions proceed.
fn confirm(prompt: &str) -> Result<bool> {
    if !console::user_attended() {
        return Ok(true);
    }
    let answer = dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;
    Ok(answer)
}

/// Print one line per result and return whether all succeeded.
fn print_results(results: &[MigrationResult], verb: &str) -> bool {
    for result in results {
        if result.success {
            println!(
                "  {} {} {}",
                style("✓").green(),
                style(&result.migration.name).cyan(),
                style(format!("({} ms)", result.duration_ms)).dim()
            );
        } else {
            println!(
                "  {} {} {}",
                style("✗").red(),
                style(&result.migration.name).red(),
                style(format!("({} ms)", result.duration_ms)).dim()
            );
            if let Some(message) = result.error_message() {
                for line in message.lines() {
                    println!("      {}", line);
                }
            }
        }
    }

    let succeeded = results.iter().filter(|r| r.success).count();
    let all_ok = succeeded == results.len();
    println!();
    if all_ok {
        println!(
            "  {} {} {} migration(s)",
            style("✓").green(),
            verb,
            succeeded
        );
    } else {
        println!(
            "  {} {} {} of {} migration(s); batch stopped at the first failure",
            style("✗").red(),
            verb,
            succeeded,
            results.len()
        );
    }
    println!();
    all_ok
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_up() {
        let cli = Cli::try_parse_from(["migrate", "up", "--count", "2", "--dry-run"]).unwrap();
        assert_eq!(cli.config, "migrate.toml");
        match cli.command {
            Commands::Up(cmd) => {
                assert_eq!(cmd.count, Some(2));
                assert!(cmd.dry_run);
                assert!(!cmd.yes);
            }
            _ => panic!("expected up"),
        }
    }

    #[test]
    fn test_cli_parse_down_with_target() {
        let cli = Cli::try_parse_from([
            "migrate",
            "down",
            "--to",
            "20260101010101",
            "--yes",
            "--config",
            "db/migrate.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, "db/migrate.toml");
        match cli.command {
            Commands::Down(cmd) => {
                assert_eq!(cmd.to.as_deref(), Some("20260101010101"));
                assert!(cmd.yes);
            }
            _ => panic!("expected down"),
        }
    }

    #[test]
    fn test_cli_parse_status_and_verify() {
        assert!(Cli::try_parse_from(["migrate", "status", "--json"]).is_ok());
        assert!(Cli::try_parse_from(["migrate", "verify"]).is_ok());
        assert!(Cli::try_parse_from(["migrate", "init", "--force"]).is_ok());
        assert!(Cli::try_parse_from(["migrate", "sideways"]).is_err());
    }

    #[test]
    fn test_fatal_exit_code_by_command() {
        let status = Cli::try_parse_from(["migrate", "status"]).unwrap();
        assert_eq!(status.fatal_exit_code(), ExitCode::from(2));
        let up = Cli::try_parse_from(["migrate", "up"]).unwrap();
        assert_eq!(up.fatal_exit_code(), ExitCode::FAILURE);
    }
}
