mod cli;

use std::process::ExitCode;

use clap::Parser;
use console::style;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    let fatal = cli.fatal_exit_code();

    match cli.execute().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", style("Error:").red().bold(), e);
            fatal
        }
    }
}
