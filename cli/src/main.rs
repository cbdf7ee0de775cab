//! vmgr - ephemeral infrastructure lifecycle orchestrator

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use vmgr_cli::cli::Cli;
use vmgr_cli::output::json::{error_code, format_error};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vmgr_cli=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json = cli.json;
    match cli.run().await {
        Ok(code) => code,
        Err(e) => {
            let message = format!("{e:#}");
            match json.then(|| format_error(&message, error_code(&e))) {
                Some(Ok(doc)) => println!("{doc}"),
                _ => eprintln!("Error: {message}"),
            }
            ExitCode::FAILURE
        }
    }
}
