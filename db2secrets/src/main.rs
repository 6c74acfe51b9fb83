//! db2secrets command-line tool.
//!
//! # Security Guarantees
//! - Passwords are read from prompts or the environment, never logged
//! - Connection strings are redacted in all diagnostics
//! - Ctrl-C cancels an in-flight rotation after closing its connections

use clap::Parser;
use db2secrets::{Cli, run};
use db2secrets_core::{CancellationToken, SecretsError, logging::init_logging};
use std::process::ExitCode;
use tracing::{error, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.global.verbose, cli.global.quiet, cli.global.log_format) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    match run(cli, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            exit_code_for(&e)
        }
    }
}

/// Exit code per failure kind: 2 validation, 3 unconfigured, 4 execution,
/// 5 verification, 130 cancelled.
fn exit_code_for(error: &anyhow::Error) -> ExitCode {
    match error.downcast_ref::<SecretsError>() {
        Some(SecretsError::Validation { .. }) => ExitCode::from(2),
        Some(SecretsError::ConfigurationMissing) => ExitCode::from(3),
        Some(SecretsError::RotationExecution { .. }) => ExitCode::from(4),
        Some(SecretsError::RotationVerification { .. }) => ExitCode::from(5),
        Some(SecretsError::Cancelled { .. }) => ExitCode::from(130),
        _ => ExitCode::FAILURE,
    }
}
