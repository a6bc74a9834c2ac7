//! Error handling and display for the CLI.

use colored::Colorize;
use thiserror::Error;
use vizzini_models::BbsError;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{failed} of {total} scenarios failed")]
    ScenariosFailed { failed: usize, total: usize },

    #[error("No scenarios match {0:?}")]
    NoScenarios(String),

    #[error("Route error: {0}")]
    Route(#[from] BbsError),

    #[error("{bad} of {attempts} probes failed")]
    ProbeFailed { bad: usize, attempts: usize },
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        match cli_err {
            CliError::ScenariosFailed { .. } => {
                eprintln!(
                    "\n{}",
                    "Hint: Re-run with --focus <name> and RUST_LOG=debug for details.".yellow()
                );
            }
            CliError::NoScenarios(_) => {
                eprintln!(
                    "\n{}",
                    "Hint: Run `vizzini list` to see scenario names.".yellow()
                );
            }
            CliError::Route(e) if e.is_retryable() => {
                eprintln!(
                    "\n{}",
                    "Hint: Check that the router address is reachable.".yellow()
                );
            }
            _ => {}
        }
    }
}
