//! CLI commands.

mod list;
mod probe;
mod run;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::output::OutputFormat;

/// vizzini - Acceptance suite for desired/actual LRP orchestrators.
#[derive(Debug, Parser)]
#[command(name = "vizzini")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, env = "VIZZINI_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run scenarios against the in-memory reference orchestrator.
    Run(run::RunCommand),

    /// List registered scenarios.
    List(list::ListCommand),

    /// Measure availability of a route over HTTP.
    Probe(probe::ProbeCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let ctx = CommandContext {
            format: OutputFormat::parse(&self.format),
        };

        match self.command {
            Commands::Run(cmd) => cmd.run(ctx).await,
            Commands::List(cmd) => cmd.run(ctx),
            Commands::Probe(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("vizzini {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub format: OutputFormat,
}
