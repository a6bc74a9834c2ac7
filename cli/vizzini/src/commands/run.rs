//! Run command - Execute scenarios against the reference orchestrator.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;
use tracing::info;
use vizzini_bbs::Config;
use vizzini_conformance::{LocalDeployment, Outcome, ScenarioReport, Suite, Summary, Timeouts};

use crate::error::CliError;
use crate::output::{print_output, print_success, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct RunCommand {
    /// Only run scenarios whose name contains this text.
    #[arg(long)]
    pub(super) focus: Option<String>,

    /// Skip long-running scenarios.
    #[arg(long)]
    pub(super) skip_slow: bool,

    /// Scenarios in flight at once.
    #[arg(long, default_value_t = 1)]
    parallelism: usize,

    /// How long a change may take to become observable, in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    convergence_timeout_ms: u64,
}

#[derive(Debug, Serialize, Tabled)]
struct ReportRow {
    #[tabled(rename = "Group")]
    group: &'static str,

    #[tabled(rename = "Scenario")]
    name: &'static str,

    #[tabled(rename = "Outcome")]
    outcome: String,

    #[tabled(rename = "Duration")]
    duration: String,
}

impl From<&ScenarioReport> for ReportRow {
    fn from(report: &ScenarioReport) -> Self {
        let outcome = match &report.outcome {
            Outcome::Passed => "passed".green().to_string(),
            Outcome::Failed { message } => format!("{} {}", "failed:".red(), message),
            Outcome::Skipped { reason } => format!("skipped ({reason})").dimmed().to_string(),
        };
        Self {
            group: report.group,
            name: report.name,
            outcome,
            duration: format!("{}ms", report.duration_ms),
        }
    }
}

#[derive(Debug, Serialize)]
struct RunOutput<'a> {
    summary: Summary,
    scenarios: &'a [ScenarioReport],
}

impl RunCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let config = Config::from_env().context("loading orchestrator config")?;
        info!(domain = %config.domain, cells = config.cell_count, "Starting reference orchestrator");

        let timeouts = Timeouts {
            convergence: Duration::from_millis(self.convergence_timeout_ms),
            ..Timeouts::default()
        };

        let deployment = Arc::new(LocalDeployment::start(config));
        let mut suite = Suite::new(deployment.clone())
            .skip_slow(self.skip_slow)
            .with_parallelism(self.parallelism)
            .with_timeouts(timeouts);
        if let Some(focus) = &self.focus {
            suite = suite.with_focus(focus.clone());
        }

        let reports = suite.run().await;
        deployment.bbs().shutdown().await;

        if reports.is_empty() {
            return Err(CliError::NoScenarios(self.focus.unwrap_or_default()).into());
        }

        let summary = Summary::of(&reports);
        match ctx.format {
            OutputFormat::Json => print_run_json(&summary, &reports),
            OutputFormat::Table => {
                let rows: Vec<ReportRow> = reports.iter().map(ReportRow::from).collect();
                print_output(&rows, ctx.format);
            }
        }

        if !summary.is_success() {
            return Err(CliError::ScenariosFailed {
                failed: summary.failed,
                total: reports.len(),
            }
            .into());
        }

        if ctx.format == OutputFormat::Table {
            print_success(&summary.to_string());
        }
        Ok(())
    }
}

fn print_run_json(summary: &Summary, reports: &[ScenarioReport]) {
    let output = RunOutput {
        summary: *summary,
        scenarios: reports,
    };
    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{json}"),
        Err(_) => println!("{{}}"),
    }
}
