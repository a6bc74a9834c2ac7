//! Probe command - Sample a live route and report its error rate.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use vizzini_conformance::HttpRouteClient;
use vizzini_models::RouteClient;
use vizzini_testing::ErrorBudget;

use crate::error::CliError;
use crate::output::{print_info, print_single, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct ProbeCommand {
    /// Route hostname.
    #[arg(long)]
    host: String,

    /// Path (and query) to request.
    #[arg(long, default_value = "/")]
    path: String,

    /// Router address (host:port). Requests carry the route in the Host header.
    #[arg(long, env = "VIZZINI_ROUTER_ADDR")]
    router: Option<String>,

    /// Number of requests.
    #[arg(long, default_value_t = 100)]
    samples: usize,

    /// Delay between requests, in milliseconds.
    #[arg(long, default_value_t = 10)]
    interval_ms: u64,

    /// Allowed fraction of bad responses.
    #[arg(long, default_value_t = 0.01)]
    budget: f64,
}

#[derive(Debug, Serialize, Tabled)]
struct ProbeRow {
    #[tabled(rename = "Host")]
    host: String,

    #[tabled(rename = "Attempts")]
    attempts: usize,

    #[tabled(rename = "Bad")]
    bad: usize,

    #[tabled(rename = "Rate")]
    rate: String,
}

impl ProbeCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let client = match &self.router {
            Some(addr) => HttpRouteClient::with_router(addr.clone()),
            None => HttpRouteClient::new(),
        }
        .map_err(CliError::from)?;

        if ctx.format == OutputFormat::Table {
            print_info(&format!(
                "Probing {}{} {} times",
                self.host, self.path, self.samples
            ));
        }

        let mut budget = ErrorBudget::default();
        let mut ticker = tokio::time::interval(Duration::from_millis(self.interval_ms.max(1)));
        for _ in 0..self.samples {
            ticker.tick().await;
            let status = match client.get(&self.host, &self.path).await {
                Ok(response) => response.status,
                Err(e) => {
                    tracing::debug!(error = %e, "Probe failed");
                    0
                }
            };
            budget.record(status);
        }

        print_single(
            &ProbeRow {
                host: self.host.clone(),
                attempts: budget.attempts,
                bad: budget.failures.len(),
                rate: format!("{:.3}%", budget.rate() * 100.0),
            },
            ctx.format,
        );

        if !budget.within(self.budget) {
            return Err(CliError::ProbeFailed {
                bad: budget.failures.len(),
                attempts: budget.attempts,
            }
            .into());
        }
        Ok(())
    }
}
