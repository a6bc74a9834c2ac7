//! Selecting, running and reporting scenarios.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::context::{ScenarioContext, Timeouts};
use crate::deployment::Deployment;
use crate::helpers::actuals_by_process_guid;
use crate::scenarios;

/// Body of a scenario.
pub type ScenarioFn = fn(ScenarioContext) -> BoxFuture<'static, anyhow::Result<()>>;

/// A registered scenario.
#[derive(Clone, Copy)]
pub struct ScenarioSpec {
    pub group: &'static str,
    pub name: &'static str,
    /// Long-running; skipped with `skip_slow`.
    pub slow: bool,
    pub run: ScenarioFn,
}

impl ScenarioSpec {
    /// `group name`, the string focus filters match against.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.group, self.name)
    }
}

impl fmt::Debug for ScenarioSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioSpec")
            .field("group", &self.group)
            .field("name", &self.name)
            .field("slow", &self.slow)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed { message: String },
    Skipped { reason: String },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub group: &'static str,
    pub name: &'static str,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub duration_ms: u64,
}

/// Runs scenarios against one deployment.
pub struct Suite {
    deployment: Arc<dyn Deployment>,
    scenarios: Vec<ScenarioSpec>,
    focus: Option<String>,
    skip_slow: bool,
    parallelism: usize,
    timeouts: Timeouts,
}

impl Suite {
    pub fn new(deployment: Arc<dyn Deployment>) -> Self {
        Self {
            deployment,
            scenarios: scenarios::all(),
            focus: None,
            skip_slow: false,
            parallelism: 1,
            timeouts: Timeouts::default(),
        }
    }

    /// Only run scenarios whose full name contains `focus` (case-insensitive).
    pub fn with_focus(mut self, focus: impl Into<String>) -> Self {
        self.focus = Some(focus.into().to_lowercase());
        self
    }

    pub fn skip_slow(mut self, skip: bool) -> Self {
        self.skip_slow = skip;
        self
    }

    /// Scenarios in flight at once. Clamped to at least one.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn scenarios(&self) -> &[ScenarioSpec] {
        &self.scenarios
    }

    fn focused(&self, spec: &ScenarioSpec) -> bool {
        self.focus
            .as_deref()
            .map_or(true, |focus| spec.full_name().to_lowercase().contains(focus))
    }

    /// Run every focused scenario. Reports come back in registry order.
    pub async fn run(&self) -> Vec<ScenarioReport> {
        let mut reports: Vec<(usize, ScenarioReport)> = futures_util::stream::iter(
            self.scenarios
                .iter()
                .copied()
                .enumerate()
                .filter(|(_, spec)| self.focused(spec)),
        )
        .map(|(position, spec)| async move { (position, self.run_one(spec).await) })
        .buffer_unordered(self.parallelism)
        .collect()
        .await;

        reports.sort_by_key(|(position, _)| *position);
        reports.into_iter().map(|(_, report)| report).collect()
    }

    #[instrument(skip_all, fields(group = spec.group, scenario = spec.name))]
    async fn run_one(&self, spec: ScenarioSpec) -> ScenarioReport {
        if spec.slow && self.skip_slow {
            return ScenarioReport {
                group: spec.group,
                name: spec.name,
                outcome: Outcome::Skipped {
                    reason: "slow".to_string(),
                },
                duration_ms: 0,
            };
        }

        let ctx = ScenarioContext::new(self.deployment.clone(), self.timeouts);
        let started = Instant::now();
        info!(process_guid = %ctx.guid(), "Scenario started");

        let outcome = match AssertUnwindSafe((spec.run)(ctx.clone()))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Outcome::Passed,
            Ok(Err(err)) => Outcome::Failed {
                message: format!("{err:#}"),
            },
            Err(panic) => Outcome::Failed {
                message: panic_message(&*panic),
            },
        };

        cleanup(&ctx).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Outcome::Failed { message } => {
                error!(elapsed_ms, %message, "Scenario failed")
            }
            _ => info!(elapsed_ms, "Scenario passed"),
        }

        ScenarioReport {
            group: spec.group,
            name: spec.name,
            outcome,
            duration_ms: elapsed_ms,
        }
    }
}

/// Remove the scenario's desired LRP and wait for its instances to go.
async fn cleanup(ctx: &ScenarioContext) {
    match ctx.bbs().remove_desired_lrp(&ctx.guid()).await {
        Ok(()) => {}
        Err(err) if err.is_not_found() => return,
        Err(err) => {
            warn!(error = %err, "Failed to remove desired LRP");
            return;
        }
    }

    let drained = ctx
        .eventually()
        .until(
            || actuals_by_process_guid(ctx.bbs(), ctx.guid()),
            |actuals| actuals.is_empty(),
        )
        .await;
    if drained.is_err() {
        warn!(
            timeout = ?ctx.timeouts().convergence,
            "Actual LRPs outlived cleanup"
        );
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

/// Totals over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Summary {
    pub fn of(reports: &[ScenarioReport]) -> Self {
        reports
            .iter()
            .fold(Self::default(), |mut summary, report| {
                match report.outcome {
                    Outcome::Passed => summary.passed += 1,
                    Outcome::Failed { .. } => summary.failed += 1,
                    Outcome::Skipped { .. } => summary.skipped += 1,
                }
                summary
            })
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} passed, {} failed, {} skipped",
            self.passed, self.failed, self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcome: Outcome) -> ScenarioReport {
        ScenarioReport {
            group: "g",
            name: "n",
            outcome,
            duration_ms: 1,
        }
    }

    #[test]
    fn test_summary_counts_outcomes() {
        let reports = vec![
            report(Outcome::Passed),
            report(Outcome::Failed {
                message: "boom".to_string(),
            }),
            report(Outcome::Skipped {
                reason: "slow".to_string(),
            }),
            report(Outcome::Passed),
        ];
        let summary = Summary::of(&reports);
        assert_eq!(
            summary,
            Summary {
                passed: 2,
                failed: 1,
                skipped: 1
            }
        );
        assert!(!summary.is_success());
        assert_eq!(summary.to_string(), "2 passed, 1 failed, 1 skipped");
    }

    #[test]
    fn test_report_serializes_flat() {
        let json = serde_json::to_value(report(Outcome::Failed {
            message: "boom".to_string(),
        }))
        .unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["message"], "boom");
        assert_eq!(json["group"], "g");
    }

    #[test]
    fn test_registry_names_are_unique() {
        let all = scenarios::all();
        let mut names: Vec<String> = all.iter().map(ScenarioSpec::full_name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), all.len());
        assert_eq!(all.iter().filter(|spec| spec.slow).count(), 1);
    }

    #[test]
    fn test_panic_message_extracts_payload() {
        let panic: Box<dyn std::any::Any + Send> = Box::new("nope");
        assert_eq!(panic_message(&*panic), "panicked: nope");
    }
}
