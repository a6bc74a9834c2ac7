//! List command - Show registered scenarios.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use vizzini_conformance::scenarios;

use crate::output::print_output;

use super::CommandContext;

#[derive(Debug, Args)]
pub struct ListCommand {
    /// Only list scenarios whose name contains this text.
    #[arg(long)]
    focus: Option<String>,
}

#[derive(Debug, Serialize, Tabled)]
struct ScenarioRow {
    #[tabled(rename = "Group")]
    group: &'static str,

    #[tabled(rename = "Scenario")]
    name: &'static str,

    #[tabled(rename = "Slow")]
    slow: bool,
}

impl ListCommand {
    pub fn run(self, ctx: CommandContext) -> Result<()> {
        let focus = self.focus.map(|f| f.to_lowercase());
        let rows: Vec<ScenarioRow> = scenarios::all()
            .into_iter()
            .filter(|spec| {
                focus
                    .as_deref()
                    .map_or(true, |f| spec.full_name().to_lowercase().contains(f))
            })
            .map(|spec| ScenarioRow {
                group: spec.group,
                name: spec.name,
                slow: spec.slow,
            })
            .collect();

        print_output(&rows, ctx.format);
        Ok(())
    }
}
