use crate::output::{print_json, print_table};
use deckhand_core::config::PreflightConfig;
use deckhand_core::orchestrator::{self, RunOptions};
use deckhand_core::phase::RunMode;
use deckhand_core::report::RunSummary;
use deckhand_core::target::DeployTarget;
use deckhand_core::Result;

pub fn run(
    target: &DeployTarget,
    preflight: &PreflightConfig,
    mode: RunMode,
    skip_backup: bool,
    json: bool,
) -> Result<()> {
    let opts = RunOptions { mode, skip_backup };
    let (summary, error) = orchestrator::run(target, preflight, &opts);

    if json {
        print_json(&summary)?;
    } else {
        print_summary(&summary);
    }

    match error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn print_summary(summary: &RunSummary) {
    println!("Target: {} ({})", summary.target, summary.mode);

    let rows: Vec<Vec<String>> = summary
        .outcomes
        .iter()
        .map(|o| {
            vec![
                o.phase.to_string(),
                o.status.as_str().to_string(),
                o.message.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["PHASE", "STATUS", "DETAIL"], rows);

    if !summary.planned_actions.is_empty() {
        println!("\nPlanned actions:");
        for action in &summary.planned_actions {
            println!("  {action}");
        }
    }

    let duration = summary.finished_at - summary.started_at;
    let verdict = if summary.ok { "ok" } else { "FAILED" };
    println!(
        "\n{verdict} in {:.1}s",
        duration.num_milliseconds() as f64 / 1000.0
    );
}
