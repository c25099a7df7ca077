use crate::output::{print_json, print_table};
use deckhand_core::backup;
use deckhand_core::config::Config;
use deckhand_core::exec::Executor;
use deckhand_core::service::{self, UnitStatus};
use deckhand_core::state::DeployState;
use deckhand_core::target::DeployTarget;
use deckhand_core::Result;
use serde::Serialize;

#[derive(Serialize)]
struct TargetStatus {
    name: String,
    root: String,
    last_good_rev: Option<String>,
    latest_backup: Option<String>,
    overrides: Vec<String>,
    units: Vec<UnitStatus>,
}

/// Show deploy and unit state for one target, or the whole fleet.
pub fn run(config: &Config, target: Option<&str>, json: bool) -> Result<()> {
    let targets: Vec<&DeployTarget> = match target {
        Some(name) => vec![config.target(name)?],
        None => config.targets.values().collect(),
    };

    let statuses: Vec<TargetStatus> = targets
        .iter()
        .map(|t| gather(t))
        .collect::<Result<_>>()?;

    if json {
        return print_json(&statuses);
    }

    for status in &statuses {
        println!("Target: {} ({})", status.name, status.root);
        println!(
            "  last good revision: {}",
            status.last_good_rev.as_deref().unwrap_or("(none)")
        );
        println!(
            "  latest backup:      {}",
            status.latest_backup.as_deref().unwrap_or("(none)")
        );
        if !status.overrides.is_empty() {
            println!("  overrides:          {}", status.overrides.join(", "));
        }
        if status.units.is_empty() {
            println!("  (no units managed)");
        } else {
            let rows: Vec<Vec<String>> = status
                .units
                .iter()
                .map(|u| {
                    vec![u.unit.clone(), u.active.clone(), u.enabled.clone()]
                })
                .collect();
            print_table(&["UNIT", "ACTIVE", "ENABLED"], rows);
        }
        println!();
    }
    Ok(())
}

fn gather(target: &DeployTarget) -> Result<TargetStatus> {
    let exec = Executor::live();
    let state = DeployState::load(&target.root)?;
    let latest_backup = backup::latest(target)?.map(|p| p.display().to_string());
    Ok(TargetStatus {
        name: target.name.clone(),
        root: target.root.display().to_string(),
        last_good_rev: state.last_good_rev,
        latest_backup,
        overrides: state.overrides.iter().map(|o| o.path.clone()).collect(),
        units: service::status(target, &exec)?,
    })
}
