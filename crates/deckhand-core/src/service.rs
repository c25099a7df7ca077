//! Systemd unit lifecycle: install, reload, restart, enable.
//!
//! Unit definitions live in the repository and are copied into systemd's
//! unit directory on every deploy, so the running units always match the
//! deployed revision. The order is fixed: copy, daemon-reload, restart,
//! enable. Restarting before the reload would start units from stale
//! definitions.

use crate::error::{DeployError, Result, ServiceStep};
use crate::exec::Executor;
use crate::paths;
use crate::target::DeployTarget;
use std::path::Path;
use std::process::Command;

/// Install unit files, reload the daemon, restart and enable everything the
/// target manages. Returns a summary line.
pub fn run(target: &DeployTarget, exec: &mut Executor) -> Result<String> {
    install_units(target, exec, Path::new(paths::SYSTEMD_UNIT_DIR))?;
    daemon_reload(exec)?;
    restart_units(target, exec)?;
    enable_units(target, exec)?;
    Ok(format!(
        "{} unit(s) installed, restarted and enabled",
        target.all_units().len()
    ))
}

/// The restart step alone, for `--restart-only`. No unit files move and
/// nothing is (re-)enabled.
pub fn restart_only(target: &DeployTarget, exec: &mut Executor) -> Result<String> {
    restart_units(target, exec)?;
    Ok(format!("{} unit(s) restarted", target.all_units().len()))
}

/// Stop every managed unit. Used by rollback before the database restore.
pub fn stop_all(target: &DeployTarget, exec: &mut Executor) -> Result<()> {
    for unit in target.all_units() {
        exec.run(Command::new("systemctl").args(["stop", unit]))
            .map_err(as_service(ServiceStep::Stop))?;
    }
    Ok(())
}

fn install_units(target: &DeployTarget, exec: &mut Executor, unit_dir: &Path) -> Result<()> {
    let source_dir = target.unit_source_dir();
    for unit in target.all_units() {
        let src = source_dir.join(unit);
        // Checked in every mode; a dry run must still catch a unit the
        // repository does not provide.
        if !src.is_file() {
            return Err(DeployError::Service {
                step: ServiceStep::Copy,
                message: format!("unit definition missing: {}", src.display()),
            });
        }
        exec.copy_file(&src, &unit_dir.join(unit))
            .map_err(as_service(ServiceStep::Copy))?;
    }
    Ok(())
}

fn daemon_reload(exec: &mut Executor) -> Result<()> {
    exec.run(Command::new("systemctl").arg("daemon-reload"))
        .map_err(as_service(ServiceStep::Reload))?;
    Ok(())
}

fn restart_units(target: &DeployTarget, exec: &mut Executor) -> Result<()> {
    for unit in target.all_units() {
        exec.run(Command::new("systemctl").args(["restart", unit]))
            .map_err(as_service(ServiceStep::Restart))?;
    }
    Ok(())
}

fn enable_units(target: &DeployTarget, exec: &mut Executor) -> Result<()> {
    let units = target.units_to_enable();
    if units.is_empty() {
        return Ok(());
    }
    let mut cmd = Command::new("systemctl");
    cmd.arg("enable").args(&units);
    exec.run(&mut cmd).map_err(enable_failure)?;
    Ok(())
}

/// Enable runs last, so by the time it fails the restart already succeeded.
/// The report must say so: the units are up right now and will stay up, but
/// silently won't come back after a reboot.
fn enable_failure(e: DeployError) -> DeployError {
    match as_service(ServiceStep::Enable)(e) {
        DeployError::Service { step, message } => DeployError::Service {
            step,
            message: format!("{message}; units restarted and are running, but will not start at boot"),
        },
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Status probes
// ---------------------------------------------------------------------------

/// One unit's activation and enablement state as systemd reports them.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UnitStatus {
    pub unit: String,
    /// "active", "inactive", "failed", ...
    pub active: String,
    /// "enabled", "disabled", "static", ...
    pub enabled: String,
}

impl UnitStatus {
    pub fn is_active(&self) -> bool {
        self.active == "active"
    }
}

/// Probe every managed unit. Read-only in every mode.
pub fn status(target: &DeployTarget, exec: &Executor) -> Result<Vec<UnitStatus>> {
    target
        .all_units()
        .iter()
        .map(|unit| {
            // Both probes signal through the exit code as well as stdout;
            // the stdout word is what we report.
            let active = exec
                .query(Command::new("systemctl").args(["is-active", unit]))?
                .stdout
                .trim()
                .to_string();
            let enabled = exec
                .query(Command::new("systemctl").args(["is-enabled", unit]))?
                .stdout
                .trim()
                .to_string();
            Ok(UnitStatus {
                unit: unit.to_string(),
                active,
                enabled,
            })
        })
        .collect()
}

fn as_service(step: ServiceStep) -> impl Fn(DeployError) -> DeployError {
    move |e| match e {
        DeployError::CommandFailed { .. }
        | DeployError::CommandTimeout { .. }
        | DeployError::ToolNotFound(_)
        | DeployError::Io(_) => DeployError::Service {
            step,
            message: e.to_string(),
        },
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
