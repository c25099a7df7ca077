//! Ownership and mode normalization.
//!
//! Runs after any phase that can alter ownership (sync, install): the whole
//! root goes back to the service identity, then a fixed mode policy is
//! applied. Stale ownership is a correctness and security bug, so partial
//! failures halt the run rather than being papered over.
//!
//! Policy:
//!   secrets file        0600  owner-only read/write
//!   database files      0640  owner read/write, group read
//!   data directories    0750  owner full, group read/execute
//!   project root        0755  world-readable
//!   shell scripts       0755  executable by all

use crate::error::{DeployError, Result};
use crate::exec::Executor;
use crate::target::DeployTarget;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Enforce ownership and the mode policy across the target root.
pub fn run(target: &DeployTarget, exec: &mut Executor) -> Result<String> {
    let owner = format!("{0}:{0}", target.service_user);
    exec.run(Command::new("chown").arg("-R").arg(&owner).arg(&target.root))
        .map_err(as_permission)?;

    let mut applied = 0usize;
    for (path, mode) in policy_paths(target)? {
        if !path.exists() {
            continue;
        }
        exec.set_mode(&path, mode).map_err(as_permission)?;
        applied += 1;
    }

    Ok(format!(
        "ownership -> {owner}, {applied} mode assignments applied"
    ))
}

/// Every path the mode policy covers, with its mode. Pure with respect to
/// the policy; reads the tree only to discover scripts and database files.
pub fn policy_paths(target: &DeployTarget) -> Result<Vec<(PathBuf, u32)>> {
    let mut out: Vec<(PathBuf, u32)> = Vec::new();

    out.push((target.root.clone(), 0o755));
    out.push((target.secrets_path(), 0o600));

    if let Some(db) = target.db_path() {
        // Sidecar journals carry the same data as the database itself.
        for suffix in ["-wal", "-shm"] {
            let mut name = db.file_name().unwrap_or_default().to_os_string();
            name.push(suffix);
            out.push((db.with_file_name(name), 0o640));
        }
        out.push((db, 0o640));
    }
    if let Some(backup_dir) = target.backup_dir() {
        out.push((backup_dir.clone(), 0o750));
        if backup_dir.is_dir() {
            for entry in std::fs::read_dir(&backup_dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "db") {
                    out.push((path, 0o640));
                }
            }
        }
    }

    for data_dir in &target.data_dirs {
        collect_dirs(&target.root.join(data_dir), 0o750, &mut out)?;
    }

    collect_scripts(&target.root, &mut out)?;

    Ok(out)
}

fn collect_dirs(dir: &Path, mode: u32, out: &mut Vec<(PathBuf, u32)>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    out.push((dir.to_path_buf(), mode));
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_dirs(&path, mode, out)?;
        }
    }
    Ok(())
}

fn collect_scripts(dir: &Path, out: &mut Vec<(PathBuf, u32)>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        if path.is_dir() {
            // Not ours to rummage through.
            if name == ".git" || name == "venv" || name == ".cache" {
                continue;
            }
            collect_scripts(&path, out)?;
        } else if name.ends_with(".sh") {
            out.push((path, 0o755));
        }
    }
    Ok(())
}

fn as_permission(e: DeployError) -> DeployError {
    match e {
        DeployError::CommandFailed { .. }
        | DeployError::CommandTimeout { .. }
        | DeployError::Io(_) => DeployError::Permission(e.to_string()),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
