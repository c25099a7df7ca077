//! Environment validation before any mutation.
//!
//! Collects one diagnostic per failed check rather than stopping at the
//! first, so an operator fixes everything in one pass. Mutates nothing.

use crate::config::PreflightConfig;
use crate::error::Result;
use crate::exec::Executor;
use crate::target::DeployTarget;
use std::path::Path;
use std::process::Command;

/// Run every preflight check; an empty list means the environment passed.
pub fn run(target: &DeployTarget, cfg: &PreflightConfig, exec: &Executor) -> Result<Vec<String>> {
    let mut diags = Vec::new();

    if cfg.require_root && !is_root() {
        diags.push("not running with elevated privilege (euid != 0)".to_string());
    }

    for tool in &cfg.required_tools {
        if which::which(tool).is_err() {
            diags.push(format!("required tool not found on PATH: {tool}"));
        }
    }

    if !target.root.is_dir() {
        diags.push(format!(
            "target root does not exist: {}",
            target.root.display()
        ));
    } else {
        if !target.unit_source_dir().is_dir() {
            diags.push(format!(
                "unit definition directory missing: {}",
                target.unit_source_dir().display()
            ));
        }
        if let Some(err) = check_secrets(&target.secrets_path()) {
            diags.push(err);
        }
        if let Some(db) = target.db_path() {
            if !db.exists() {
                diags.push(format!("database file missing: {}", db.display()));
            }
        }
    }

    if let Some(err) = check_service_user(target, exec) {
        diags.push(err);
    }

    if cfg.min_free_disk_mb > 0 {
        if let Some(err) = check_disk(&target.root, cfg.min_free_disk_mb) {
            diags.push(err);
        }
    }
    if cfg.min_free_mem_mb > 0 {
        if let Some(err) = check_memory(cfg.min_free_mem_mb) {
            diags.push(err);
        }
    }

    Ok(diags)
}

fn is_root() -> bool {
    #[cfg(unix)]
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe {
        libc::geteuid() == 0
    }
    #[cfg(not(unix))]
    false
}

/// The secrets file must exist and be readable by its owner only.
fn check_secrets(path: &Path) -> Option<String> {
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return Some(format!("secrets file missing: {}", path.display())),
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = meta.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            return Some(format!(
                "secrets file {} has permissive mode {:o} (expected owner-only, e.g. 600)",
                path.display(),
                mode
            ));
        }
    }
    let _ = meta;
    None
}

/// Resolve the service identity with `id -u`; failure means the account the
/// whole permission model hangs on does not exist.
fn check_service_user(target: &DeployTarget, exec: &Executor) -> Option<String> {
    let out = exec.query(Command::new("id").args(["-u", &target.service_user]));
    match out {
        Ok(out) if out.success() => None,
        _ => Some(format!(
            "service user '{}' does not exist",
            target.service_user
        )),
    }
}

fn check_disk(root: &Path, min_mb: u64) -> Option<String> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    // Pick the disk whose mount point is the longest prefix of the root.
    let disk = disks
        .iter()
        .filter(|d| root.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())?;
    let free_mb = disk.available_space() / (1024 * 1024);
    if free_mb < min_mb {
        return Some(format!(
            "insufficient disk space on {}: {free_mb} MiB free, {min_mb} MiB required",
            disk.mount_point().display()
        ));
    }
    None
}

fn check_memory(min_mb: u64) -> Option<String> {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    let avail_mb = sys.available_memory() / (1024 * 1024);
    if avail_mb < min_mb {
        return Some(format!(
            "insufficient memory: {avail_mb} MiB available, {min_mb} MiB required"
        ));
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
