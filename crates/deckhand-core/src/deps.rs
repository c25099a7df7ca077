//! Dependency installation, as the service identity, idempotently.
//!
//! Installs never run with elevated identity: everything goes through
//! `sudo -u <service_user>` with HOME and the pip cache pointed inside the
//! target root, because the service account has no interactive home. The
//! manifest is fingerprinted so an unchanged manifest performs no work.

use crate::error::{DeployError, Result};
use crate::exec::Executor;
use crate::state::DeployState;
use crate::target::DeployTarget;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

const PIP_TIMEOUT: Duration = Duration::from_secs(600);

/// Install/update the target's dependency manifest. Returns a summary.
pub fn run(
    target: &DeployTarget,
    state: &mut DeployState,
    exec: &mut Executor,
) -> Result<String> {
    let manifest_cfg = target.manifest.as_ref().ok_or_else(|| {
        DeployError::DependencyInstall(format!("target '{}' has no manifest", target.name))
    })?;
    let manifest = target.root.join(&manifest_cfg.path);
    let venv = target.root.join(&manifest_cfg.venv);

    let fingerprint = fingerprint_file(&manifest)
        .map_err(|e| DeployError::DependencyInstall(format!("{}: {e}", manifest.display())))?;

    if state.manifest_fingerprint.as_deref() == Some(fingerprint.as_str()) && venv.exists() {
        return Ok("manifest unchanged, nothing to install".to_string());
    }

    if !venv.exists() {
        let mut mkvenv = as_user(target, &["python3", "-m", "venv", &venv.to_string_lossy()]);
        exec.run_with_timeout(&mut mkvenv, PIP_TIMEOUT)
            .map_err(as_install)?;
    }

    let pip = venv.join("bin/pip").to_string_lossy().into_owned();

    // The package manager upgrades itself before anything else.
    let mut upgrade = as_user(target, &[&pip, "install", "--quiet", "--upgrade", "pip"]);
    exec.run_with_timeout(&mut upgrade, PIP_TIMEOUT)
        .map_err(as_install)?;

    let mut install = as_user(
        target,
        &[&pip, "install", "--quiet", "-r", &manifest.to_string_lossy()],
    );
    exec.run_with_timeout(&mut install, PIP_TIMEOUT)
        .map_err(as_install)?;

    state.manifest_fingerprint = Some(fingerprint);
    if !exec.record("update .deckhand/state.yaml".to_string()) {
        state.save(&target.root)?;
    }

    Ok(format!("installed from {}", manifest_cfg.path.display()))
}

/// Build a command running as the service identity with a non-interactive
/// environment rooted inside the target.
fn as_user(target: &DeployTarget, argv: &[&str]) -> Command {
    let mut cmd = Command::new("sudo");
    cmd.arg("-u").arg(&target.service_user).arg("env");
    cmd.arg(format!("HOME={}", target.root.display()));
    cmd.arg(format!(
        "PIP_CACHE_DIR={}",
        target.root.join(".cache/pip").display()
    ));
    cmd.args(argv);
    cmd
}

pub fn fingerprint_file(path: &Path) -> std::io::Result<String> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(format!("{:x}", hasher.finalize()))
}

fn as_install(e: DeployError) -> DeployError {
    match e {
        DeployError::CommandFailed { .. }
        | DeployError::CommandTimeout { .. }
        | DeployError::ToolNotFound(_) => DeployError::DependencyInstall(e.to_string()),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
