//! Post-deploy verification: unit activity, health endpoint, database
//! integrity. All probes are read-only; a failed verification never undoes
//! the deploy by itself, it reports so the operator (or automation) can
//! decide to roll back.

use crate::backup;
use crate::error::{DeployError, Result};
use crate::exec::Executor;
use crate::service;
use crate::target::DeployTarget;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct VerifyCheck {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct VerifyReport {
    pub checks: Vec<VerifyCheck>,
}

impl VerifyReport {
    pub fn ok(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }

    pub fn failures(&self) -> Vec<&VerifyCheck> {
        self.checks.iter().filter(|c| !c.ok).collect()
    }

    fn push(&mut self, name: impl Into<String>, ok: bool, detail: impl Into<String>) {
        self.checks.push(VerifyCheck {
            name: name.into(),
            ok,
            detail: detail.into(),
        });
    }

    /// Error carrying every failed check, or Ok when all passed.
    pub fn into_result(self) -> Result<VerifyReport> {
        if self.ok() {
            return Ok(self);
        }
        let summary = self
            .failures()
            .iter()
            .map(|c| format!("{}: {}", c.name, c.detail))
            .collect::<Vec<_>>()
            .join("; ");
        Err(DeployError::Verification(summary))
    }
}

/// Run every applicable check for the target. Individual check failures
/// land in the report; only probe plumbing errors become hard errors.
pub fn run(target: &DeployTarget, exec: &Executor) -> Result<VerifyReport> {
    let mut report = VerifyReport::default();

    for unit in service::status(target, exec)? {
        report.push(
            format!("unit {}", unit.unit),
            unit.is_active(),
            unit.active.clone(),
        );
    }

    if let Some(health) = &target.health {
        let (ok, detail) = probe_health(&health.url, Duration::from_secs(health.timeout_secs));
        report.push("health endpoint", ok, detail);
    }

    if let Some(db) = target.db_path() {
        match backup::check_integrity(&db) {
            Ok(()) => report.push("database integrity", true, "ok"),
            Err(e) => report.push("database integrity", false, e.to_string()),
        }
    }

    Ok(report)
}

fn probe_health(url: &str, timeout: Duration) -> (bool, String) {
    let client = match reqwest::blocking::Client::builder().timeout(timeout).build() {
        Ok(c) => c,
        Err(e) => return (false, format!("client: {e}")),
    };
    match client.get(url).send() {
        Ok(resp) if resp.status().is_success() => (true, resp.status().to_string()),
        Ok(resp) => (false, format!("unexpected status {}", resp.status())),
        Err(e) => (false, format!("unreachable: {e}")),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
