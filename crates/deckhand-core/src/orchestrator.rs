//! The deploy driver: runs the phase sequence for one target and produces
//! the structured run summary.
//!
//! Phases outside the selected mode's scope are reported as skipped, a
//! failed phase halts the run and everything after it is reported as
//! not-run. Nothing here performs work itself; each phase module does, all
//! through one [`Executor`] so a dry run stays truthful.

use crate::backup;
use crate::config::PreflightConfig;
use crate::deps;
use crate::error::{DeployError, Result};
use crate::exec::Executor;
use crate::lock::RunLock;
use crate::perms;
use crate::phase::{Phase, RunMode};
use crate::preflight;
use crate::report::{PhaseOutcome, PhaseStatus, RunSummary};
use crate::rollback;
use crate::service;
use crate::state::DeployState;
use crate::sync;
use crate::target::DeployTarget;
use crate::verify;
use chrono::Utc;

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Operator explicitly accepts deploying without a fresh snapshot.
    pub skip_backup: bool,
}

/// Execute the phase sequence for one target. The summary is always
/// produced; a failure is carried alongside it so the caller keeps both the
/// per-phase record and the typed error (for the exit code).
pub fn run(
    target: &DeployTarget,
    preflight_cfg: &PreflightConfig,
    opts: &RunOptions,
) -> (RunSummary, Option<DeployError>) {
    let started_at = Utc::now();
    let mode = opts.mode;

    let mut summary = RunSummary {
        target: target.name.clone(),
        mode,
        started_at,
        finished_at: started_at,
        ok: false,
        outcomes: Vec::new(),
        planned_actions: Vec::new(),
        error: None,
        hint: None,
    };

    // Mutating modes serialize per target. Held for the whole run; flock
    // releases on process exit even after a crash.
    let _lock = if mode.mutates() {
        match RunLock::acquire(&target.root) {
            Ok(lock) => Some(lock),
            Err(e) => return finish(summary, Some(e)),
        }
    } else {
        None
    };

    let mut state = match DeployState::load(&target.root) {
        Ok(s) => s,
        Err(e) => return finish(summary, Some(e)),
    };

    let mut exec = if mode == RunMode::DryRun {
        Executor::dry_run()
    } else {
        Executor::live()
    };

    let mut error: Option<DeployError> = None;
    for phase in Phase::ALL {
        if !mode.phases().contains(&phase) {
            summary.outcomes.push(PhaseOutcome {
                phase,
                status: PhaseStatus::Skipped,
                message: Some(format!("outside {mode} scope")),
            });
            continue;
        }
        if error.is_some() {
            summary.outcomes.push(PhaseOutcome {
                phase,
                status: PhaseStatus::NotRun,
                message: None,
            });
            continue;
        }

        tracing::info!(target = %target.name, phase = %phase, "phase starting");
        let outcome =
            run_phase(phase, target, preflight_cfg, opts, &mut state, &mut exec);
        match outcome {
            Ok(PhaseResult::Ran(message)) => {
                // Dry-run phases after the live preflight only planned work.
                let status = if exec.is_dry_run() && phase != Phase::Preflight {
                    PhaseStatus::Planned
                } else {
                    PhaseStatus::Passed
                };
                summary.outcomes.push(PhaseOutcome {
                    phase,
                    status,
                    message,
                });
            }
            Ok(PhaseResult::Skipped(reason)) => {
                summary.outcomes.push(PhaseOutcome {
                    phase,
                    status: PhaseStatus::Skipped,
                    message: Some(reason),
                });
            }
            Err(e) => {
                tracing::error!(target = %target.name, phase = %phase, "phase failed: {e}");
                summary.outcomes.push(PhaseOutcome {
                    phase,
                    status: PhaseStatus::Failed,
                    message: Some(e.to_string()),
                });
                error = Some(e);
            }
        }
    }

    summary.planned_actions = exec.planned().to_vec();
    finish(summary, error)
}

enum PhaseResult {
    Ran(Option<String>),
    Skipped(String),
}

fn run_phase(
    phase: Phase,
    target: &DeployTarget,
    preflight_cfg: &PreflightConfig,
    opts: &RunOptions,
    state: &mut DeployState,
    exec: &mut Executor,
) -> Result<PhaseResult> {
    match phase {
        Phase::Preflight => {
            let diags = preflight::run(target, preflight_cfg, exec)?;
            if diags.is_empty() {
                Ok(PhaseResult::Ran(None))
            } else {
                Err(DeployError::Preflight(diags))
            }
        }
        Phase::Backup => {
            if opts.skip_backup {
                tracing::warn!(
                    target = %target.name,
                    "backup skipped by --skip-backup; no fresh snapshot for this deploy"
                );
                return Ok(PhaseResult::Skipped(
                    "skipped by --skip-backup".to_string(),
                ));
            }
            if target.database.is_none() {
                return Ok(PhaseResult::Skipped("no database configured".to_string()));
            }
            let record = backup::run(target, exec)?;
            Ok(PhaseResult::Ran(
                record.map(|r| format!("snapshot {}", r.snapshot.display())),
            ))
        }
        Phase::Sync => sync::run(target, state, exec).map(|m| PhaseResult::Ran(Some(m))),
        Phase::Dependencies => {
            if target.manifest.is_none() {
                return Ok(PhaseResult::Skipped("no manifest configured".to_string()));
            }
            deps::run(target, state, exec).map(|m| PhaseResult::Ran(Some(m)))
        }
        Phase::Permissions => perms::run(target, exec).map(|m| PhaseResult::Ran(Some(m))),
        Phase::Services => {
            let msg = if opts.mode == RunMode::RestartOnly {
                service::restart_only(target, exec)?
            } else {
                service::run(target, exec)?
            };
            Ok(PhaseResult::Ran(Some(msg)))
        }
        Phase::Verify => {
            if exec.record("verify units, health endpoint and database".to_string()) {
                return Ok(PhaseResult::Ran(None));
            }
            let report = verify::run(target, exec)?.into_result()?;
            Ok(PhaseResult::Ran(Some(format!(
                "{} check(s) passed",
                report.checks.len()
            ))))
        }
    }
}

fn finish(mut summary: RunSummary, error: Option<DeployError>) -> (RunSummary, Option<DeployError>) {
    summary.finished_at = Utc::now();
    summary.ok = error.is_none();
    if let Some(e) = &error {
        summary.error = Some(e.to_string());
        summary.hint = e.hint().map(String::from);
    }
    (summary, error)
}

/// Roll the target back under the run lock. `--rollback` is itself a
/// mutating run and excludes concurrent deploys.
pub fn run_rollback(target: &DeployTarget) -> Result<String> {
    let _lock = RunLock::acquire(&target.root)?;
    let state = DeployState::load(&target.root)?;
    rollback::run(target, &state, &mut Executor::live())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{DatabaseConfig, Upstream};
    use std::path::{Path, PathBuf};
    use std::process::Command;
    use tempfile::TempDir;

    fn lenient_preflight() -> PreflightConfig {
        PreflightConfig {
            min_free_disk_mb: 0,
            min_free_mem_mb: 0,
            require_root: false,
            required_tools: vec![],
        }
    }

    fn target_at(dir: &Path) -> DeployTarget {
        DeployTarget {
            name: "t".into(),
            root: dir.to_path_buf(),
            service_user: current_user(),
            services: vec![],
            timers: vec![],
            unit_dir: PathBuf::from("deploy/systemd"),
            upstream: Upstream::default(),
            database: None,
            secrets_file: PathBuf::from(".env"),
            data_dirs: vec![],
            manifest: None,
            health: None,
            firewall_ports: vec![],
        }
    }

    fn current_user() -> String {
        std::env::var("USER").unwrap_or_else(|_| "root".into())
    }

    fn scaffold(dir: &Path) {
        std::fs::create_dir_all(dir.join("deploy/systemd")).unwrap();
        std::fs::write(dir.join(".env"), b"X=1\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir.join(".env"), std::fs::Permissions::from_mode(0o600))
                .unwrap();
        }
    }

    #[test]
    fn check_mode_runs_preflight_and_skips_the_rest() {
        let dir = TempDir::new().unwrap();
        scaffold(dir.path());
        let target = target_at(dir.path());

        let opts = RunOptions {
            mode: RunMode::Check,
            skip_backup: false,
        };
        let (summary, err) = run(&target, &lenient_preflight(), &opts);
        assert!(err.is_none(), "{err:?}");
        assert!(summary.ok);
        assert_eq!(
            summary.outcome_for(Phase::Preflight).unwrap().status,
            PhaseStatus::Passed
        );
        for phase in [Phase::Backup, Phase::Sync, Phase::Services, Phase::Verify] {
            assert_eq!(
                summary.outcome_for(phase).unwrap().status,
                PhaseStatus::Skipped
            );
        }
    }

    #[test]
    fn check_mode_reports_preflight_diagnostics() {
        let dir = TempDir::new().unwrap();
        // No scaffold: secrets and unit dir are missing.
        let target = target_at(dir.path());

        let opts = RunOptions {
            mode: RunMode::Check,
            skip_backup: false,
        };
        let (summary, err) = run(&target, &lenient_preflight(), &opts);
        let err = err.unwrap();
        assert_eq!(err.exit_code(), 3);
        assert!(!summary.ok);
        assert_eq!(
            summary.outcome_for(Phase::Preflight).unwrap().status,
            PhaseStatus::Failed
        );
    }

    #[test]
    fn backup_failure_halts_the_run_and_marks_later_phases_not_run() {
        let dir = TempDir::new().unwrap();
        scaffold(dir.path());
        let mut target = target_at(dir.path());
        target.database = Some(DatabaseConfig {
            path: PathBuf::from("data/app.db"),
            backup_dir: PathBuf::from("backups"),
            retention: 10,
        });
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/app.db"), b"not sqlite").unwrap();

        let opts = RunOptions {
            mode: RunMode::Full,
            skip_backup: false,
        };
        let (summary, err) = run(&target, &lenient_preflight(), &opts);
        assert_eq!(err.unwrap().exit_code(), 4);
        assert_eq!(
            summary.outcome_for(Phase::Backup).unwrap().status,
            PhaseStatus::Failed
        );
        for phase in [Phase::Sync, Phase::Permissions, Phase::Services, Phase::Verify] {
            assert_eq!(
                summary.outcome_for(phase).unwrap().status,
                PhaseStatus::NotRun,
                "{phase}"
            );
        }
    }

    #[test]
    fn skip_backup_reports_skipped_not_failed() {
        let dir = TempDir::new().unwrap();
        scaffold(dir.path());
        let mut target = target_at(dir.path());
        target.database = Some(DatabaseConfig {
            path: PathBuf::from("data/app.db"),
            backup_dir: PathBuf::from("backups"),
            retention: 10,
        });
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/app.db"), b"not sqlite").unwrap();

        // Corrupt database, but the phase never runs; the failure surfaces
        // later at sync (not a git repository), not at backup.
        let opts = RunOptions {
            mode: RunMode::Full,
            skip_backup: true,
        };
        let (summary, err) = run(&target, &lenient_preflight(), &opts);
        assert!(err.is_some());
        assert_eq!(
            summary.outcome_for(Phase::Backup).unwrap().status,
            PhaseStatus::Skipped
        );
        assert_eq!(
            summary.outcome_for(Phase::Sync).unwrap().status,
            PhaseStatus::Failed
        );
    }

    #[test]
    fn lock_held_fails_fast_with_nothing_run() {
        let dir = TempDir::new().unwrap();
        scaffold(dir.path());
        let target = target_at(dir.path());
        let _held = RunLock::acquire(dir.path()).unwrap();

        let opts = RunOptions {
            mode: RunMode::Full,
            skip_backup: false,
        };
        let (summary, err) = run(&target, &lenient_preflight(), &opts);
        assert_eq!(err.unwrap().exit_code(), 2);
        assert!(summary.outcomes.is_empty());
    }

    #[test]
    fn dry_run_plans_a_full_deploy_without_mutating() {
        if which::which("git").is_err() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("clone");

        // Minimal self-hosted repository: origin is a bare clone of itself.
        let seed = dir.path().join("seed");
        std::fs::create_dir_all(&seed).unwrap();
        let sh = |cwd: &Path, args: &[&str]| {
            let ok = Command::new(args[0])
                .args(&args[1..])
                .current_dir(cwd)
                .env("GIT_AUTHOR_NAME", "t")
                .env("GIT_AUTHOR_EMAIL", "t@t")
                .env("GIT_COMMITTER_NAME", "t")
                .env("GIT_COMMITTER_EMAIL", "t@t")
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .unwrap()
                .success();
            assert!(ok, "{args:?}");
        };
        sh(&seed, &["git", "init", "-q", "-b", "main"]);
        std::fs::create_dir_all(seed.join("deploy/systemd")).unwrap();
        std::fs::write(seed.join("deploy/systemd/t.service"), b"[Unit]\n").unwrap();
        std::fs::write(seed.join("app.py"), b"print('v1')\n").unwrap();
        sh(&seed, &["git", "add", "."]);
        sh(&seed, &["git", "commit", "-q", "-m", "init"]);
        sh(dir.path(), &["git", "clone", "-q", "--bare", "seed", "upstream.git"]);
        sh(dir.path(), &["git", "clone", "-q", "upstream.git", "clone"]);

        std::fs::write(root.join(".env"), b"X=1\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(root.join(".env"), std::fs::Permissions::from_mode(0o600))
                .unwrap();
        }

        let mut target = target_at(&root);
        target.services = vec!["t.service".into()];

        let opts = RunOptions {
            mode: RunMode::DryRun,
            skip_backup: false,
        };
        let (summary, err) = run(&target, &lenient_preflight(), &opts);
        assert!(err.is_none(), "{:?}", summary.error);
        assert!(summary.ok);
        assert_eq!(
            summary.outcome_for(Phase::Preflight).unwrap().status,
            PhaseStatus::Passed
        );
        for phase in [Phase::Sync, Phase::Permissions, Phase::Services, Phase::Verify] {
            assert_eq!(
                summary.outcome_for(phase).unwrap().status,
                PhaseStatus::Planned,
                "{phase}"
            );
        }
        assert!(!summary.planned_actions.is_empty());
        // No lock file, no state file, no systemd mutation.
        assert!(!root.join(".deckhand").exists());
    }
}
