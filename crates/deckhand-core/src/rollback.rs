//! Rollback to the last known-good state.
//!
//! Modeled as an explicit state machine rather than a call sequence: a
//! failure must report exactly which stage broke, because a half-rolled-back
//! target needs different manual repair depending on where it stopped.
//! Order matters: units stop before the database restore (a running writer
//! would corrupt the copy), the source resets before units restart.

use crate::backup;
use crate::error::{DeployError, Result};
use crate::exec::Executor;
use crate::service;
use crate::state::DeployState;
use crate::sync;
use crate::target::DeployTarget;
use crate::verify;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Stopping,
    RestoringDatabase,
    ResettingSource,
    Restarting,
    Verifying,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Stopping => "stopping services",
            Stage::RestoringDatabase => "restoring database",
            Stage::ResettingSource => "resetting source",
            Stage::Restarting => "restarting services",
            Stage::Verifying => "verifying",
            Stage::Done => "done",
        }
    }

    fn next(&self) -> Stage {
        match self {
            Stage::Stopping => Stage::RestoringDatabase,
            Stage::RestoringDatabase => Stage::ResettingSource,
            Stage::ResettingSource => Stage::Restarting,
            Stage::Restarting => Stage::Verifying,
            Stage::Verifying => Stage::Done,
            Stage::Done => Stage::Done,
        }
    }
}

/// Roll the target back to the recorded revision and newest verified
/// snapshot. Returns a summary line.
pub fn run(target: &DeployTarget, state: &DeployState, exec: &mut Executor) -> Result<String> {
    let rev = state.last_good_rev.as_deref().ok_or_else(|| {
        DeployError::RollbackFailed {
            state: "start".to_string(),
            message: "no recorded last good revision; nothing to roll back to".to_string(),
        }
    })?;

    let mut stage = Stage::Stopping;
    while stage != Stage::Done {
        tracing::info!("rollback: {}", stage.as_str());
        step(stage, target, rev, exec).map_err(|e| DeployError::RollbackFailed {
            state: stage.as_str().to_string(),
            message: e.to_string(),
        })?;
        stage = stage.next();
    }

    Ok(format!("rolled back to {}", &rev[..rev.len().min(12)]))
}

fn step(stage: Stage, target: &DeployTarget, rev: &str, exec: &mut Executor) -> Result<()> {
    match stage {
        Stage::Stopping => service::stop_all(target, exec),
        Stage::RestoringDatabase => restore_database(target, exec),
        Stage::ResettingSource => {
            exec.run(sync::git(&target.root).args(["reset", "--hard", rev]))?;
            Ok(())
        }
        Stage::Restarting => service::run(target, exec).map(|_| ()),
        Stage::Verifying => {
            if exec.is_dry_run() {
                exec.record("verify units, health endpoint and database".to_string());
                return Ok(());
            }
            verify::run(target, exec)?.into_result().map(|_| ())
        }
        Stage::Done => Ok(()),
    }
}

fn restore_database(target: &DeployTarget, exec: &mut Executor) -> Result<()> {
    let Some(db) = target.db_path() else {
        return Ok(());
    };
    let Some(snapshot) = backup::latest(target)? else {
        tracing::warn!("{}: no snapshot available, database left as-is", target.name);
        return Ok(());
    };
    // Never restore from a copy that doesn't verify.
    backup::check_integrity(&snapshot)?;
    // A stopped service can leave uncheckpointed -wal/-shm journals behind;
    // SQLite would replay them over the restored copy on the next open.
    for journal in [sidecar(&db, "-wal"), sidecar(&db, "-shm")] {
        if journal.exists() {
            exec.remove_file(&journal)?;
        }
    }
    exec.copy_file(&snapshot, &db)?;
    if !exec.is_dry_run() {
        backup::check_integrity(&db)?;
    }
    Ok(())
}

fn sidecar(db: &Path, suffix: &str) -> PathBuf {
    let mut name = db.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
