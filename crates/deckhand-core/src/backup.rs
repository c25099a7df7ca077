//! Integrity-checked SQLite snapshots with retention pruning.
//!
//! Snapshots use the SQLite online-backup API rather than a raw file copy,
//! so a database being written by a live service still produces a
//! consistent copy. A snapshot is kept only when integrity checks pass on
//! both the live file (before) and the copy (after).

use crate::error::{DeployError, Result};
use crate::exec::Executor;
use crate::retry;
use crate::target::DeployTarget;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_RETRIES: u32 = 3;
const BUSY_BASE_DELAY: Duration = Duration::from_millis(250);

/// One verified, timestamped snapshot.
#[derive(Debug, Clone)]
pub struct BackupRecord {
    pub source: PathBuf,
    pub snapshot: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Produce a verified snapshot for the target and prune old ones.
/// Returns `None` in dry-run mode (the intended snapshot is recorded).
pub fn run(target: &DeployTarget, exec: &mut Executor) -> Result<Option<BackupRecord>> {
    let db_cfg = target
        .database
        .as_ref()
        .ok_or_else(|| DeployError::NoDatabase(target.name.clone()))?;
    let db_path = target.root.join(&db_cfg.path);
    let backup_dir = target.root.join(&db_cfg.backup_dir);

    // Data safety outranks deploy progress: a live file that fails its
    // integrity check must abort the run before anything mutates.
    check_integrity_retrying(&db_path)
        .map_err(|e| DeployError::BackupIntegrity(format!("live database {}: {e}", db_path.display())))?;

    let created_at = Utc::now();
    let snapshot = backup_dir.join(snapshot_name(&db_path, created_at));

    if exec.record(format!(
        "sqlite online-backup {} -> {}",
        db_path.display(),
        snapshot.display()
    )) {
        return Ok(None);
    }

    std::fs::create_dir_all(&backup_dir)?;
    snapshot_retrying(&db_path, &snapshot)
        .map_err(|e| DeployError::BackupIntegrity(format!("snapshot failed: {e}")))?;

    if let Err(e) = check_integrity_retrying(&snapshot) {
        // A copy that fails verification is worse than no copy.
        let _ = std::fs::remove_file(&snapshot);
        return Err(DeployError::BackupIntegrity(format!(
            "snapshot {} failed verification: {e}",
            snapshot.display()
        )));
    }

    prune(&backup_dir, &db_path, db_cfg.retention, exec)?;

    tracing::info!("backup written: {}", snapshot.display());
    Ok(Some(BackupRecord {
        source: db_path,
        snapshot,
        created_at,
    }))
}

/// Newest snapshot for a target's database, if any.
pub fn latest(target: &DeployTarget) -> Result<Option<PathBuf>> {
    let Some(db_path) = target.db_path() else {
        return Ok(None);
    };
    let Some(backup_dir) = target.backup_dir() else {
        return Ok(None);
    };
    let mut snaps = list_snapshots(&backup_dir, &db_path)?;
    Ok(snaps.pop())
}

/// Check `PRAGMA integrity_check` on a database file.
pub fn check_integrity(db: &Path) -> Result<()> {
    let conn = Connection::open_with_flags(
        db,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
    )?;
    let verdict: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    if verdict != "ok" {
        return Err(DeployError::BackupIntegrity(verdict));
    }
    Ok(())
}

fn check_integrity_retrying(db: &Path) -> Result<()> {
    retry::with_retry(BUSY_RETRIES, BUSY_BASE_DELAY, is_busy, || {
        check_integrity(db)
    })
}

fn snapshot_retrying(src: &Path, dst: &Path) -> Result<()> {
    retry::with_retry(BUSY_RETRIES, BUSY_BASE_DELAY, is_busy, || {
        snapshot_once(src, dst)
    })
}

/// Copy `src` to `dst` with the online-backup primitive. Holds only a
/// shared read handle on the source, so the owning service keeps writing.
fn snapshot_once(src: &Path, dst: &Path) -> Result<()> {
    let src_conn =
        Connection::open_with_flags(src, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut dst_conn = Connection::open(dst)?;
    let backup = rusqlite::backup::Backup::new(&src_conn, &mut dst_conn)?;
    backup.run_to_completion(64, Duration::from_millis(50), None)?;
    Ok(())
}

fn is_busy(e: &DeployError) -> bool {
    match e {
        DeployError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
            err.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Naming and retention
// ---------------------------------------------------------------------------

fn snapshot_name(db: &Path, at: DateTime<Utc>) -> String {
    let stem = db
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "db".to_string());
    // Millisecond suffix keeps names unique and lexicographically sorted
    // by creation time.
    format!("{stem}-{}.db", at.format("%Y%m%d-%H%M%S.%3f"))
}

/// Snapshots for this database, oldest first.
fn list_snapshots(backup_dir: &Path, db: &Path) -> Result<Vec<PathBuf>> {
    let stem = db
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "db".to_string());
    let prefix = format!("{stem}-");
    let mut snaps = Vec::new();
    if !backup_dir.is_dir() {
        return Ok(snaps);
    }
    for entry in std::fs::read_dir(backup_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&prefix) && name.ends_with(".db") {
            snaps.push(entry.path());
        }
    }
    snaps.sort();
    Ok(snaps)
}

fn prune(backup_dir: &Path, db: &Path, retention: usize, exec: &mut Executor) -> Result<()> {
    let snaps = list_snapshots(backup_dir, db)?;
    if snaps.len() <= retention {
        return Ok(());
    }
    let excess = snaps.len() - retention;
    for old in &snaps[..excess] {
        tracing::info!("pruning old backup: {}", old.display());
        exec.remove_file(old)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
