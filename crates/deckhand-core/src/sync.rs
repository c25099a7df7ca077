//! Source sync: fetch from the authoritative upstream and apply it,
//! reconciling operator-marked override files.
//!
//! Overrides are files whose on-server content intentionally diverges from
//! the committed content. Before applying, the local override content is
//! preserved in memory; if the upstream version is unchanged from the
//! recorded baseline it is reapplied afterwards, and if upstream changed
//! the phase fails naming the file rather than guessing which version is
//! wanted. Line-ending normalization is the repository's job (declarative
//! `.gitattributes` applied at fetch time); a post-hoc conversion pass
//! would dirty the tree and block the next sync, so none exists here.

use crate::error::{DeployError, Result};
use crate::exec::Executor;
use crate::state::DeployState;
use crate::target::DeployTarget;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

const FETCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Fetch and apply the upstream branch. Returns a human-readable summary.
pub fn run(
    target: &DeployTarget,
    state: &mut DeployState,
    exec: &mut Executor,
) -> Result<String> {
    let root = &target.root;
    let remote = &target.upstream.remote;
    let branch = &target.upstream.branch;
    let upstream_ref = format!("{remote}/{branch}");

    exec.run_with_timeout(
        git(root).args(["fetch", remote, branch]),
        FETCH_TIMEOUT,
    )
    .map_err(as_sync)?;

    // Refuse to discard uncommitted local modifications. Marked overrides
    // are expected to be dirty; untracked files are untouched by reset.
    let dirty = dirty_paths(target, state, exec)?;
    if !dirty.is_empty() {
        return Err(DeployError::SourceSync(format!(
            "uncommitted local modifications present: {}; commit or stash them, or run with --rollback",
            dirty.join(", ")
        )));
    }

    // Preserve override content and detect conflicts before anything is
    // overwritten, so a conflict leaves the local override intact.
    let mut preserved: Vec<(String, Vec<u8>)> = Vec::new();
    for entry in &state.overrides {
        let local = root.join(&entry.path);
        let Ok(content) = std::fs::read(&local) else {
            tracing::warn!("override file missing locally, skipping: {}", entry.path);
            continue;
        };
        let upstream_blob = blob_hash(root, &upstream_ref, &entry.path, exec)?;
        match upstream_blob {
            Some(hash) if hash == entry.baseline => preserved.push((entry.path.clone(), content)),
            _ => {
                return Err(DeployError::OverrideConflict {
                    path: entry.path.clone(),
                });
            }
        }
    }

    // Record the pre-sync revision as the rollback point.
    let head = rev_parse(root, "HEAD", exec)?;
    state.last_good_rev = Some(head.clone());

    exec.run(git(root).args(["reset", "--hard", &upstream_ref]))
        .map_err(as_sync)?;

    for (path, content) in &preserved {
        exec.write_file(&root.join(path), content)?;
    }

    if !exec.record("update .deckhand/state.yaml".to_string()) {
        state.save(root)?;
    }

    if !root.join(".gitattributes").exists() {
        tracing::warn!(
            "{}: no .gitattributes, line-ending normalization is not pinned by the repository",
            target.name
        );
    }

    let new_rev = rev_parse(root, &upstream_ref, exec)?;
    Ok(format!(
        "synced to {} ({} override{} reapplied)",
        &new_rev[..new_rev.len().min(12)],
        preserved.len(),
        if preserved.len() == 1 { "" } else { "s" }
    ))
}

/// Mark a file as locally overridden, baselining it at the committed
/// version it diverges from.
pub fn mark_override(
    target: &DeployTarget,
    state: &mut DeployState,
    path: &str,
    exec: &mut Executor,
) -> Result<String> {
    let baseline = blob_hash(&target.root, "HEAD", path, exec)?.ok_or_else(|| {
        DeployError::SourceSync(format!(
            "cannot mark override: '{path}' is not tracked at HEAD"
        ))
    })?;
    state.mark_override(path, &baseline);
    if !exec.record("update .deckhand/state.yaml".to_string()) {
        state.save(&target.root)?;
    }
    Ok(format!("override marked: {path} (baseline {})", &baseline[..12]))
}

/// Clear an override mark. The file's current content is left as-is.
pub fn clear_override(
    target: &DeployTarget,
    state: &mut DeployState,
    path: &str,
    exec: &mut Executor,
) -> Result<String> {
    if !state.clear_override(path) {
        return Err(DeployError::SourceSync(format!(
            "no override marked for '{path}'"
        )));
    }
    if !exec.record("update .deckhand/state.yaml".to_string()) {
        state.save(&target.root)?;
    }
    Ok(format!("override cleared: {path}"))
}

// ---------------------------------------------------------------------------
// Git plumbing
// ---------------------------------------------------------------------------

pub(crate) fn git(root: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(root);
    cmd
}

pub(crate) fn rev_parse(root: &Path, rev: &str, exec: &Executor) -> Result<String> {
    let out = exec.query(git(root).args(["rev-parse", rev]))?;
    if !out.success() {
        return Err(DeployError::SourceSync(format!(
            "rev-parse {rev}: {}",
            out.stderr.trim()
        )));
    }
    Ok(out.stdout.trim().to_string())
}

/// Blob hash of `path` at `rev`, or `None` when the file doesn't exist there.
fn blob_hash(root: &Path, rev: &str, path: &str, exec: &Executor) -> Result<Option<String>> {
    let spec = format!("{rev}:{path}");
    let out = exec.query(git(root).args(["rev-parse", &spec]))?;
    if !out.success() {
        return Ok(None);
    }
    Ok(Some(out.stdout.trim().to_string()))
}

/// Tracked paths with uncommitted modifications, excluding marked overrides.
fn dirty_paths(
    target: &DeployTarget,
    state: &DeployState,
    exec: &Executor,
) -> Result<Vec<String>> {
    let out = exec.query(git(&target.root).args(["status", "--porcelain"]))?;
    if !out.success() {
        return Err(DeployError::SourceSync(format!(
            "git status: {}",
            out.stderr.trim()
        )));
    }
    let mut dirty = Vec::new();
    for line in out.stdout.lines() {
        if line.len() < 4 || line.starts_with("??") {
            continue;
        }
        let path = line[3..]
            .rsplit(" -> ")
            .next()
            .unwrap_or(&line[3..])
            .trim()
            .to_string();
        if state.override_for(&path).is_none() {
            dirty.push(path);
        }
    }
    Ok(dirty)
}

fn as_sync(e: DeployError) -> DeployError {
    match e {
        DeployError::CommandFailed { .. } | DeployError::CommandTimeout { .. } => {
            DeployError::SourceSync(e.to_string())
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Tests (require a git binary; skipped quietly when absent)
// ---------------------------------------------------------------------------
