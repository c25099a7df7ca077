use crate::error::Result;
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// OverrideEntry
// ---------------------------------------------------------------------------

/// A tracked file whose on-server content intentionally diverges from the
/// committed content. The baseline is the upstream blob hash recorded when
/// the operator marked the override; sync compares against it to decide
/// between reapplying the local content and surfacing a conflict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverrideEntry {
    pub path: String,
    pub baseline: String,
    pub marked_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// DeployState
// ---------------------------------------------------------------------------

/// Per-target bookkeeping persisted under `<root>/.deckhand/state.yaml`.
/// Never holds secrets; safe to leave world-readable.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeployState {
    #[serde(default = "default_version")]
    pub version: u32,
    /// HEAD recorded immediately before the last sync applied, i.e. the
    /// revision rollback resets to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_good_rev: Option<String>,
    /// Fingerprint of the dependency manifest at the last successful install.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_fingerprint: Option<String>,
    #[serde(default)]
    pub overrides: Vec<OverrideEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

fn default_version() -> u32 {
    1
}

impl DeployState {
    /// Load state for a target root, defaulting to empty when absent
    /// (first deploy).
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::state_path(root);
        if !path.exists() {
            return Ok(Self {
                version: 1,
                ..Self::default()
            });
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let mut state = self.clone();
        state.last_updated = Some(Utc::now());
        let data = serde_yaml::to_string(&state)?;
        crate::io::atomic_write(&paths::state_path(root), data.as_bytes())
    }

    pub fn override_for(&self, path: &str) -> Option<&OverrideEntry> {
        self.overrides.iter().find(|o| o.path == path)
    }

    /// Mark a file as locally overridden, recording the upstream baseline.
    /// Re-marking an existing override replaces its baseline.
    pub fn mark_override(&mut self, path: &str, baseline: &str) {
        self.overrides.retain(|o| o.path != path);
        self.overrides.push(OverrideEntry {
            path: path.to_string(),
            baseline: baseline.to_string(),
            marked_at: Utc::now(),
        });
    }

    /// Returns true if an override existed and was removed.
    pub fn clear_override(&mut self, path: &str) -> bool {
        let before = self.overrides.len();
        self.overrides.retain(|o| o.path != path);
        self.overrides.len() != before
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
