use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

/// Per-target bookkeeping directory under the target root.
pub const DECKHAND_DIR: &str = ".deckhand";
pub const STATE_FILE: &str = ".deckhand/state.yaml";
pub const LOCK_FILE: &str = ".deckhand/deploy.lock";

/// Default fleet config location; overridable via --config / DECKHAND_CONFIG.
pub const DEFAULT_CONFIG: &str = "/etc/deckhand/targets.yaml";

/// Where unit definitions are installed for the service manager.
pub const SYSTEMD_UNIT_DIR: &str = "/etc/systemd/system";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn state_path(root: &Path) -> PathBuf {
    root.join(STATE_FILE)
}

pub fn lock_path(root: &Path) -> PathBuf {
    root.join(LOCK_FILE)
}
