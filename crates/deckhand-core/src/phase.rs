use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// The fixed total order of deploy phases. Scoping flags select a subset of
/// this order; nothing ever reorders it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Preflight,
    Backup,
    Sync,
    Dependencies,
    Permissions,
    Services,
    Verify,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Preflight,
        Phase::Backup,
        Phase::Sync,
        Phase::Dependencies,
        Phase::Permissions,
        Phase::Services,
        Phase::Verify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Preflight => "preflight",
            Phase::Backup => "backup",
            Phase::Sync => "sync",
            Phase::Dependencies => "dependencies",
            Phase::Permissions => "permissions",
            Phase::Services => "services",
            Phase::Verify => "verify",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RunMode
// ---------------------------------------------------------------------------

/// Which subset of the phase graph a run traverses. Flags map here once at
/// the CLI boundary instead of scattering conditionals through the phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Full deploy sequence.
    Full,
    /// Full sequence; preflight runs live, every later phase only reports
    /// what it would have done.
    DryRun,
    /// Preflight only.
    Check,
    /// Verifier only.
    VerifyOnly,
    /// Service Controller restart step only.
    RestartOnly,
}

impl RunMode {
    /// The contiguous (or explicitly documented) subset of `Phase::ALL`
    /// this mode executes.
    pub fn phases(&self) -> &'static [Phase] {
        match self {
            RunMode::Full | RunMode::DryRun => &Phase::ALL,
            RunMode::Check => &[Phase::Preflight],
            RunMode::VerifyOnly => &[Phase::Verify],
            RunMode::RestartOnly => &[Phase::Services],
        }
    }

    /// Modes that mutate the target take the per-target run lock. Dry-run
    /// deliberately does not: the lock file itself would be a side effect.
    pub fn mutates(&self) -> bool {
        matches!(self, RunMode::Full | RunMode::RestartOnly)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Full => "deploy",
            RunMode::DryRun => "dry-run",
            RunMode::Check => "check",
            RunMode::VerifyOnly => "verify",
            RunMode::RestartOnly => "restart-only",
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
