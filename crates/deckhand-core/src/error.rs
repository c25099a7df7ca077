use std::path::PathBuf;
use thiserror::Error;

/// One failure class per deploy phase category, so calling automation can
/// branch on the exit code without parsing text.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("preflight failed:\n{}", .0.join("\n"))]
    Preflight(Vec<String>),

    #[error("deploy lock already held at {path} (pid {pid})")]
    LockHeld { path: PathBuf, pid: u32 },

    #[error("backup integrity failure: {0}")]
    BackupIntegrity(String),

    #[error("source sync failed: {0}")]
    SourceSync(String),

    #[error("override conflict: upstream changed '{path}' while a local override is active; resolve manually, then re-mark or clear the override")]
    OverrideConflict { path: String },

    #[error("dependency install failed: {0}")]
    DependencyInstall(String),

    #[error("permission enforcement failed: {0}")]
    Permission(String),

    #[error("service {step} failed: {message}")]
    Service { step: ServiceStep, message: String },

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("rollback failed during {state}: {message}; manual intervention required")]
    RollbackFailed { state: String, message: String },

    #[error("target not found: {0}")]
    TargetNotFound(String),

    #[error("no database configured for target '{0}'")]
    NoDatabase(String),

    #[error("config not found at {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid config:\n{}", .0.join("\n"))]
    InvalidConfig(Vec<String>),

    #[error("invalid target name '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidTargetName(String),

    #[error("invalid unit name '{0}'")]
    InvalidUnitName(String),

    #[error("command '{program}' exited with {code}: {stderr}")]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("command '{program}' timed out after {seconds}s")]
    CommandTimeout { program: String, seconds: u64 },

    #[error("required tool not found: {0}")]
    ToolNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Sub-steps of the Service Controller. Each has a distinct, documented
/// failure mode: a skipped copy means config changes have no effect, a
/// skipped reload means stale cached unit definitions, a skipped enable
/// means the unit is healthy until the next reboot and then silently absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStep {
    Copy,
    Reload,
    Restart,
    Enable,
    Stop,
}

impl std::fmt::Display for ServiceStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceStep::Copy => "unit copy",
            ServiceStep::Reload => "daemon-reload",
            ServiceStep::Restart => "restart",
            ServiceStep::Enable => "enable",
            ServiceStep::Stop => "stop",
        };
        write!(f, "{s}")
    }
}

impl DeployError {
    /// Process exit code for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployError::LockHeld { .. } => 2,
            DeployError::Preflight(_) => 3,
            DeployError::BackupIntegrity(_) => 4,
            DeployError::SourceSync(_) | DeployError::OverrideConflict { .. } => 5,
            DeployError::DependencyInstall(_) => 6,
            DeployError::Permission(_) => 7,
            DeployError::Service { .. } => 8,
            DeployError::Verification(_) => 9,
            DeployError::RollbackFailed { .. } => 10,
            _ => 1,
        }
    }

    /// Short remediation hint for the human-readable summary.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            DeployError::Preflight(_) => Some("fix the listed checks (disk space, tools, secrets permissions) and re-run"),
            DeployError::LockHeld { .. } => Some("another deploy is in progress; wait for it or remove a stale lock"),
            DeployError::BackupIntegrity(_) => Some("inspect the live database before deploying; do not use --skip-backup to work around this"),
            DeployError::SourceSync(_) => Some("inspect the work tree; run with --rollback to return to the last known-good state"),
            DeployError::OverrideConflict { .. } => Some("merge the upstream change into the override, then --mark-override again"),
            DeployError::DependencyInstall(_) => Some("previous dependency set is still in place; services were not restarted"),
            DeployError::Service { step: ServiceStep::Enable, .. } => Some("the unit restarted and is running now, but is not enabled and will not start after a reboot; re-run once the enable failure is resolved"),
            DeployError::Service { .. } => Some("check 'systemctl status' and journal logs for the failed unit"),
            DeployError::Verification(_) => Some("deploy completed but checks failed; decide whether to run --rollback"),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
