use crate::error::{DeployError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Sub-descriptors
// ---------------------------------------------------------------------------

/// Authoritative upstream source for a target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Upstream {
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

impl Default for Upstream {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            branch: default_branch(),
        }
    }
}

/// SQLite database managed by a target, with backup policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Live database path, relative to the target root.
    pub path: PathBuf,
    /// Snapshot directory, relative to the target root.
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
    /// Snapshots kept before the oldest are pruned.
    #[serde(default = "default_retention")]
    pub retention: usize,
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("backups")
}

fn default_retention() -> usize {
    10
}

/// Language-runtime dependency manifest (pip-style).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestConfig {
    /// Manifest path relative to the target root (e.g. requirements.txt).
    pub path: PathBuf,
    /// Virtualenv directory relative to the target root.
    #[serde(default = "default_venv")]
    pub venv: PathBuf,
}

fn default_venv() -> PathBuf {
    PathBuf::from("venv")
}

/// Local HTTP health endpoint for network-facing targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub url: String,
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,
}

fn default_health_timeout() -> u64 {
    10
}

// ---------------------------------------------------------------------------
// DeployTarget
// ---------------------------------------------------------------------------

/// One managed project instance. Constructed from the fleet config at
/// startup; immutable for the duration of a deploy run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployTarget {
    /// Set from the config map key, not serialized in the descriptor body.
    #[serde(skip)]
    pub name: String,

    /// Project root directory on the server.
    pub root: PathBuf,

    /// Service identity that owns the root and runs the units.
    pub service_user: String,

    /// Long-running/managed service units (e.g. "fedimon.service").
    #[serde(default)]
    pub services: Vec<String>,

    /// Timer units (e.g. "fedimon-digest.timer").
    #[serde(default)]
    pub timers: Vec<String>,

    /// Directory of committed unit definitions, relative to the root.
    #[serde(default = "default_unit_dir")]
    pub unit_dir: PathBuf,

    #[serde(default)]
    pub upstream: Upstream,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,

    /// Secrets file checked (existence + restrictive mode) by preflight,
    /// contents opaque to the orchestrator. Relative to the root.
    #[serde(default = "default_secrets_file")]
    pub secrets_file: PathBuf,

    /// Data directories receiving group read/execute, relative to the root.
    #[serde(default)]
    pub data_dirs: Vec<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ManifestConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthConfig>,

    /// TCP ports opened by --setup-firewall.
    #[serde(default)]
    pub firewall_ports: Vec<u16>,
}

fn default_unit_dir() -> PathBuf {
    PathBuf::from("deploy/systemd")
}

fn default_secrets_file() -> PathBuf {
    PathBuf::from(".env")
}

impl DeployTarget {
    pub fn db_path(&self) -> Option<PathBuf> {
        self.database.as_ref().map(|d| self.root.join(&d.path))
    }

    pub fn backup_dir(&self) -> Option<PathBuf> {
        self.database
            .as_ref()
            .map(|d| self.root.join(&d.backup_dir))
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.root.join(&self.secrets_file)
    }

    pub fn unit_source_dir(&self) -> PathBuf {
        self.root.join(&self.unit_dir)
    }

    /// All managed units, services first.
    pub fn all_units(&self) -> Vec<&str> {
        self.services
            .iter()
            .chain(self.timers.iter())
            .map(|s| s.as_str())
            .collect()
    }

    /// A service is triggered exclusively by a timer when a timer with the
    /// same stem is managed alongside it. Such services are not enabled at
    /// boot; their timer is.
    pub fn is_timer_triggered(&self, service: &str) -> bool {
        let stem = service.trim_end_matches(".service");
        self.timers
            .iter()
            .any(|t| t.trim_end_matches(".timer") == stem)
    }

    /// Units to enable for automatic start at boot.
    pub fn units_to_enable(&self) -> Vec<&str> {
        let mut units: Vec<&str> = self
            .services
            .iter()
            .filter(|s| !self.is_timer_triggered(s))
            .map(|s| s.as_str())
            .collect();
        units.extend(self.timers.iter().map(|s| s.as_str()));
        units
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        for unit in self.all_units() {
            validate_unit_name(unit)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();
static UNIT_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").unwrap())
}

fn unit_re() -> &'static Regex {
    UNIT_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9:_.@\-]+\.(service|timer)$").unwrap())
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 || !name_re().is_match(name) {
        return Err(DeployError::InvalidTargetName(name.to_string()));
    }
    Ok(())
}

pub fn validate_unit_name(unit: &str) -> Result<()> {
    if !unit_re().is_match(unit) {
        return Err(DeployError::InvalidUnitName(unit.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
