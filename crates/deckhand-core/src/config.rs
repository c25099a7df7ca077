use crate::error::{DeployError, Result};
use crate::target::DeployTarget;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// PreflightConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightConfig {
    #[serde(default = "default_min_disk")]
    pub min_free_disk_mb: u64,
    #[serde(default = "default_min_mem")]
    pub min_free_mem_mb: u64,
    /// Production configs leave this true; tests and unprivileged CI set it
    /// false to exercise the pipeline without uid 0.
    #[serde(default = "default_require_root")]
    pub require_root: bool,
    #[serde(default = "default_required_tools")]
    pub required_tools: Vec<String>,
}

fn default_min_disk() -> u64 {
    1024
}

fn default_min_mem() -> u64 {
    256
}

fn default_require_root() -> bool {
    true
}

fn default_required_tools() -> Vec<String> {
    ["git", "systemctl", "sudo", "id"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            min_free_disk_mb: default_min_disk(),
            min_free_mem_mb: default_min_mem(),
            require_root: default_require_root(),
            required_tools: default_required_tools(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level fleet descriptor)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub preflight: PreflightConfig,
    /// Target name → descriptor. BTreeMap keeps listings deterministic.
    #[serde(default)]
    pub targets: BTreeMap<String, DeployTarget>,
}

fn default_version() -> u32 {
    1
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DeployError::ConfigNotFound(path.to_path_buf()));
        }
        let data = std::fs::read_to_string(path)?;
        let mut cfg: Config = serde_yaml::from_str(&data)?;
        // The map key is the authoritative name.
        for (name, target) in cfg.targets.iter_mut() {
            target.name = name.clone();
        }
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    pub fn target(&self, name: &str) -> Result<&DeployTarget> {
        self.targets
            .get(name)
            .ok_or_else(|| DeployError::TargetNotFound(name.to_string()))
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        for (name, target) in &self.targets {
            if let Err(e) = target.validate() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("target '{name}': {e}"),
                });
            }
            if target.services.is_empty() && target.timers.is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("target '{name}' manages no units"),
                });
            }
            if !target.root.is_absolute() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!(
                        "target '{name}': root must be absolute, got '{}'",
                        target.root.display()
                    ),
                });
            }
        }

        // Concurrent runs are only safe across targets that share nothing.
        let mut seen: BTreeMap<&Path, &str> = BTreeMap::new();
        for (name, target) in &self.targets {
            if let Some(other) = seen.insert(target.root.as_path(), name) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!(
                        "targets '{other}' and '{name}' share root '{}'",
                        target.root.display()
                    ),
                });
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
