//! Manager configuration (TOML)

use crate::priority::ParticlePriority;
use flare_core::{FlareError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings for a [`ParticleSystemManager`](crate::ParticleSystemManager).
/// Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Template definitions loaded by `init`
    pub template_path: PathBuf,
    /// Global particle budget enforced at the end of every update
    pub max_particles: usize,
    /// Budget eviction never touches particles at or above this priority
    pub eviction_ceiling: ParticlePriority,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            template_path: PathBuf::from("particle_systems.toml"),
            max_particles: 2500,
            eviction_ceiling: ParticlePriority::Critical,
        }
    }
}

impl ManagerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from a TOML file. A relative `template_path` is resolved against
    /// the config file's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FlareError::ConfigError(format!("failed to read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        if config.template_path.is_relative() {
            if let Some(dir) = path.parent() {
                config.template_path = dir.join(&config.template_path);
            }
        }
        Ok(config)
    }
}
