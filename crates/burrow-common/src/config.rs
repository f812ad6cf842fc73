//! Runtime configuration model.
//!
//! All host paths used by the isolation managers derive from a
//! [`RuntimeConfig`] value that is threaded through their constructors, so
//! independent instances (for example in tests) never share state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{BurrowError, Result};
use crate::types::{CgroupVersion, ResourceLimits};

/// Root configuration for the burrow runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Base directory holding the shared image and per-container layers.
    pub data_dir: PathBuf,
    /// Mount point of the control group filesystem.
    pub cgroup_root: PathBuf,
    /// Project name grouping this runtime's cgroups.
    pub project: String,
    /// Control group hierarchy flavour.
    pub cgroup_version: CgroupVersion,
    /// Default resource limits applied to every container.
    pub limits: ResourceLimits,
    /// Whether a failed `/proc` mount aborts container start.
    pub proc_required: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(constants::DEFAULT_DATA_DIR),
            cgroup_root: PathBuf::from(constants::CGROUP_ROOT),
            project: constants::PROJECT_NAME.to_string(),
            cgroup_version: CgroupVersion::Auto,
            limits: ResourceLimits::default(),
            proc_required: true,
        }
    }
}

impl RuntimeConfig {
    /// Loads a configuration from a JSON file; missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting configuration is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| BurrowError::io(path, e))?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Decodes a configuration serialized with [`RuntimeConfig::to_json`].
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the configuration is invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration for handing it to the init phase.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Checks invariants the managers rely on.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::Config`] if a path is relative or the project
    /// name is not a single path component.
    pub fn validate(&self) -> Result<()> {
        for (key, path) in [("data_dir", &self.data_dir), ("cgroup_root", &self.cgroup_root)] {
            if !path.is_absolute() {
                return Err(BurrowError::Config {
                    message: format!("{key} must be an absolute path: {}", path.display()),
                });
            }
        }
        if self.project.is_empty() || self.project.contains('/') || self.project.starts_with('.') {
            return Err(BurrowError::Config {
                message: format!("invalid cgroup project name: {:?}", self.project),
            });
        }
        Ok(())
    }

    /// Returns the shared image directory.
    #[must_use]
    pub fn image_dir(&self) -> PathBuf {
        self.data_dir.join(constants::IMAGE_DIR)
    }

    /// Returns the directory holding per-container layers.
    #[must_use]
    pub fn runtime_dir(&self) -> PathBuf {
        self.data_dir.join(constants::RUNTIME_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RuntimeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.image_dir(), PathBuf::from("/var/lib/burrow/image"));
        assert_eq!(config.runtime_dir(), PathBuf::from("/var/lib/burrow/runtime"));
    }

    #[test]
    fn load_fills_missing_keys_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burrow.json");
        std::fs::write(
            &path,
            r#"{ "data_dir": "/srv/burrow", "limits": { "cpu_quota_us": 20000, "memory": "64m" } }"#,
        )
        .unwrap();

        let config = RuntimeConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/burrow"));
        assert_eq!(config.limits.cpu_quota_us, 20_000);
        assert_eq!(config.limits.memory.as_str(), "64m");
        assert_eq!(config.cgroup_root, PathBuf::from("/sys/fs/cgroup"));
        assert!(config.proc_required);
    }

    #[test]
    fn load_rejects_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burrow.json");
        std::fs::write(&path, r#"{ "data_dir": "relative/dir" }"#).unwrap();
        assert!(matches!(
            RuntimeConfig::load(&path),
            Err(BurrowError::Config { .. })
        ));
    }

    #[test]
    fn load_rejects_bad_memory_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burrow.json");
        std::fs::write(&path, r#"{ "limits": { "cpu_quota_us": 1, "memory": "lots" } }"#).unwrap();
        assert!(matches!(
            RuntimeConfig::load(&path),
            Err(BurrowError::Serialization { .. })
        ));
    }

    #[test]
    fn json_handoff_preserves_every_field() {
        let config = RuntimeConfig {
            data_dir: PathBuf::from("/tmp/burrow-test"),
            cgroup_version: CgroupVersion::V2,
            proc_required: false,
            ..RuntimeConfig::default()
        };
        let decoded = RuntimeConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(decoded, config);
    }
}
