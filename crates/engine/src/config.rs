//! Engine configuration.
//!
//! Configuration lives in a small YAML (or JSON) document. Resolution order is: an explicit
//! path, then the `IDLE_CONFIG_PATH` environment variable, then `<config dir>/idle/engine.yaml`.
//! A missing file yields [`EngineConfig::default`].

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use dirs_next::config_dir;
use idle_util::expand_tilde;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "IDLE_CONFIG_PATH";
/// Provider alias used when a step does not name one.
pub const DEFAULT_PROVIDER_ALIAS: &str = "Identity";
const DEFAULT_MAX_VALUE_DEPTH: usize = 32;

/// Tunables for plan building, execution, and export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Provider alias assumed for steps without an explicit `provider`.
    pub default_provider: String,
    /// Extra key fragments redacted from plan exports.
    pub redact_keys: Vec<String>,
    /// Maximum nesting depth accepted in `with` and expected-state values.
    pub max_value_depth: usize,
    /// Whether cached auth sessions are disposed when an execution ends.
    pub dispose_sessions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_provider: DEFAULT_PROVIDER_ALIAS.to_string(),
            redact_keys: Vec::new(),
            max_value_depth: DEFAULT_MAX_VALUE_DEPTH,
            dispose_sessions: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.default_provider.trim().is_empty() {
            return Err(EngineError::config("default_provider cannot be empty"));
        }
        if self.max_value_depth == 0 {
            return Err(EngineError::config("max_value_depth must be at least 1"));
        }
        if self.redact_keys.iter().any(|key| key.trim().is_empty()) {
            return Err(EngineError::config("redact_keys cannot contain empty entries"));
        }
        Ok(())
    }
}

/// Returns the configuration path honoring the environment override.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("idle").join("engine.yaml")
}

/// Loads configuration from the default location.
pub fn load_config() -> EngineResult<EngineConfig> {
    load_config_from_path(&default_config_path())
}

/// Loads and validates configuration from `path`; a missing file yields the defaults.
pub fn load_config_from_path(path: &Path) -> EngineResult<EngineConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "engine configuration not found; using defaults");
        return Ok(EngineConfig::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|error| EngineError::config(format!("failed to read {}: {error}", path.display())))?;
    let config: EngineConfig = serde_yaml::from_str(&content)
        .map_err(|error| EngineError::config(format!("failed to parse {}: {error}", path.display())))?;
    config.validate()?;
    debug!(path = %path.display(), default_provider = %config.default_provider, "engine configuration loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_path_honors_environment_override() {
        temp_env::with_var(CONFIG_PATH_ENV, Some("/opt/idle/custom.yaml"), || {
            assert_eq!(default_config_path(), PathBuf::from("/opt/idle/custom.yaml"));
        });
    }

    #[test]
    fn missing_file_yields_defaults() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let config = load_config_from_path(&temp_dir.path().join("absent.yaml")).expect("defaults");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.default_provider, "Identity");
        assert!(config.dispose_sessions);
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let path = temp_dir.path().join("engine.yaml");
        fs::write(&path, "default_provider: Directory\nredact_keys: [pin]\n").expect("write config");

        let config = load_config_from_path(&path).expect("config");
        assert_eq!(config.default_provider, "Directory");
        assert_eq!(config.redact_keys, vec!["pin".to_string()]);
        assert_eq!(config.max_value_depth, DEFAULT_MAX_VALUE_DEPTH);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let path = temp_dir.path().join("engine.yaml");
        fs::write(&path, "default_provider: \"\"\n").expect("write config");
        let error = load_config_from_path(&path).expect_err("empty provider");
        assert!(matches!(error, EngineError::Config { .. }));

        fs::write(&path, "unknown_setting: 1\n").expect("write config");
        assert!(load_config_from_path(&path).is_err());
    }
}
