//! Engine configuration loading
//!
//! Data-directory locations and loader behavior come from a small TOML
//! bootstrap file with explicit overrides on top; per-component tuning
//! (VAD, DTW, scorer, levels) lives in the component `Config` structs and
//! is adjusted per session through the facade.

use crate::error::{EngineError, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Bootstrap configuration as it appears in the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Directory of master call recordings (`<name>.wav`).
    pub master_calls_dir: PathBuf,

    /// Directory of cached feature files (`<name>.mfc`).
    pub features_dir: PathBuf,

    /// Directory where saved recordings land.
    pub recordings_dir: PathBuf,

    /// Write feature caches after computing from source audio.
    #[serde(default = "default_cache_features")]
    pub cache_features: bool,
}

fn default_cache_features() -> bool {
    true
}

/// Resolved engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub master_calls_dir: PathBuf,
    pub features_dir: PathBuf,
    pub recordings_dir: PathBuf,
    pub cache_features: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            master_calls_dir: PathBuf::from("data/master_calls"),
            features_dir: PathBuf::from("data/features"),
            recordings_dir: PathBuf::from("data/recordings"),
            cache_features: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file with optional overrides.
    pub fn load(
        config_path: &PathBuf,
        master_calls_override: Option<PathBuf>,
        features_override: Option<PathBuf>,
        recordings_override: Option<PathBuf>,
    ) -> Result<Self> {
        let toml_str = std::fs::read_to_string(config_path)
            .map_err(|e| EngineError::InvalidParams(format!("failed to read config file: {e}")))?;

        let toml_config: TomlConfig = toml::from_str(&toml_str)
            .map_err(|e| EngineError::InvalidParams(format!("failed to parse TOML: {e}")))?;

        Ok(EngineConfig {
            master_calls_dir: master_calls_override.unwrap_or(toml_config.master_calls_dir),
            features_dir: features_override.unwrap_or(toml_config.features_dir),
            recordings_dir: recordings_override.unwrap_or(toml_config.recordings_dir),
            cache_features: toml_config.cache_features,
        })
    }

    /// Configuration rooted at a single data directory, using the default
    /// subdirectory layout.
    pub fn rooted_at(root: &std::path::Path) -> Self {
        Self {
            master_calls_dir: root.join("master_calls"),
            features_dir: root.join("features"),
            recordings_dir: root.join("recordings"),
            cache_features: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_toml_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bugle.toml");
        std::fs::write(
            &path,
            r#"
master_calls_dir = "/data/calls"
features_dir = "/data/mfc"
recordings_dir = "/data/rec"
"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path, None, None, None).unwrap();
        assert_eq!(config.master_calls_dir, PathBuf::from("/data/calls"));
        assert!(config.cache_features); // defaulted
    }

    #[test]
    fn overrides_win_over_file_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bugle.toml");
        std::fs::write(
            &path,
            r#"
master_calls_dir = "/data/calls"
features_dir = "/data/mfc"
recordings_dir = "/data/rec"
cache_features = false
"#,
        )
        .unwrap();

        let config = EngineConfig::load(
            &path,
            Some(PathBuf::from("/override/calls")),
            None,
            None,
        )
        .unwrap();
        assert_eq!(config.master_calls_dir, PathBuf::from("/override/calls"));
        assert_eq!(config.features_dir, PathBuf::from("/data/mfc"));
        assert!(!config.cache_features);
    }

    #[test]
    fn malformed_toml_is_invalid_params() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "not really toml [").unwrap();

        let err = EngineConfig::load(&path, None, None, None).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PARAMS");
    }

    #[test]
    fn rooted_layout() {
        let config = EngineConfig::rooted_at(std::path::Path::new("/tmp/bugle"));
        assert_eq!(config.master_calls_dir, PathBuf::from("/tmp/bugle/master_calls"));
        assert_eq!(config.features_dir, PathBuf::from("/tmp/bugle/features"));
    }
}
