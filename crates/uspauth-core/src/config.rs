//! Engine configuration management.
//!
//! This module handles loading and saving the engine configuration, which
//! holds the refresh policy, the clock skew tolerance and the credential
//! store location.
//!
//! Configuration is stored at `~/.config/uspauth/config.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::validator::{saturating_seconds, RefreshPolicy};

/// Application name used for config/data directory paths
const APP_NAME: &str = "uspauth";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Credential store subdirectory under the data directory
const CREDENTIALS_DIR: &str = "credentials";

/// Largest accepted refresh lookahead floor (7 days)
const MAX_LOOKAHEAD_FLOOR_SECS: i64 = 7 * 24 * 60 * 60;

/// Largest accepted clock skew tolerance (1 hour)
const MAX_CLOCK_SKEW_TOLERANCE_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub refresh: RefreshPolicy,
    /// How far the clock may step backward before reads fail.
    pub clock_skew_tolerance_secs: i64,
    pub store_dir: Option<PathBuf>,
}

impl AuthConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let ratio = self.refresh.lookahead_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            anyhow::bail!("refresh.lookahead_ratio must be within [0, 1], got {}", ratio);
        }
        let floor = self.refresh.lookahead_floor_secs;
        if !(0..=MAX_LOOKAHEAD_FLOOR_SECS).contains(&floor) {
            anyhow::bail!(
                "refresh.lookahead_floor_secs must be within [0, {}], got {}",
                MAX_LOOKAHEAD_FLOOR_SECS,
                floor
            );
        }
        let tolerance = self.clock_skew_tolerance_secs;
        if !(0..=MAX_CLOCK_SKEW_TOLERANCE_SECS).contains(&tolerance) {
            anyhow::bail!(
                "clock_skew_tolerance_secs must be within [0, {}], got {}",
                MAX_CLOCK_SKEW_TOLERANCE_SECS,
                tolerance
            );
        }
        Ok(())
    }

    pub fn clock_skew_tolerance(&self) -> Duration {
        saturating_seconds(self.clock_skew_tolerance_secs.max(0))
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for `FileCredentialStore`, defaulting to the platform data dir.
    pub fn store_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.store_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(CREDENTIALS_DIR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AuthConfig::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, AuthConfig::default());
        assert_eq!(config.clock_skew_tolerance(), Duration::zero());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = AuthConfig {
            refresh: RefreshPolicy::fixed_window(Duration::seconds(30)),
            clock_skew_tolerance_secs: 2,
            store_dir: Some(dir.path().join("creds")),
        };
        config.save_to(&path).unwrap();
        assert_eq!(AuthConfig::load_from(&path).unwrap(), config);
        assert_eq!(config.store_dir().unwrap(), dir.path().join("creds"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"clock_skew_tolerance_secs": 5}"#).unwrap();
        let config = AuthConfig::load_from(&path).unwrap();
        assert_eq!(config.clock_skew_tolerance_secs, 5);
        assert_eq!(config.refresh, RefreshPolicy::default());
    }

    #[test]
    fn test_invalid_ratio_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"refresh": {"lookahead_ratio": 1.5}}"#).unwrap();
        let err = AuthConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("lookahead_ratio"));
    }

    #[test]
    fn test_oversized_floor_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"refresh": {"lookahead_floor_secs": 9223372036854775807}}"#,
        )
        .unwrap();
        let err = AuthConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("lookahead_floor_secs"));
    }

    #[test]
    fn test_oversized_clock_tolerance_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"clock_skew_tolerance_secs": 9223372036854775807}"#).unwrap();
        let err = AuthConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("clock_skew_tolerance_secs"));
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let config = AuthConfig {
            refresh: RefreshPolicy {
                lookahead_ratio: 1.0,
                lookahead_floor_secs: MAX_LOOKAHEAD_FLOOR_SECS,
            },
            clock_skew_tolerance_secs: MAX_CLOCK_SKEW_TOLERANCE_SECS,
            store_dir: None,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unvalidated_tolerance_saturates() {
        let config = AuthConfig {
            clock_skew_tolerance_secs: i64::MAX,
            ..AuthConfig::default()
        };
        assert_eq!(config.clock_skew_tolerance(), Duration::MAX);
    }

    #[test]
    fn test_unparseable_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        let err = AuthConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
