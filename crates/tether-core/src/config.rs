//! Runtime configuration.
//!
//! Load order: `./tether.yaml`, then `~/.tether/config.yaml`, then built-in
//! defaults. Environment variables override file values afterwards.

use crate::pool::{HealthConfig, PoolConfig, DEFAULT_MAX_CONTEXTS};
use crate::redact::RedactionPolicy;
use crate::resilience::DismissRules;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub max_failures: u32,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            probe_timeout_ms: 5_000,
            max_failures: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DismissSettings {
    pub interval_ms: u64,
    pub extra_patterns: Vec<String>,
}

impl Default for DismissSettings {
    fn default() -> Self {
        Self {
            interval_ms: 3_000,
            extra_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RedactionSettings {
    pub sensitive_keys: Vec<String>,
    pub redact_typed_text: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_contexts: usize,
    pub profiles_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub artifacts_max_sessions: usize,
    pub store_path: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub health: HealthSettings,
    pub dismiss: DismissSettings,
    pub redaction: RedactionSettings,
    /// Fallback approval decision when no provider is injected.
    pub auto_approve: Option<bool>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_contexts: DEFAULT_MAX_CONTEXTS,
            profiles_dir: PathBuf::from("./profiles"),
            artifacts_dir: PathBuf::from("./artifacts"),
            artifacts_max_sessions: crate::artifacts::DEFAULT_MAX_SESSIONS,
            store_path: None,
            log_dir: None,
            health: HealthSettings::default(),
            dismiss: DismissSettings::default(),
            redaction: RedactionSettings::default(),
            auto_approve: None,
        }
    }
}

impl RuntimeConfig {
    /// Load from the default locations, then apply environment overrides.
    pub async fn load_default() -> Result<Self, ConfigError> {
        let mut config = Self::load_files().await?;
        config.apply_env();
        Ok(config)
    }

    async fn load_files() -> Result<Self, ConfigError> {
        let local = PathBuf::from("./tether.yaml");
        if local.exists() {
            return Self::load_from(&local).await;
        }
        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".tether").join("config.yaml");
            if home_config.exists() {
                return Self::load_from(&home_config).await;
            }
        }
        Ok(Self::default())
    }

    pub async fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: RuntimeConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Environment overrides: `BROWSER_PROFILES_DIR`, `BROWSER_ARTIFACTS_DIR`,
    /// `BROWSER_STORE_PATH`, `BROWSER_LOG_DIR`, `BROWSER_AUTO_APPROVE`.
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("BROWSER_PROFILES_DIR") {
            self.profiles_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("BROWSER_ARTIFACTS_DIR") {
            self.artifacts_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("BROWSER_STORE_PATH") {
            self.store_path = Some(PathBuf::from(path));
        }
        if let Ok(dir) = std::env::var("BROWSER_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(dir));
        }
        if let Ok(value) = std::env::var("BROWSER_AUTO_APPROVE") {
            self.auto_approve = Some(value == "1");
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_contexts: self.max_contexts,
            profiles_dir: self.profiles_dir.clone(),
            health: HealthConfig {
                interval: Duration::from_millis(self.health.interval_ms),
                probe_timeout: Duration::from_millis(self.health.probe_timeout_ms),
                max_failures: self.health.max_failures,
            },
        }
    }

    pub fn dismiss_rules(&self) -> DismissRules {
        DismissRules::new(
            self.dismiss.extra_patterns.clone(),
            Duration::from_millis(self.dismiss.interval_ms),
            Default::default(),
        )
    }

    pub fn redaction_policy(&self) -> RedactionPolicy {
        RedactionPolicy::new(
            &self.redaction.sensitive_keys,
            self.redaction.redact_typed_text,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[tokio::test]
    #[serial]
    async fn env_overrides_win_over_defaults() {
        std::env::set_var("BROWSER_PROFILES_DIR", "/tmp/tether-profiles");
        std::env::set_var("BROWSER_AUTO_APPROVE", "1");
        let mut config = RuntimeConfig::default();
        config.apply_env();
        assert_eq!(config.profiles_dir, PathBuf::from("/tmp/tether-profiles"));
        assert_eq!(config.auto_approve, Some(true));
        std::env::remove_var("BROWSER_PROFILES_DIR");
        std::env::remove_var("BROWSER_AUTO_APPROVE");
    }

    #[tokio::test]
    async fn yaml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.yaml");
        let yaml = "max_contexts: 2\nhealth:\n  interval_ms: 50\n  max_failures: 2\n";
        tokio::fs::write(&path, yaml).await.unwrap();

        let config = RuntimeConfig::load_from(&path).await.unwrap();
        assert_eq!(config.max_contexts, 2);
        assert_eq!(config.health.interval_ms, 50);
        assert_eq!(config.health.max_failures, 2);
        // Unset sections fall back to defaults.
        assert_eq!(config.dismiss.interval_ms, 3_000);
    }
}
