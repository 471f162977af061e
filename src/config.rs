// src/config.rs

//! Engine configuration
//!
//! All components receive an explicit [`Config`] value at construction; there
//! is no ambient global state. Configuration is loaded from a TOML file and
//! validated up front so a missing required key fails the command before any
//! side effects.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Default per-call timeout for network-bound operations (trigger, probes)
pub const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 10;

/// Engine configuration, deserialized from a TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// State directory: backups, audit records, health reports live here
    pub state_dir: PathBuf,

    /// Path to the primary SQLite data store
    pub db_path: PathBuf,

    /// Shared-secret token gating the command surface
    pub admin_token: String,

    /// External deploy trigger endpoint
    pub trigger_url: String,

    /// HTTP reachability probe targets for health checks
    #[serde(default)]
    pub probe_urls: Vec<String>,

    /// Optional changed-path listing consumed by change analysis
    #[serde(default)]
    pub change_listing: Option<PathBuf>,

    /// Timeout applied to each network call, in seconds
    #[serde(default = "default_network_timeout")]
    pub network_timeout_secs: u64,
}

fn default_network_timeout() -> u64 {
    DEFAULT_NETWORK_TIMEOUT_SECS
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read config {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate required keys; called by `load` and before every pipeline run
    pub fn validate(&self) -> Result<()> {
        if self.admin_token.trim().is_empty() {
            return Err(Error::Configuration("admin_token is required".into()));
        }
        if self.trigger_url.trim().is_empty() {
            return Err(Error::Configuration("trigger_url is required".into()));
        }
        if self.state_dir.as_os_str().is_empty() {
            return Err(Error::Configuration("state_dir is required".into()));
        }
        if self.db_path.as_os_str().is_empty() {
            return Err(Error::Configuration("db_path is required".into()));
        }
        Ok(())
    }

    /// Backup storage area
    pub fn backups_dir(&self) -> PathBuf {
        self.state_dir.join("backups")
    }

    /// Recovery action audit records
    pub fn recovery_dir(&self) -> PathBuf {
        self.state_dir.join("recovery")
    }

    /// Deployment run artifacts
    pub fn deployments_dir(&self) -> PathBuf {
        self.state_dir.join("deployments")
    }

    /// Persisted health report artifacts
    pub fn health_dir(&self) -> PathBuf {
        self.state_dir.join("health")
    }

    /// Ensure the state directory layout exists
    pub fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(self.backups_dir())?;
        fs::create_dir_all(self.recovery_dir())?;
        fs::create_dir_all(self.deployments_dir())?;
        fs::create_dir_all(self.health_dir())?;
        Ok(())
    }

    /// Sorted key/value snapshot of the configuration, captured into backup
    /// payloads. The admin token is deliberately excluded.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        let mut snapshot = BTreeMap::new();
        snapshot.insert("state_dir".into(), self.state_dir.display().to_string());
        snapshot.insert("db_path".into(), self.db_path.display().to_string());
        snapshot.insert("trigger_url".into(), self.trigger_url.clone());
        snapshot.insert("probe_urls".into(), self.probe_urls.join(","));
        snapshot.insert(
            "network_timeout_secs".into(),
            self.network_timeout_secs.to_string(),
        );
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            state_dir: PathBuf::from("/var/lib/custodian"),
            db_path: PathBuf::from("/var/lib/custodian/custodian.db"),
            admin_token: "secret".into(),
            trigger_url: "https://deploy.example.com/hook".into(),
            probe_urls: vec!["https://app.example.com/health".into()],
            change_listing: None,
            network_timeout_secs: 10,
        }
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_token() {
        let mut config = sample();
        config.admin_token = "  ".into();
        assert!(matches!(
            config.validate(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_missing_trigger() {
        let mut config = sample();
        config.trigger_url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_snapshot_excludes_token() {
        let snapshot = sample().snapshot();
        assert!(!snapshot.values().any(|v| v.contains("secret")));
        assert_eq!(
            snapshot.get("trigger_url").map(String::as_str),
            Some("https://deploy.example.com/hook")
        );
    }

    #[test]
    fn test_snapshot_is_deterministic() {
        let a = serde_json::to_string(&sample().snapshot()).unwrap();
        let b = serde_json::to_string(&sample().snapshot()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("custodian.toml");
        fs::write(
            &path,
            r#"
state_dir = "/tmp/custodian-state"
db_path = "/tmp/custodian-state/custodian.db"
admin_token = "tok"
trigger_url = "https://deploy.example.com/hook"
probe_urls = ["https://app.example.com/health"]
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.network_timeout_secs, DEFAULT_NETWORK_TIMEOUT_SECS);
        assert_eq!(config.probe_urls.len(), 1);
    }
}
