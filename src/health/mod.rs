// src/health/mod.rs

//! Health check battery and aggregation
//!
//! A fixed set of independent checks: configuration presence, state
//! directory layout, data-store reachability with entity counts, and HTTP
//! reachability for the configured probe paths. A check that cannot
//! complete counts as a fail with an explanatory detail; checks never
//! panic or propagate errors out of the battery.
//!
//! Scoring: `score = round(100 * passed / total)`. One canonical threshold
//! table is used everywhere health is reported:
//! healthy >= 80, degraded 60..=79, critical < 60.

use crate::config::Config;
use crate::error::Result;
use crate::retry::execute_with_retry;
use crate::store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::{debug, info};

/// Overall status derived from the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

impl HealthStatus {
    /// The canonical threshold table
    pub fn from_score(score: u32) -> Self {
        if score >= 80 {
            Self::Healthy
        } else if score >= 60 {
            Self::Degraded
        } else {
            Self::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Critical => "critical",
        }
    }
}

/// Result of one check in the battery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(name: &str, detail: String) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            detail,
        }
    }

    fn fail(name: &str, detail: String) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            detail,
        }
    }
}

/// Immutable aggregate report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub checks: Vec<CheckResult>,
    pub score: u32,
    pub status: HealthStatus,
}

/// Aggregate raw check results into a report
pub fn aggregate(checks: Vec<CheckResult>) -> HealthReport {
    let total = checks.len();
    let passed = checks.iter().filter(|c| c.passed).count();
    let score = if total == 0 {
        0
    } else {
        ((100.0 * passed as f64) / total as f64).round() as u32
    };
    HealthReport {
        timestamp: Utc::now(),
        checks,
        score,
        status: HealthStatus::from_score(score),
    }
}

/// Runs the fixed check battery
pub struct HealthChecker {
    config: Config,
}

impl HealthChecker {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the full battery and aggregate
    pub fn run_all(&self) -> HealthReport {
        let mut checks = Vec::new();
        checks.push(self.check_config());
        checks.push(self.check_layout());
        checks.push(self.check_datastore());
        checks.extend(self.check_probes());

        let report = aggregate(checks);
        info!(
            "Health check: score {} ({}), {}/{} passed",
            report.score,
            report.status.as_str(),
            report.checks.iter().filter(|c| c.passed).count(),
            report.checks.len()
        );
        report
    }

    /// Only the reachability-style checks, used by final verification after
    /// the external deploy has been triggered.
    pub fn run_reachability(&self) -> HealthReport {
        let mut checks = vec![self.check_datastore()];
        checks.extend(self.check_probes());
        aggregate(checks)
    }

    /// Configuration presence
    fn check_config(&self) -> CheckResult {
        match self.config.validate() {
            Ok(()) => CheckResult::pass("config", "all required keys present".into()),
            Err(e) => CheckResult::fail("config", e.to_string()),
        }
    }

    /// State directory layout
    fn check_layout(&self) -> CheckResult {
        let required = [
            self.config.backups_dir(),
            self.config.recovery_dir(),
            self.config.deployments_dir(),
        ];
        let missing: Vec<String> = required
            .iter()
            .filter(|p| !p.is_dir())
            .map(|p| p.display().to_string())
            .collect();
        if missing.is_empty() {
            CheckResult::pass("layout", "state directory layout present".into())
        } else {
            CheckResult::fail("layout", format!("missing: {}", missing.join(", ")))
        }
    }

    /// Data-store reachability with basic entity counts. Read-only: a
    /// missing or uninitialized store is a failing check, never created
    /// here as a side effect.
    fn check_datastore(&self) -> CheckResult {
        if !self.config.db_path.is_file() {
            return CheckResult::fail(
                "datastore",
                format!("data store not found at {}", self.config.db_path.display()),
            );
        }
        let counts = store::schema::open(&self.config.db_path).and_then(|conn| {
            let units = store::count_units(&conn)?;
            let accounts = store::count_accounts(&conn)?;
            Ok((units, accounts))
        });
        match counts {
            Ok((units, accounts)) => CheckResult::pass(
                "datastore",
                format!("reachable ({} units, {} accounts)", units, accounts),
            ),
            Err(e) => CheckResult::fail("datastore", format!("unreachable: {}", e)),
        }
    }

    /// HTTP reachability, 2xx or bust, one check per configured probe
    fn check_probes(&self) -> Vec<CheckResult> {
        let client = match reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(self.config.network_timeout_secs))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                // No probes can run at all: each counts as a fail
                return self
                    .config
                    .probe_urls
                    .iter()
                    .map(|url| {
                        CheckResult::fail(
                            &format!("probe:{}", url),
                            format!("client init failed: {}", e),
                        )
                    })
                    .collect();
            }
        };

        self.config
            .probe_urls
            .iter()
            .map(|url| {
                let name = format!("probe:{}", url);
                debug!("Probing {}", url);
                let outcome = execute_with_retry(
                    || {
                        let response = client.get(url).send()?;
                        if response.status().is_success() {
                            Ok(response.status())
                        } else {
                            Err(crate::error::Error::FatalPipeline {
                                step: "probe".into(),
                                reason: format!("status {}", response.status()),
                            })
                        }
                    },
                    2,
                    Duration::from_millis(250),
                );
                match outcome {
                    Ok(status) => CheckResult::pass(&name, format!("status {}", status)),
                    Err(e) => CheckResult::fail(&name, e.to_string()),
                }
            })
            .collect()
    }

    /// Persist a report artifact keyed by timestamp
    pub fn persist(&self, report: &HealthReport) -> Result<()> {
        let dir = self.config.health_dir();
        fs::create_dir_all(&dir)?;
        let name = format!("health-{}.json", report.timestamp.format("%Y%m%dT%H%M%S%3fZ"));
        fs::write(dir.join(name), serde_json::to_vec_pretty(report)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use std::path::Path;
    use tempfile::TempDir;

    fn test_config(dir: &Path) -> Config {
        Config {
            state_dir: dir.to_path_buf(),
            db_path: dir.join("custodian.db"),
            admin_token: "tok".into(),
            trigger_url: "https://deploy.example.com/hook".into(),
            probe_urls: vec![],
            change_listing: None,
            network_timeout_secs: 1,
        }
    }

    fn check(passed: bool) -> CheckResult {
        CheckResult {
            name: "c".into(),
            passed,
            detail: String::new(),
        }
    }

    #[test]
    fn test_score_five_of_six_is_83_and_healthy() {
        let checks = vec![
            check(true),
            check(true),
            check(true),
            check(true),
            check(true),
            check(false),
        ];
        let report = aggregate(checks);
        assert_eq!(report.score, 83);
        assert_eq!(report.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_threshold_boundaries() {
        assert_eq!(HealthStatus::from_score(80), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(79), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_score(60), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_score(59), HealthStatus::Critical);
        assert_eq!(HealthStatus::from_score(0), HealthStatus::Critical);
        assert_eq!(HealthStatus::from_score(100), HealthStatus::Healthy);
    }

    #[test]
    fn test_empty_battery_is_critical() {
        let report = aggregate(Vec::new());
        assert_eq!(report.score, 0);
        assert_eq!(report.status, HealthStatus::Critical);
    }

    #[test]
    fn test_run_all_with_sane_sandbox() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        config.ensure_layout().unwrap();
        Store::open(&config.db_path).unwrap();

        let checker = HealthChecker::new(config);
        let report = checker.run_all();

        // config + layout + datastore, no probes configured
        assert_eq!(report.checks.len(), 3);
        assert!(report.checks.iter().all(|c| c.passed), "{:?}", report.checks);
        assert_eq!(report.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_missing_layout_fails_that_check_only() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        // ensure_layout deliberately not called

        let checker = HealthChecker::new(config);
        let report = checker.run_all();

        let layout = report.checks.iter().find(|c| c.name == "layout").unwrap();
        assert!(!layout.passed);
        let config_check = report.checks.iter().find(|c| c.name == "config").unwrap();
        assert!(config_check.passed);
    }

    #[test]
    fn test_datastore_check_never_creates_the_store() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        config.ensure_layout().unwrap();
        // No store has been opened at this db_path

        let checker = HealthChecker::new(config.clone());
        let report = checker.run_all();

        let datastore = report.checks.iter().find(|c| c.name == "datastore").unwrap();
        assert!(!datastore.passed);
        assert!(!config.db_path.exists());
    }

    #[test]
    fn test_persist_writes_artifact() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        config.ensure_layout().unwrap();

        let checker = HealthChecker::new(config.clone());
        let report = checker.run_all();
        checker.persist(&report).unwrap();

        let artifacts: Vec<_> = fs::read_dir(config.health_dir())
            .unwrap()
            .collect::<std::io::Result<Vec<_>>>()
            .unwrap();
        assert_eq!(artifacts.len(), 1);
    }
}
