// src/commands.rs

//! Command surface for the orchestration engine
//!
//! Every named operation is gated by the shared-secret admin token and
//! returns a structured [`CommandResult`] that callers serialize as JSON.
//! Failures carry a machine-checkable error kind plus the backup path
//! relevant to manual recovery where one exists. Automation callers exit
//! non-zero whenever `status` is not `success`.

use crate::backup::BackupKind;
use crate::config::Config;
use crate::deploy::{DeployOptions, DeploymentOrchestrator};
use crate::error::{Error, Result};
use crate::health::{CheckResult, HealthChecker, HealthStatus};
use crate::recovery::RecoveryEngine;
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use tracing::info;

/// Structured result returned by every command
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<Vec<CheckResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl CommandResult {
    fn success(message: String, started: Instant) -> Self {
        Self {
            status: "success".into(),
            message,
            error: None,
            steps: None,
            checks: None,
            data: None,
            backup_path: None,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    fn failure(error: &Error, started: Instant) -> Self {
        Self {
            status: "failure".into(),
            message: error.to_string(),
            error: Some(error.kind().to_string()),
            steps: None,
            checks: None,
            data: None,
            backup_path: None,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == "success"
    }
}

/// Constant-time shared-secret comparison; mismatch yields Unauthorized
/// before any side effects.
pub fn authorize(config: &Config, token: &str) -> Result<()> {
    let expected = config.admin_token.as_bytes();
    let given = token.as_bytes();
    let mut diff = expected.len() ^ given.len();
    for (a, b) in expected
        .iter()
        .zip(given.iter().chain(std::iter::repeat(&0u8)))
    {
        diff |= (a ^ b) as usize;
    }
    if diff == 0 {
        Ok(())
    } else {
        Err(Error::Unauthorized)
    }
}

/// Attach the most recent backup path to a result, for manual recovery
fn with_latest_backup_path(mut result: CommandResult, engine: &RecoveryEngine) -> CommandResult {
    if let Ok(Some(point)) = engine.backups().latest() {
        result.backup_path = Some(point.path.display().to_string());
    }
    result
}

fn run_gated<F>(config: &Config, token: &str, body: F) -> CommandResult
where
    F: FnOnce(Instant) -> Result<CommandResult>,
{
    let started = Instant::now();
    if let Err(e) = authorize(config, token) {
        return CommandResult::failure(&e, started);
    }
    match body(started) {
        Ok(result) => result,
        Err(e) => CommandResult::failure(&e, started),
    }
}

/// `create-backup`
pub fn create_backup(
    config: &Config,
    token: &str,
    kind: BackupKind,
    description: &str,
) -> CommandResult {
    run_gated(config, token, |started| {
        config.ensure_layout()?;
        let engine = RecoveryEngine::new(config.clone())?;
        let store = Store::open(&config.db_path)?;
        let point = engine.backups().create(store.conn(), kind, description)?;

        let mut result =
            CommandResult::success(format!("backup {} created", point.manifest.id), started);
        result.backup_path = Some(point.path.display().to_string());
        result.data = Some(serde_json::to_value(&point.manifest)?);
        Ok(result)
    })
}

/// `restore`
pub fn restore(config: &Config, token: &str, backup_id: &str) -> CommandResult {
    run_gated(config, token, |started| {
        config.ensure_layout()?;
        let engine = RecoveryEngine::new(config.clone())?;
        let mut store = Store::open(&config.db_path)?;

        match engine.restore(store.conn_mut(), backup_id) {
            Ok((action, counts)) => {
                let mut result = CommandResult::success(
                    format!(
                        "restored {} ({} units, {} accounts, {} migrations)",
                        backup_id, counts.units, counts.accounts, counts.migrations
                    ),
                    started,
                );
                result.data = Some(serde_json::to_value(&action)?);
                Ok(result)
            }
            Err(e) => Ok(with_latest_backup_path(
                CommandResult::failure(&e, started),
                &engine,
            )),
        }
    })
}

/// `rollback`
pub fn rollback(config: &Config, token: &str) -> CommandResult {
    run_gated(config, token, |started| {
        config.ensure_layout()?;
        let engine = RecoveryEngine::new(config.clone())?;
        let mut store = Store::open(&config.db_path)?;

        match engine.rollback(store.conn_mut()) {
            Ok((action, counts)) => {
                let mut result = CommandResult::success(
                    format!(
                        "rolled back to {} ({} units, {} accounts)",
                        action.target, counts.units, counts.accounts
                    ),
                    started,
                );
                result.data = Some(serde_json::to_value(&action)?);
                Ok(with_latest_backup_path(result, &engine))
            }
            Err(e) => Ok(with_latest_backup_path(
                CommandResult::failure(&e, started),
                &engine,
            )),
        }
    })
}

/// `auto-recover`
pub fn auto_recover(config: &Config, token: &str) -> CommandResult {
    run_gated(config, token, |started| {
        config.ensure_layout()?;
        let engine = RecoveryEngine::new(config.clone())?;
        let mut store = Store::open(&config.db_path)?;

        let report = engine.auto_recover(store.conn_mut())?;
        let message = if report.healthy && report.issues.is_empty() {
            "no issues detected".to_string()
        } else {
            format!(
                "{} issue(s) detected, {} fix(es) attempted{}",
                report.issues.len(),
                report.fixes.len(),
                if report.rolled_back {
                    ", rolled back"
                } else {
                    ""
                }
            )
        };

        let mut result = if report.healthy {
            CommandResult::success(message, started)
        } else {
            CommandResult::failure(
                &Error::FatalPipeline {
                    step: "auto-recover".into(),
                    reason: message,
                },
                started,
            )
        };
        result.data = Some(serde_json::to_value(&report)?);
        Ok(with_latest_backup_path(result, &engine))
    })
}

/// `full-auto-deploy`
pub fn full_auto_deploy(config: &Config, token: &str, options: &DeployOptions) -> CommandResult {
    run_gated(config, token, |started| {
        config.ensure_layout()?;
        let orchestrator = DeploymentOrchestrator::new(config.clone())?;
        let mut store = Store::open(&config.db_path)?;

        let run = orchestrator.run(&mut store, options)?;
        let mut result = if run.succeeded() {
            CommandResult::success(format!("deployment run {} succeeded", run.id), started)
        } else {
            CommandResult::failure(
                &Error::FatalPipeline {
                    step: run.failed_step.clone().unwrap_or_else(|| "pipeline".into()),
                    reason: run
                        .error
                        .clone()
                        .unwrap_or_else(|| "deployment failed".into()),
                },
                started,
            )
        };
        result.steps = Some(serde_json::to_value(&run.steps)?);
        result.data = Some(serde_json::to_value(&run)?);
        Ok(with_latest_backup_path(result, orchestrator.recovery()))
    })
}

/// `health-check`
pub fn health_check(config: &Config, token: &str) -> CommandResult {
    run_gated(config, token, |started| {
        let checker = HealthChecker::new(config.clone());
        let report = checker.run_all();
        if let Err(e) = checker.persist(&report) {
            info!("Health report not persisted: {}", e);
        }

        let mut result = match report.status {
            HealthStatus::Critical => CommandResult::failure(
                &Error::FatalPipeline {
                    step: "health-check".into(),
                    reason: format!("critical (score {})", report.score),
                },
                started,
            ),
            _ => CommandResult::success(
                format!("{} (score {})", report.status.as_str(), report.score),
                started,
            ),
        };
        result.checks = Some(report.checks.clone());
        result.data = Some(serde_json::to_value(&report)?);
        Ok(result)
    })
}

/// `emergency-rollback`: rollback without the usual confirmation, followed
/// by a post-restore health check; both outcomes are reported.
pub fn emergency_rollback(config: &Config, token: &str) -> CommandResult {
    run_gated(config, token, |started| {
        config.ensure_layout()?;
        let engine = RecoveryEngine::new(config.clone())?;
        let mut store = Store::open(&config.db_path)?;

        let rollback = engine.rollback(store.conn_mut());
        let checker = HealthChecker::new(config.clone());
        let report = checker.run_all();

        let mut result = match rollback {
            Ok((action, counts)) => {
                let mut result = CommandResult::success(
                    format!(
                        "emergency rollback to {} complete ({} units, {} accounts); post-restore health {} (score {})",
                        action.target,
                        counts.units,
                        counts.accounts,
                        report.status.as_str(),
                        report.score
                    ),
                    started,
                );
                result.data = Some(serde_json::to_value(&action)?);
                result
            }
            Err(e) => CommandResult::failure(&e, started),
        };
        result.checks = Some(report.checks.clone());
        Ok(with_latest_backup_path(result, &engine))
    })
}

/// `system-status`: latest backup, current health, and last deployment run
pub fn system_status(config: &Config, token: &str) -> CommandResult {
    run_gated(config, token, |started| {
        config.ensure_layout()?;
        let orchestrator = DeploymentOrchestrator::new(config.clone())?;
        let checker = HealthChecker::new(config.clone());

        let latest_backup = orchestrator
            .recovery()
            .backups()
            .latest()?
            .map(|p| serde_json::to_value(&p.manifest))
            .transpose()?;
        let report = checker.run_all();
        let last_run = orchestrator.last_run()?.map(|r| {
            serde_json::json!({
                "id": r.id,
                "outcome": r.outcome,
                "failedStep": r.failed_step,
                "startedAt": r.started_at,
                "durationMs": r.duration_ms,
            })
        });

        let mut result = CommandResult::success(
            format!(
                "health {} (score {}), {} backup(s) available",
                report.status.as_str(),
                report.score,
                orchestrator.recovery().backups().list()?.len()
            ),
            started,
        );
        result.checks = Some(report.checks.clone());
        result.data = Some(serde_json::json!({
            "latestBackup": latest_backup,
            "health": report,
            "lastRun": last_run,
        }));
        Ok(with_latest_backup_path(result, orchestrator.recovery()))
    })
}
