// src/deploy/mod.rs

//! Deployment pipeline state machine
//!
//! Seven fixed steps, strictly ordered; a step may not begin while its
//! predecessor is non-terminal:
//!
//! ```text
//! env-sync -> backup -> change-analysis -> migrate -> health-check -> trigger -> verify
//! ```
//!
//! Fail-fast-and-recover semantics: the first failing step stops the run,
//! marks it failed with the triggering step and error, and attempts a
//! best-effort rollback to the latest backup. A rollback failure is
//! attached to the run's report but never replaces the original failure.
//!
//! A documentation-only change set completes the run early: the remaining
//! steps are marked skipped and the run succeeds with no further action.
//! Final verification failures are reported but never un-complete the run,
//! since the external deploy has already been triggered.

pub mod analysis;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::health::{HealthChecker, HealthStatus};
use crate::recovery::RecoveryEngine;
use crate::retry::execute_with_retry;
use crate::store::{migrations, Store};
use analysis::ChangeKind;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// The fixed pipeline steps, in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepName {
    EnvSync,
    Backup,
    ChangeAnalysis,
    Migrate,
    HealthCheck,
    Trigger,
    Verify,
}

impl StepName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnvSync => "env-sync",
            Self::Backup => "backup",
            Self::ChangeAnalysis => "change-analysis",
            Self::Migrate => "migrate",
            Self::HealthCheck => "health-check",
            Self::Trigger => "trigger",
            Self::Verify => "verify",
        }
    }
}

/// Declaration order of the pipeline
pub const STEP_ORDER: [StepName; 7] = [
    StepName::EnvSync,
    StepName::Backup,
    StepName::ChangeAnalysis,
    StepName::Migrate,
    StepName::HealthCheck,
    StepName::Trigger,
    StepName::Verify,
];

/// Per-step status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Record of one pipeline step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: StepName,
    pub status: StepStatus,
    pub detail: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Final outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Failure,
}

/// Best-effort rollback attempt attached to a failed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub attempted: bool,
    pub success: bool,
    pub detail: String,
}

/// One deployment run and its audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub steps: Vec<StepRecord>,
    pub change_kind: Option<ChangeKind>,
    pub backup_id: Option<String>,
    pub outcome: RunOutcome,
    pub failed_step: Option<String>,
    pub error: Option<String>,
    pub rollback: Option<RollbackOutcome>,
    pub duration_ms: u64,
}

impl DeploymentRun {
    fn new() -> Self {
        Self {
            id: format!("run-{}", Uuid::new_v4()),
            started_at: Utc::now(),
            steps: STEP_ORDER
                .iter()
                .map(|name| StepRecord {
                    name: *name,
                    status: StepStatus::Pending,
                    detail: None,
                    started_at: None,
                    finished_at: None,
                })
                .collect(),
            change_kind: None,
            backup_id: None,
            outcome: RunOutcome::Failure,
            failed_step: None,
            error: None,
            rollback: None,
            duration_ms: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == RunOutcome::Success
    }

    /// Mark a step running. A step may not begin while its predecessor is
    /// non-terminal; this is the ordering invariant, enforced structurally.
    fn begin(&mut self, idx: usize) -> Result<()> {
        if idx > 0 && !self.steps[idx - 1].status.is_terminal() {
            return Err(Error::FatalPipeline {
                step: self.steps[idx].name.as_str().into(),
                reason: format!(
                    "predecessor {} is not terminal",
                    self.steps[idx - 1].name.as_str()
                ),
            });
        }
        self.steps[idx].status = StepStatus::Running;
        self.steps[idx].started_at = Some(Utc::now());
        Ok(())
    }

    fn complete(&mut self, idx: usize, detail: String) {
        self.steps[idx].status = StepStatus::Completed;
        self.steps[idx].detail = Some(detail);
        self.steps[idx].finished_at = Some(Utc::now());
    }

    fn skip(&mut self, idx: usize, reason: &str) {
        self.steps[idx].status = StepStatus::Skipped;
        self.steps[idx].detail = Some(reason.to_string());
        self.steps[idx].finished_at = Some(Utc::now());
    }

    fn fail(&mut self, idx: usize, error: &Error) {
        self.steps[idx].status = StepStatus::Failed;
        self.steps[idx].detail = Some(error.to_string());
        self.steps[idx].finished_at = Some(Utc::now());
        self.failed_step = Some(self.steps[idx].name.as_str().to_string());
        self.error = Some(error.to_string());
    }

    /// Skip every step that has not yet reached a terminal status
    fn skip_remaining(&mut self, reason: &str) {
        for idx in 0..self.steps.len() {
            if !self.steps[idx].status.is_terminal() {
                self.skip(idx, reason);
            }
        }
    }
}

/// Flags controlling one pipeline run
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Proceed past docs-only classification and force migrations
    pub force: bool,
    /// Skip the backup step
    pub skip_backup: bool,
    /// Skip the health/stability gate
    pub skip_health: bool,
    /// Cancellation token, checked between steps
    pub cancel: Option<Arc<AtomicBool>>,
}

impl DeployOptions {
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }
}

/// What a step asks the pipeline to do next
enum StepOutcome {
    Completed(String),
    /// Step completed and the rest of the pipeline should be skipped
    CompletedSkipRemaining { detail: String, reason: String },
}

/// Runs the deployment pipeline against one target
pub struct DeploymentOrchestrator {
    config: Config,
    recovery: RecoveryEngine,
    health: HealthChecker,
    lock_path: PathBuf,
}

impl DeploymentOrchestrator {
    pub fn new(config: Config) -> Result<Self> {
        let lock_path = config.state_dir.join("deploy.lock");
        Ok(Self {
            recovery: RecoveryEngine::new(config.clone())?,
            health: HealthChecker::new(config.clone()),
            config,
            lock_path,
        })
    }

    pub fn recovery(&self) -> &RecoveryEngine {
        &self.recovery
    }

    /// Run the full pipeline. The orchestrator is not reentrant: a second
    /// run while one is in flight fails fast with `Busy`.
    ///
    /// Step failures do not surface as `Err`; they are recorded in the
    /// returned run, with the rollback attempt attached.
    pub fn run(&self, store: &mut Store, options: &DeployOptions) -> Result<DeploymentRun> {
        fs::create_dir_all(&self.config.state_dir)?;
        let lock_file = File::create(&self.lock_path)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| Error::Busy("a deployment pipeline is already running".into()))?;

        let run = self.run_locked(store, options);
        let _ = fs2::FileExt::unlock(&lock_file);
        run
    }

    fn run_locked(&self, store: &mut Store, options: &DeployOptions) -> Result<DeploymentRun> {
        let started = Instant::now();
        let mut run = DeploymentRun::new();
        info!("Starting deployment run {}", run.id);

        run.outcome = RunOutcome::Success;

        for idx in 0..STEP_ORDER.len() {
            if run.steps[idx].status.is_terminal() {
                continue;
            }

            // Cancellation is honored between steps only
            if options.is_cancelled() {
                warn!("Run {} cancelled before {}", run.id, STEP_ORDER[idx].as_str());
                run.skip_remaining("skipped: cancelled");
                run.outcome = RunOutcome::Failure;
                run.error = Some("cancelled".into());
                break;
            }

            if let Some(reason) = self.skip_reason(STEP_ORDER[idx], options) {
                run.skip(idx, &reason);
                continue;
            }

            run.begin(idx)?;
            let result = self.execute_step(STEP_ORDER[idx], store, options, &mut run);
            match result {
                Ok(StepOutcome::Completed(detail)) => run.complete(idx, detail),
                Ok(StepOutcome::CompletedSkipRemaining { detail, reason }) => {
                    run.complete(idx, detail);
                    run.skip_remaining(&reason);
                    break;
                }
                Err(e) => {
                    warn!(
                        "Run {} failed at {}: {}",
                        run.id,
                        STEP_ORDER[idx].as_str(),
                        e
                    );
                    run.fail(idx, &e);
                    run.outcome = RunOutcome::Failure;
                    run.rollback = Some(self.attempt_rollback(store));
                    break;
                }
            }
        }

        run.duration_ms = started.elapsed().as_millis() as u64;
        self.persist_run(&run)?;
        info!(
            "Deployment run {} finished: {:?} in {}ms",
            run.id, run.outcome, run.duration_ms
        );
        Ok(run)
    }

    /// Flag-driven skips, decided before a step begins
    fn skip_reason(&self, step: StepName, options: &DeployOptions) -> Option<String> {
        match step {
            StepName::Backup if options.skip_backup => Some("skipped by flag".into()),
            StepName::HealthCheck if options.skip_health => Some("skipped by flag".into()),
            _ => None,
        }
    }

    fn execute_step(
        &self,
        step: StepName,
        store: &mut Store,
        options: &DeployOptions,
        run: &mut DeploymentRun,
    ) -> Result<StepOutcome> {
        match step {
            StepName::EnvSync => {
                self.config.validate().map_err(|e| Error::FatalPipeline {
                    step: step.as_str().into(),
                    reason: e.to_string(),
                })?;
                self.config.ensure_layout()?;
                Ok(StepOutcome::Completed("configuration validated".into()))
            }

            StepName::Backup => {
                let point = self.recovery.backups().create(
                    store.conn(),
                    crate::backup::BackupKind::Full,
                    "pre-deploy",
                )?;
                run.backup_id = Some(point.manifest.id.clone());
                Ok(StepOutcome::Completed(format!(
                    "created backup {}",
                    point.manifest.id
                )))
            }

            StepName::ChangeAnalysis => {
                let result =
                    analysis::analyze(store.conn(), self.config.change_listing.as_deref())?;
                run.change_kind = Some(result.kind);
                if result.kind == ChangeKind::DocsOnly && !options.force {
                    Ok(StepOutcome::CompletedSkipRemaining {
                        detail: "docs-only change set".into(),
                        reason: "skipped: docs-only change set".into(),
                    })
                } else {
                    Ok(StepOutcome::Completed(format!(
                        "change set classified as {}",
                        result.kind.as_str()
                    )))
                }
            }

            StepName::Migrate => {
                let applied = migrations::apply_pending(store.conn())?;
                Ok(StepOutcome::Completed(format!(
                    "applied {} migration(s)",
                    applied.len()
                )))
            }

            StepName::HealthCheck => {
                let report = self.health.run_all();
                if let Err(e) = self.health.persist(&report) {
                    warn!("Failed to persist health report: {}", e);
                }
                match report.status {
                    HealthStatus::Critical => Err(Error::FatalPipeline {
                        step: step.as_str().into(),
                        reason: format!("health critical (score {})", report.score),
                    }),
                    HealthStatus::Degraded => {
                        warn!("Health degraded (score {}), continuing", report.score);
                        Ok(StepOutcome::Completed(format!(
                            "degraded (score {}), continuing with warning",
                            report.score
                        )))
                    }
                    HealthStatus::Healthy => Ok(StepOutcome::Completed(format!(
                        "healthy (score {})",
                        report.score
                    ))),
                }
            }

            StepName::Trigger => {
                let status = self.invoke_trigger()?;
                Ok(StepOutcome::Completed(format!(
                    "deploy triggered (status {})",
                    status
                )))
            }

            StepName::Verify => {
                // Failures here are reported but never un-complete the run;
                // the external deploy has already been triggered.
                let report = self.health.run_reachability();
                let failed: Vec<&str> = report
                    .checks
                    .iter()
                    .filter(|c| !c.passed)
                    .map(|c| c.name.as_str())
                    .collect();
                if failed.is_empty() {
                    Ok(StepOutcome::Completed(format!(
                        "verification passed (score {})",
                        report.score
                    )))
                } else {
                    warn!("Post-deploy verification reported: {}", failed.join(", "));
                    Ok(StepOutcome::Completed(format!(
                        "verification reported issues: {}",
                        failed.join(", ")
                    )))
                }
            }
        }
    }

    /// External deploy trigger, hardened with bounded retry. The call is
    /// idempotent on the remote side, so retrying is safe.
    fn invoke_trigger(&self) -> Result<u16> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(self.config.network_timeout_secs))
            .build()?;
        let url = self.config.trigger_url.clone();

        execute_with_retry(
            || {
                let response = client.post(&url).json(&serde_json::json!({})).send()?;
                let status = response.status();
                if status.is_success() {
                    Ok(status.as_u16())
                } else {
                    Err(Error::FatalPipeline {
                        step: "trigger".into(),
                        reason: format!("trigger returned status {}", status),
                    })
                }
            },
            3,
            Duration::from_millis(500),
        )
    }

    /// Best-effort rollback after a step failure. Never masks the original
    /// error; the outcome is attached to the run's report.
    fn attempt_rollback(&self, store: &mut Store) -> RollbackOutcome {
        info!("Attempting best-effort rollback");
        match self.recovery.rollback(store.conn_mut()) {
            Ok((action, counts)) => RollbackOutcome {
                attempted: true,
                success: true,
                detail: format!(
                    "rolled back to {} ({} units, {} accounts)",
                    action.target, counts.units, counts.accounts
                ),
            },
            Err(e) => {
                warn!("Rollback failed: {}", e);
                RollbackOutcome {
                    attempted: true,
                    success: false,
                    detail: e.to_string(),
                }
            }
        }
    }

    fn persist_run(&self, run: &DeploymentRun) -> Result<()> {
        let dir = self.config.deployments_dir();
        fs::create_dir_all(&dir)?;
        fs::write(
            dir.join(format!("{}.json", run.id)),
            serde_json::to_vec_pretty(run)?,
        )?;
        Ok(())
    }

    /// Most recent persisted run artifact, if any
    pub fn last_run(&self) -> Result<Option<DeploymentRun>> {
        let dir = self.config.deployments_dir();
        if !dir.is_dir() {
            return Ok(None);
        }
        let mut runs: Vec<DeploymentRun> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(entry.path())
                .map_err(Error::from)
                .and_then(|raw| serde_json::from_slice(&raw).map_err(Error::from))
            {
                Ok(run) => runs.push(run),
                Err(e) => warn!("Skipping unreadable run artifact: {}", e),
            }
        }
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testutil::seed;
    use std::io::{Read, Write};
    use std::path::Path;
    use tempfile::TempDir;

    fn test_config(dir: &Path) -> Config {
        Config {
            state_dir: dir.to_path_buf(),
            db_path: dir.join("custodian.db"),
            admin_token: "tok".into(),
            // Unroutable: connection refused immediately in tests
            trigger_url: "http://127.0.0.1:1/hook".into(),
            probe_urls: vec![],
            change_listing: None,
            network_timeout_secs: 1,
        }
    }

    fn setup(dir: &TempDir) -> (DeploymentOrchestrator, Store) {
        let config = test_config(dir.path());
        config.ensure_layout().unwrap();
        let store = Store::open(&config.db_path).unwrap();
        (DeploymentOrchestrator::new(config).unwrap(), store)
    }

    fn step(run: &DeploymentRun, name: StepName) -> &StepRecord {
        run.steps.iter().find(|s| s.name == name).unwrap()
    }

    fn write_listing(dir: &Path, lines: &[&str]) -> PathBuf {
        let path = dir.join("changes.txt");
        let mut file = fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        path
    }

    /// Minimal HTTP endpoint that answers every request with 200
    fn spawn_ok_server() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                );
            }
        });
        format!("http://{}/hook", addr)
    }

    #[test]
    fn test_docs_only_run_succeeds_and_skips_remaining() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        config.ensure_layout().unwrap();
        config.change_listing = Some(write_listing(dir.path(), &["README.md"]));

        let mut store = Store::open(&config.db_path).unwrap();
        migrations::apply_pending(store.conn()).unwrap();
        seed(store.conn(), 1, 1);

        let orchestrator = DeploymentOrchestrator::new(config).unwrap();
        let run = orchestrator
            .run(&mut store, &DeployOptions::default())
            .unwrap();

        assert!(run.succeeded());
        assert_eq!(run.change_kind, Some(ChangeKind::DocsOnly));
        assert_eq!(
            step(&run, StepName::ChangeAnalysis).status,
            StepStatus::Completed
        );
        for name in [StepName::Migrate, StepName::HealthCheck, StepName::Trigger, StepName::Verify]
        {
            assert_eq!(step(&run, name).status, StepStatus::Skipped);
        }
        assert!(run.backup_id.is_some());
        assert!(run.rollback.is_none());
    }

    #[test]
    fn test_trigger_failure_rolls_back_and_keeps_verify_pending() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        config.ensure_layout().unwrap();
        config.change_listing = Some(write_listing(dir.path(), &["src/api/loans.js"]));

        let mut store = Store::open(&config.db_path).unwrap();
        migrations::apply_pending(store.conn()).unwrap();
        seed(store.conn(), 1, 1);

        let orchestrator = DeploymentOrchestrator::new(config).unwrap();
        let options = DeployOptions {
            skip_health: true,
            ..Default::default()
        };
        let run = orchestrator.run(&mut store, &options).unwrap();

        assert!(!run.succeeded());
        assert_eq!(run.failed_step.as_deref(), Some("trigger"));
        assert_eq!(step(&run, StepName::Trigger).status, StepStatus::Failed);
        assert_eq!(step(&run, StepName::Verify).status, StepStatus::Pending);

        // Backup from step 2 makes the rollback attempt succeed
        let rollback = run.rollback.as_ref().unwrap();
        assert!(rollback.attempted);
        assert!(rollback.success, "{}", rollback.detail);
        // The original error is preserved, not masked by the rollback
        assert!(run.error.as_ref().unwrap().contains("trigger") || run.error.is_some());
    }

    #[test]
    fn test_migrate_failure_containment() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, mut store) = setup(&dir);
        seed(store.conn(), 1, 1);

        // Force the first registered migration to fail: the column it adds
        // already exists, so ALTER TABLE errors out.
        store
            .conn()
            .execute("ALTER TABLE accounts ADD COLUMN phone TEXT", [])
            .unwrap();

        let run = orchestrator
            .run(&mut store, &DeployOptions::default())
            .unwrap();

        assert!(!run.succeeded());
        assert_eq!(run.failed_step.as_deref(), Some("migrate"));
        assert_eq!(step(&run, StepName::Migrate).status, StepStatus::Failed);
        assert_eq!(
            step(&run, StepName::HealthCheck).status,
            StepStatus::Pending
        );
        assert_eq!(step(&run, StepName::Trigger).status, StepStatus::Pending);
        assert!(run.rollback.as_ref().unwrap().attempted);
    }

    #[test]
    fn test_skip_backup_flag() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        config.ensure_layout().unwrap();
        config.change_listing = Some(write_listing(dir.path(), &["README.md"]));

        let mut store = Store::open(&config.db_path).unwrap();
        migrations::apply_pending(store.conn()).unwrap();

        let orchestrator = DeploymentOrchestrator::new(config).unwrap();
        let options = DeployOptions {
            skip_backup: true,
            ..Default::default()
        };
        let run = orchestrator.run(&mut store, &options).unwrap();

        assert_eq!(step(&run, StepName::Backup).status, StepStatus::Skipped);
        assert!(run.backup_id.is_none());
        assert!(run.succeeded());
    }

    #[test]
    fn test_cancellation_between_steps() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, mut store) = setup(&dir);

        let cancel = Arc::new(AtomicBool::new(true));
        let options = DeployOptions {
            cancel: Some(cancel),
            ..Default::default()
        };
        let run = orchestrator.run(&mut store, &options).unwrap();

        assert!(!run.succeeded());
        assert_eq!(run.error.as_deref(), Some("cancelled"));
        for record in &run.steps {
            assert_eq!(record.status, StepStatus::Skipped);
            assert_eq!(record.detail.as_deref(), Some("skipped: cancelled"));
        }
        // Cancellation is not a step failure: no rollback is attempted
        assert!(run.rollback.is_none());
    }

    #[test]
    fn test_step_ordering_invariant() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, mut store) = setup(&dir);
        seed(store.conn(), 1, 1);

        let options = DeployOptions {
            skip_health: true,
            ..Default::default()
        };
        let run = orchestrator.run(&mut store, &options).unwrap();

        // No step is ever left running, and every step after the first
        // non-terminal one is pending.
        let mut seen_non_terminal = false;
        for record in &run.steps {
            assert_ne!(record.status, StepStatus::Running);
            if seen_non_terminal {
                assert_eq!(record.status, StepStatus::Pending);
            }
            if !record.status.is_terminal() {
                seen_non_terminal = true;
            }
        }
    }

    #[test]
    fn test_concurrent_deploy_is_busy() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, mut store) = setup(&dir);

        // Hold the pipeline lock the way an in-flight run would
        let held = fs::File::create(dir.path().join("deploy.lock")).unwrap();
        held.try_lock_exclusive().unwrap();

        let result = orchestrator.run(&mut store, &DeployOptions::default());
        assert!(matches!(result, Err(Error::Busy(_))));

        fs2::FileExt::unlock(&held).unwrap();
        assert!(orchestrator
            .run(&mut store, &DeployOptions::default())
            .is_ok());
    }

    #[test]
    fn test_api_change_runs_migrate_as_noop() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        config.ensure_layout().unwrap();
        config.change_listing = Some(write_listing(dir.path(), &["src/api/loans.js"]));

        let mut store = Store::open(&config.db_path).unwrap();
        migrations::apply_pending(store.conn()).unwrap();
        seed(store.conn(), 1, 1);

        let orchestrator = DeploymentOrchestrator::new(config).unwrap();
        let options = DeployOptions {
            skip_health: true,
            ..Default::default()
        };
        let run = orchestrator.run(&mut store, &options).unwrap();

        assert_eq!(run.change_kind, Some(ChangeKind::Api));
        let migrate = step(&run, StepName::Migrate);
        assert_eq!(migrate.status, StepStatus::Completed);
        assert_eq!(migrate.detail.as_deref(), Some("applied 0 migration(s)"));
    }

    #[test]
    fn test_verify_issues_never_fail_a_triggered_run() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        config.trigger_url = spawn_ok_server();
        // Unroutable probe: final verification will report it
        config.probe_urls = vec!["http://127.0.0.1:1/health".into()];
        config.ensure_layout().unwrap();
        config.change_listing = Some(write_listing(dir.path(), &["src/api/loans.js"]));

        let mut store = Store::open(&config.db_path).unwrap();
        migrations::apply_pending(store.conn()).unwrap();
        seed(store.conn(), 1, 1);

        let orchestrator = DeploymentOrchestrator::new(config).unwrap();
        let options = DeployOptions {
            skip_health: true,
            ..Default::default()
        };
        let run = orchestrator.run(&mut store, &options).unwrap();

        // The deploy was triggered, so verification issues are reported
        // without un-completing the run
        assert!(run.succeeded(), "{:?}", run.error);
        assert_eq!(step(&run, StepName::Trigger).status, StepStatus::Completed);
        let verify = step(&run, StepName::Verify);
        assert_eq!(verify.status, StepStatus::Completed);
        assert!(verify.detail.as_ref().unwrap().contains("issues"));
        assert!(run.rollback.is_none());
    }

    #[test]
    fn test_run_artifact_persisted_and_last_run() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, mut store) = setup(&dir);
        seed(store.conn(), 1, 1);

        let run = orchestrator
            .run(&mut store, &DeployOptions::default())
            .unwrap();

        let last = orchestrator.last_run().unwrap().unwrap();
        assert_eq!(last.id, run.id);
        assert_eq!(last.outcome, run.outcome);
    }
}
