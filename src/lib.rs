// src/lib.rs

//! Custodian deployment orchestration engine
//!
//! Snapshots system state before a release, verifies and restores those
//! snapshots, runs a multi-step release pipeline with ordered
//! fail-fast-and-recover semantics, and continuously assesses system health.
//!
//! # Architecture
//!
//! - Backup units: immutable, checksummed snapshots; manifest written last
//! - Recovery: integrity-verified restore, rollback-to-latest, auto-recovery
//! - Pipeline: seven ordered steps, first failure triggers rollback
//! - Health: fixed check battery aggregated into a 0-100 score

pub mod backup;
pub mod cli;
pub mod commands;
pub mod config;
pub mod deploy;
mod error;
pub mod health;
pub mod recovery;
pub mod retry;
pub mod store;

pub use backup::{BackupKind, BackupManager, BackupManifest, BackupPoint};
pub use config::Config;
pub use deploy::{
    DeployOptions, DeploymentOrchestrator, DeploymentRun, RunOutcome, StepName, StepStatus,
};
pub use error::{Error, Result};
pub use health::{HealthChecker, HealthReport, HealthStatus};
pub use recovery::{RecoveryAction, RecoveryEngine, RecoveryKind, RecoveryStatus};
pub use retry::execute_with_retry;
