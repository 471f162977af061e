// src/recovery/mod.rs

//! Restore, rollback, and heuristic auto-recovery
//!
//! Every operation here is audited as a [`RecoveryAction`] artifact with a
//! monotonic status (pending -> running -> completed/failed, terminal once
//! finished). An exclusive lock file serializes recovery operations: a
//! second restore/rollback/auto-recover while one is running fails fast
//! with `Busy` instead of interleaving mutations.
//!
//! Restore verifies the backup digest before touching the live store, then
//! stages the full target state and applies it inside a single SQLite
//! transaction: entities are deleted in reverse dependency order and
//! recreated in dependency order so referential constraints hold at every
//! intermediate point. A mid-apply failure rolls the transaction back and
//! reports how many records were applied versus pending.

use crate::backup::{payload_digest, BackupManager, BackupPayload};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::store;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

/// Kind of recovery operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryKind {
    Restore,
    Rollback,
    Repair,
}

/// Monotonic action status; terminal once completed or failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Audit record for one recovery operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAction {
    pub id: String,
    pub kind: RecoveryKind,
    pub target: String,
    pub status: RecoveryStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RecoveryAction {
    fn begin(kind: RecoveryKind, target: &str) -> Self {
        Self {
            id: format!("rec-{}", Uuid::new_v4()),
            kind,
            target: target.to_string(),
            status: RecoveryStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    fn complete(&mut self) {
        self.status = RecoveryStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    fn fail(&mut self, error: &Error) {
        self.status = RecoveryStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error.to_string());
    }
}

/// Per-collection counts of restored records
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreCounts {
    pub units: usize,
    pub accounts: usize,
    pub migrations: usize,
}

/// One invariant violation found by auto-recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedIssue {
    pub code: String,
    pub detail: String,
}

/// Outcome of one targeted fix attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixOutcome {
    pub name: String,
    pub success: bool,
    pub detail: String,
}

/// Diagnostic report returned by auto-recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRecoveryReport {
    pub action: RecoveryAction,
    pub issues: Vec<DetectedIssue>,
    pub fixes: Vec<FixOutcome>,
    pub rolled_back: bool,
    pub healthy: bool,
}

/// Exclusive recovery lock; released on drop
struct RecoveryLock {
    file: File,
}

impl Drop for RecoveryLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Recovery engine over the backup manager's on-disk format
pub struct RecoveryEngine {
    backups: BackupManager,
    recovery_dir: PathBuf,
    lock_path: PathBuf,
}

impl RecoveryEngine {
    pub fn new(config: Config) -> Result<Self> {
        let recovery_dir = config.recovery_dir();
        fs::create_dir_all(&recovery_dir)?;
        let lock_path = config.state_dir.join("recovery.lock");
        Ok(Self {
            backups: BackupManager::new(config)?,
            recovery_dir,
            lock_path,
        })
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Acquire the exclusive recovery lock, or fail fast with Busy
    fn acquire_lock(&self) -> Result<RecoveryLock> {
        let file = File::create(&self.lock_path)?;
        file.try_lock_exclusive()
            .map_err(|_| Error::Busy("another recovery operation is running".into()))?;
        Ok(RecoveryLock { file })
    }

    /// Persist an action artifact; rewritten once when it reaches a
    /// terminal status, never reopened after that.
    fn persist_action(&self, action: &RecoveryAction) -> Result<()> {
        let path = self.recovery_dir.join(format!("{}.json", action.id));
        fs::write(path, serde_json::to_vec_pretty(action)?)?;
        Ok(())
    }

    /// Restore the live store from a backup unit
    pub fn restore(
        &self,
        conn: &mut Connection,
        backup_id: &str,
    ) -> Result<(RecoveryAction, RestoreCounts)> {
        let _lock = self.acquire_lock()?;
        self.restore_locked(conn, backup_id, RecoveryKind::Restore)
    }

    /// Restore to the most recent valid backup
    pub fn rollback(&self, conn: &mut Connection) -> Result<(RecoveryAction, RestoreCounts)> {
        let _lock = self.acquire_lock()?;
        let latest = self
            .backups
            .latest()?
            .ok_or_else(|| Error::NotFound("no valid backup to roll back to".into()))?;
        info!("Rolling back to latest backup {}", latest.manifest.id);
        self.restore_locked(conn, &latest.manifest.id, RecoveryKind::Rollback)
    }

    fn restore_locked(
        &self,
        conn: &mut Connection,
        backup_id: &str,
        kind: RecoveryKind,
    ) -> Result<(RecoveryAction, RestoreCounts)> {
        let mut action = RecoveryAction::begin(kind, backup_id);
        self.persist_action(&action)?;

        match self.verify_and_apply(conn, backup_id) {
            Ok(counts) => {
                action.complete();
                self.persist_action(&action)?;
                info!(
                    "Restore of {} complete: {} units, {} accounts, {} migrations",
                    backup_id, counts.units, counts.accounts, counts.migrations
                );
                Ok((action, counts))
            }
            Err(e) => {
                action.fail(&e);
                self.persist_action(&action)?;
                Err(e)
            }
        }
    }

    /// Digest check, staging, and atomic apply. No live mutation happens
    /// before the digest matches.
    fn verify_and_apply(&self, conn: &mut Connection, backup_id: &str) -> Result<RestoreCounts> {
        let (manifest, payload_bytes) = self.backups.load(backup_id)?;

        let actual = payload_digest(&payload_bytes);
        if actual != manifest.digest {
            return Err(Error::Integrity {
                expected: manifest.digest,
                actual,
            });
        }

        // Stage the full target state in memory before touching the store
        let payload: BackupPayload = serde_json::from_slice(&payload_bytes)?;
        apply_snapshot(conn, &payload)
    }

    /// Run the invariant battery, attempt targeted fixes, and fall back to
    /// rollback when fixes are insufficient.
    pub fn auto_recover(&self, conn: &mut Connection) -> Result<AutoRecoveryReport> {
        let _lock = self.acquire_lock()?;
        let mut action = RecoveryAction::begin(RecoveryKind::Repair, "live-store");
        self.persist_action(&action)?;

        let issues = detect_issues(conn);
        if issues.is_empty() {
            action.complete();
            self.persist_action(&action)?;
            return Ok(AutoRecoveryReport {
                action,
                issues,
                fixes: Vec::new(),
                rolled_back: false,
                healthy: true,
            });
        }

        let mut fixes = Vec::new();
        for issue in &issues {
            fixes.push(attempt_fix(conn, issue));
        }

        // Re-check; fall back to rollback if anything is still broken
        let remaining = detect_issues(conn);
        let mut rolled_back = false;
        if !remaining.is_empty() {
            warn!(
                "{} issue(s) remain after targeted fixes, falling back to rollback",
                remaining.len()
            );
            match self.backups.latest()? {
                Some(latest) => {
                    match self.restore_locked(conn, &latest.manifest.id, RecoveryKind::Rollback) {
                        Ok(_) => {
                            rolled_back = true;
                            fixes.push(FixOutcome {
                                name: "rollback".into(),
                                success: true,
                                detail: format!("rolled back to {}", latest.manifest.id),
                            });
                        }
                        Err(e) => fixes.push(FixOutcome {
                            name: "rollback".into(),
                            success: false,
                            detail: e.to_string(),
                        }),
                    }
                }
                None => fixes.push(FixOutcome {
                    name: "rollback".into(),
                    success: false,
                    detail: "no valid backup available".into(),
                }),
            }
        }

        let healthy = detect_issues(conn).is_empty();
        if healthy {
            action.complete();
        } else {
            action.fail(&Error::FatalPipeline {
                step: "auto-recover".into(),
                reason: "issues remain after fixes and rollback".into(),
            });
        }
        self.persist_action(&action)?;

        Ok(AutoRecoveryReport {
            action,
            issues,
            fixes,
            rolled_back,
            healthy,
        })
    }

    /// Read back persisted action artifacts, newest first (audit surface)
    pub fn actions(&self) -> Result<Vec<RecoveryAction>> {
        let mut actions = Vec::new();
        for entry in fs::read_dir(&self.recovery_dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(entry.path())
                .map_err(Error::from)
                .and_then(|raw| serde_json::from_slice(&raw).map_err(Error::from))
            {
                Ok(action) => actions.push(action),
                Err(e) => warn!("Skipping unreadable action artifact: {}", e),
            }
        }
        actions.sort_by(|a: &RecoveryAction, b: &RecoveryAction| b.started_at.cmp(&a.started_at));
        Ok(actions)
    }
}

/// Apply a staged snapshot to the live store as one transaction.
///
/// Delete children before parents, recreate parents before children. If any
/// create fails mid-way the transaction is rolled back (the store is left
/// unchanged) and the error reports how far the apply got.
fn apply_snapshot(conn: &mut Connection, payload: &BackupPayload) -> Result<RestoreCounts> {
    let tx = conn.transaction()?;
    let mut counts = RestoreCounts::default();

    store::delete_all_accounts(&tx)?;
    store::delete_all_units(&tx)?;

    let total_units = payload.units.len();
    for unit in &payload.units {
        if let Err(e) = store::create_unit(&tx, unit) {
            warn!("Unit create failed during restore: {}", e);
            return Err(Error::PartialFailure {
                collection: "units".into(),
                applied: counts.units,
                pending: total_units - counts.units,
            });
        }
        counts.units += 1;
    }

    let total_accounts = payload.accounts.len();
    for account in &payload.accounts {
        if let Err(e) = store::create_account(&tx, account) {
            warn!("Account create failed during restore: {}", e);
            return Err(Error::PartialFailure {
                collection: "accounts".into(),
                applied: counts.accounts,
                pending: total_accounts - counts.accounts,
            });
        }
        counts.accounts += 1;
    }

    store::migrations::set_applied(&tx, &payload.applied_migrations)?;
    counts.migrations = payload.applied_migrations.len();

    tx.commit()?;
    Ok(counts)
}

const ISSUE_NO_ADMIN: &str = "no_super_admin";
const ISSUE_NO_PRIMARY_UNIT: &str = "no_primary_unit";
const ISSUE_STORE_UNREACHABLE: &str = "store_unreachable";

/// Fixed invariant battery against the live store
fn detect_issues(conn: &Connection) -> Vec<DetectedIssue> {
    let mut issues = Vec::new();

    match store::count_admins(conn) {
        Ok(0) => issues.push(DetectedIssue {
            code: ISSUE_NO_ADMIN.into(),
            detail: "No super admin found".into(),
        }),
        Ok(_) => {}
        Err(e) => {
            issues.push(DetectedIssue {
                code: ISSUE_STORE_UNREACHABLE.into(),
                detail: format!("account query failed: {}", e),
            });
            return issues;
        }
    }

    match store::count_primary_units(conn) {
        Ok(0) => issues.push(DetectedIssue {
            code: ISSUE_NO_PRIMARY_UNIT.into(),
            detail: "No primary organizational unit found".into(),
        }),
        Ok(_) => {}
        Err(e) => issues.push(DetectedIssue {
            code: ISSUE_STORE_UNREACHABLE.into(),
            detail: format!("unit query failed: {}", e),
        }),
    }

    issues
}

/// Targeted scripted fix for one detected issue
fn attempt_fix(conn: &Connection, issue: &DetectedIssue) -> FixOutcome {
    match issue.code.as_str() {
        ISSUE_NO_PRIMARY_UNIT => match bootstrap_primary_unit(conn) {
            Ok(id) => FixOutcome {
                name: "bootstrap_primary_unit".into(),
                success: true,
                detail: format!("created primary unit {}", id),
            },
            Err(e) => FixOutcome {
                name: "bootstrap_primary_unit".into(),
                success: false,
                detail: e.to_string(),
            },
        },
        ISSUE_NO_ADMIN => match bootstrap_admin(conn) {
            Ok(id) => FixOutcome {
                name: "bootstrap_admin".into(),
                success: true,
                detail: format!("created admin account {}", id),
            },
            Err(e) => FixOutcome {
                name: "bootstrap_admin".into(),
                success: false,
                detail: e.to_string(),
            },
        },
        _ => FixOutcome {
            name: "none".into(),
            success: false,
            detail: format!("no scripted fix for {}", issue.code),
        },
    }
}

fn bootstrap_primary_unit(conn: &Connection) -> Result<String> {
    let unit = store::OrgUnit {
        id: format!("unit-{}", &Uuid::new_v4().to_string()[..8]),
        code: "PRIMARY".into(),
        name: "Primary Unit".into(),
        is_primary: true,
        created_at: Utc::now(),
    };
    store::create_unit(conn, &unit)?;
    Ok(unit.id)
}

fn bootstrap_admin(conn: &Connection) -> Result<String> {
    // Admin needs a unit to belong to; prefer the primary one
    let units = store::find_all_units(conn)?;
    let unit_id = units
        .iter()
        .find(|u| u.is_primary)
        .or_else(|| units.first())
        .map(|u| u.id.clone())
        .map(Ok)
        .unwrap_or_else(|| bootstrap_primary_unit(conn))?;

    let account = store::Account {
        id: format!("acct-{}", &Uuid::new_v4().to_string()[..8]),
        email: "admin@recovery.local".into(),
        name: "Recovery Admin".into(),
        role: store::Role::Admin,
        unit_id,
        created_at: Utc::now(),
    };
    store::create_account(conn, &account)?;
    Ok(account.id)
}
