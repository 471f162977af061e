// src/backup/mod.rs

//! Backup creation and manifesting
//!
//! A backup unit is a timestamped directory under the backup storage area
//! holding `payload.json` (the serialized state snapshot) and
//! `manifest.json` (file list + SHA-256 digest). The manifest is written
//! last, after every payload write succeeds: a unit without a manifest is
//! never a valid BackupPoint, so an interrupted create cannot leave behind
//! a falsely-recoverable artifact.
//!
//! Units are immutable once the manifest lands. The recovery engine only
//! reads them.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::store;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Payload file name inside a backup unit
const PAYLOAD_FILE: &str = "payload.json";
/// Manifest file name; its presence marks the unit valid
const MANIFEST_FILE: &str = "manifest.json";

/// Backup kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Full,
    Incremental,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

/// The serialized state snapshot carried by a backup unit
///
/// Field order is fixed and collection exports are sorted by the store
/// queries, so serialization is deterministic and the digest is stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupPayload {
    pub config: BTreeMap<String, String>,
    pub units: Vec<store::OrgUnit>,
    pub accounts: Vec<store::Account>,
    pub applied_migrations: Vec<String>,
}

/// Manifest: file list + digest; written last
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub kind: BackupKind,
    pub description: String,
    pub files: Vec<String>,
    pub digest: String,
    pub size_bytes: u64,
}

/// A valid backup unit: manifest plus the path it lives at
#[derive(Debug, Clone)]
pub struct BackupPoint {
    pub manifest: BackupManifest,
    pub path: PathBuf,
}

/// Compute the SHA-256 digest of serialized payload bytes, hex-encoded
pub fn payload_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Manages the backup storage area
pub struct BackupManager {
    backups_dir: PathBuf,
    config: Config,
}

impl BackupManager {
    pub fn new(config: Config) -> Result<Self> {
        let backups_dir = config.backups_dir();
        fs::create_dir_all(&backups_dir)?;
        Ok(Self {
            backups_dir,
            config,
        })
    }

    /// Snapshot the current system state into a new backup unit
    pub fn create(
        &self,
        conn: &Connection,
        kind: BackupKind,
        description: &str,
    ) -> Result<BackupPoint> {
        let created_at = Utc::now();
        let id = format!(
            "bkp-{}-{}",
            created_at.format("%Y%m%dT%H%M%SZ"),
            &Uuid::new_v4().to_string()[..8]
        );
        info!("Creating {} backup {}", kind.as_str(), id);

        let payload = BackupPayload {
            config: self.config.snapshot(),
            units: store::find_all_units(conn)?,
            accounts: store::find_all_accounts(conn)?,
            applied_migrations: store::migrations::applied_ids(conn)?,
        };
        let payload_bytes = serde_json::to_vec_pretty(&payload)?;
        let digest = payload_digest(&payload_bytes);

        let unit_dir = self.backups_dir.join(&id);
        let result = self.write_unit(&unit_dir, &id, created_at, kind, description, &payload_bytes, &digest);

        match result {
            Ok(point) => {
                info!(
                    "Backup {} complete: {} units, {} accounts, digest {}",
                    id,
                    payload.units.len(),
                    payload.accounts.len(),
                    &digest[..12]
                );
                Ok(point)
            }
            Err(e) => {
                // Abort the whole unit; nothing partial may look valid
                if unit_dir.exists() {
                    if let Err(cleanup) = fs::remove_dir_all(&unit_dir) {
                        warn!("Failed to clean up aborted backup {}: {}", id, cleanup);
                    }
                }
                Err(Error::BackupCreation(e.to_string()))
            }
        }
    }

    fn write_unit(
        &self,
        unit_dir: &PathBuf,
        id: &str,
        created_at: DateTime<Utc>,
        kind: BackupKind,
        description: &str,
        payload_bytes: &[u8],
        digest: &str,
    ) -> Result<BackupPoint> {
        fs::create_dir_all(unit_dir)?;
        fs::write(unit_dir.join(PAYLOAD_FILE), payload_bytes)?;

        // Manifest last: its presence marks the unit valid
        let manifest = BackupManifest {
            id: id.to_string(),
            created_at,
            kind,
            description: description.to_string(),
            files: vec![PAYLOAD_FILE.to_string()],
            digest: digest.to_string(),
            size_bytes: payload_bytes.len() as u64,
        };
        fs::write(
            unit_dir.join(MANIFEST_FILE),
            serde_json::to_vec_pretty(&manifest)?,
        )?;

        Ok(BackupPoint {
            manifest,
            path: unit_dir.clone(),
        })
    }

    /// Enumerate valid backup units, most recent first
    pub fn list(&self) -> Result<Vec<BackupPoint>> {
        let mut points = Vec::new();

        for entry in fs::read_dir(&self.backups_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let manifest_path = entry.path().join(MANIFEST_FILE);
            if !manifest_path.exists() {
                debug!(
                    "Skipping {} (no manifest, not a valid backup)",
                    entry.path().display()
                );
                continue;
            }
            match fs::read(&manifest_path)
                .map_err(Error::from)
                .and_then(|raw| serde_json::from_slice::<BackupManifest>(&raw).map_err(Error::from))
            {
                Ok(manifest) => points.push(BackupPoint {
                    manifest,
                    path: entry.path(),
                }),
                Err(e) => warn!(
                    "Skipping unreadable manifest {}: {}",
                    manifest_path.display(),
                    e
                ),
            }
        }

        points.sort_by(|a, b| b.manifest.created_at.cmp(&a.manifest.created_at));
        Ok(points)
    }

    /// Most recently created valid backup, if any
    pub fn latest(&self) -> Result<Option<BackupPoint>> {
        Ok(self.list()?.into_iter().next())
    }

    /// Load a unit's manifest and raw payload bytes by id
    pub fn load(&self, backup_id: &str) -> Result<(BackupManifest, Vec<u8>)> {
        let unit_dir = self.backups_dir.join(backup_id);
        let manifest_path = unit_dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(Error::NotFound(format!("backup {}", backup_id)));
        }
        let manifest: BackupManifest = serde_json::from_slice(&fs::read(&manifest_path)?)?;
        let payload_bytes = fs::read(unit_dir.join(PAYLOAD_FILE))?;
        Ok((manifest, payload_bytes))
    }

    /// Delete all but the newest `keep` valid units; invalid (manifest-less)
    /// units are always removed.
    pub fn prune(&self, keep: usize) -> Result<usize> {
        let valid = self.list()?;
        let keep_ids: Vec<&str> = valid
            .iter()
            .take(keep)
            .map(|p| p.manifest.id.as_str())
            .collect();

        let mut removed = 0;
        for entry in fs::read_dir(&self.backups_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if keep_ids.contains(&name.as_str()) {
                continue;
            }
            info!("Pruning backup unit {}", name);
            fs::remove_dir_all(entry.path())?;
            removed += 1;
        }
        Ok(removed)
    }
}
