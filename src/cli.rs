// src/cli.rs
//! CLI definitions for the custodian orchestration engine
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "custodian")]
#[command(author = "Custodian Project")]
#[command(version)]
#[command(
    about = "Deployment orchestration with atomic backups, integrity-checked restore, and health monitoring",
    long_about = None
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/custodian/custodian.toml"
    )]
    pub config: PathBuf,

    /// Access token (falls back to the CUSTODIAN_TOKEN environment variable)
    #[arg(short, long, global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Snapshot current system state into a new backup unit
    CreateBackup {
        /// Backup kind: full or incremental
        #[arg(short, long, default_value = "full")]
        kind: String,

        /// Human-readable description stored in the manifest
        #[arg(short, long, default_value = "manual backup")]
        description: String,
    },

    /// Restore the data store from a specific backup
    Restore {
        /// Backup identifier (see system-status for the latest)
        backup_id: String,
    },

    /// Roll back to the most recent valid backup
    Rollback {
        /// Confirm the rollback (required; rollback rewrites the data store)
        #[arg(long)]
        yes: bool,
    },

    /// Diagnose store invariants and apply targeted fixes, falling back to
    /// rollback when fixes are insufficient
    AutoRecover,

    /// Run the full deployment pipeline
    FullAutoDeploy {
        /// Proceed past docs-only classification and force migrations
        #[arg(long)]
        force: bool,

        /// Skip the pre-deploy backup step
        #[arg(long)]
        skip_backup: bool,

        /// Skip the health/stability gate
        #[arg(long)]
        skip_health: bool,
    },

    /// Run the health check battery and report the score
    HealthCheck,

    /// Immediate rollback without confirmation, with a post-restore health check
    EmergencyRollback,

    /// Aggregate status: latest backup, health, last deployment run
    SystemStatus,
}
