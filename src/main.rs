// src/main.rs

use anyhow::Result;
use clap::Parser;
use custodian::backup::BackupKind;
use custodian::cli::{Cli, Commands};
use custodian::commands;
use custodian::config::Config;
use custodian::deploy::DeployOptions;
use std::process::ExitCode;

fn main() -> Result<ExitCode> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let token = cli
        .token
        .or_else(|| std::env::var("CUSTODIAN_TOKEN").ok())
        .unwrap_or_default();

    let result = match cli.command {
        Commands::CreateBackup { kind, description } => {
            let kind = match kind.as_str() {
                "incremental" => BackupKind::Incremental,
                _ => BackupKind::Full,
            };
            commands::create_backup(&config, &token, kind, &description)
        }
        Commands::Restore { backup_id } => commands::restore(&config, &token, &backup_id),
        Commands::Rollback { yes } => {
            if !yes {
                anyhow::bail!("rollback rewrites the data store; re-run with --yes to confirm");
            }
            commands::rollback(&config, &token)
        }
        Commands::AutoRecover => commands::auto_recover(&config, &token),
        Commands::FullAutoDeploy {
            force,
            skip_backup,
            skip_health,
        } => {
            let options = DeployOptions {
                force,
                skip_backup,
                skip_health,
                cancel: None,
            };
            commands::full_auto_deploy(&config, &token, &options)
        }
        Commands::HealthCheck => commands::health_check(&config, &token),
        Commands::EmergencyRollback => commands::emergency_rollback(&config, &token),
        Commands::SystemStatus => commands::system_status(&config, &token),
    };

    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.succeeded() {
        Ok(ExitCode::SUCCESS)
    } else {
        if let Some(path) = &result.backup_path {
            eprintln!("latest backup for manual recovery: {}", path);
        }
        Ok(ExitCode::FAILURE)
    }
}
