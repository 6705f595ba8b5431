//! Database Backup/Restore Tool
//!
//! Provides CLI interface for database backup and restore operations

// dbbackup/src/main.rs
use anyhow::{Context, Result};
use dbbackup::config::{
    self, AppConfig, build_backup_parameters, build_restore_parameters, require_installer,
};
use dbbackup::utils::VersionClient;
use dbbackup::{Failures, run_backup_flow, run_restore_flow};
use std::env;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Main entry point for the backup/restore tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn report_failures(failures: &Failures) {
    for failure in failures.iter() {
        eprintln!("❌ {}", failure);
    }
}

async fn run_app() -> Result<()> {
    let config_path = config::config_path();
    let app_config = AppConfig::load_from_json(&config_path)
        .context(format!("Failed to load application configuration from {}", config_path.display()))?;

    let args: Vec<String> = env::args().collect();
    let choice = if args.len() > 1 {
        args[1].trim().to_string()
    } else {
        prompt_choice()?
    };

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current step");
            ctrl_c_token.cancel();
        }
    });

    match choice.as_str() {
        "1" | "backup" => {
            println!("🚀 Starting Backup Process...");
            let params = build_backup_parameters(&app_config).await;
            match run_backup_flow(&params, &cancel).await {
                Ok(report) => {
                    if let Some(file) = &report.local_file {
                        println!("📂 Local backup: {}", file.display());
                    }
                    if let Some(remote) = &report.uploaded {
                        println!("☁️ Uploaded to exchange storage as {}", remote);
                    }
                    info!(
                        run_id = %report.run_id,
                        local_deleted = report.local_deleted.len(),
                        exchange_deleted = report.exchange_deleted.len(),
                        "Backup finished"
                    );
                }
                Err(e) => {
                    if let Some(failures) = e.failures() {
                        report_failures(failures);
                    }
                    return Err(e).context("Backup process failed");
                }
            }
        }
        "2" | "restore" => {
            println!("🔄 Starting Restore Process...");
            let artifact_name = args.get(2).map(|a| a.trim().to_string()).filter(|a| !a.is_empty());
            let params = build_restore_parameters(&app_config, artifact_name).await;
            match run_restore_flow(&params, &cancel).await {
                Ok(report) => {
                    println!("Restored {} from {}", report.artifact.name, report.local_file.display());
                }
                Err(e) => {
                    if let Some(failures) = e.failures() {
                        report_failures(failures);
                    }
                    return Err(e).context("Restore process failed");
                }
            }
        }
        "3" | "version" => {
            let api = app_config
                .version_api
                .as_ref()
                .context("version_api must be set in config.json to check versions")?;
            let client = VersionClient::new(&api.base_url, api.timeout)?;
            let version = client.get_version().await?;
            let settings_version = client.get_app_settings_version().await?;
            println!("Program version: {}", version);
            println!("Settings version: {}", settings_version);
        }
        "4" | "check-installer" => {
            let settings = require_installer(app_config.installer())?;
            if let Err(failures) = settings.check_before_save() {
                report_failures(&failures);
                return Err(failures).context("Installer settings are incomplete");
            }
            println!("Installer settings are complete.");
        }
        _ => {
            println!("❌ Invalid choice. Please enter '1' (backup), '2' (restore), '3' (version) or '4' (check-installer).");
            anyhow::bail!("Invalid operation choice");
        }
    }
    Ok(())
}

/// Prompts user to select an operation
///
/// Returns the user's choice as String
fn prompt_choice() -> Result<String> {
    use std::io::{stdin, stdout, Write};

    println!("Select an operation:");
    println!("1. Take Backup (or type 'backup')");
    println!("2. Restore Backup (or type 'restore')");
    println!("3. Check Versions (or type 'version')");
    println!("4. Check Installer Settings (or type 'check-installer')");
    print!("Enter your choice: ");
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
