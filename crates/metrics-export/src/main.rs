mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{error, info, warn};
use metrics_engine::{CsvDirectorySink, Orchestrator, RunReport, Window};
use tokio_util::sync::CancellationToken;
use zabbix_client::SessionManager;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "metrics-export")]
#[command(about = "Export per-host min/max/avg metrics from one or more Zabbix servers")]
#[command(version)]
struct Cli {
    /// Config file; `config.toml` in the working directory is used if present
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Length of the reporting window in days
    #[arg(long)]
    days: Option<u32>,

    /// Directory receiving `<tenant>/<host>.csv`
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Where to write the JSON run report (default: `<output>/run-report.json`)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, default_value = "false")]
    debug: bool,
}

/// Cancel the run on timeout or Ctrl-C, whichever comes first.
fn spawn_deadline(cancel: CancellationToken, timeout: Duration) {
    tokio::spawn(async move {
        let interrupted = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(timeout) => {
                warn!("Run exceeded {}s, cancelling remaining work", timeout.as_secs());
            }
            _ = interrupted => {
                warn!("Interrupted, cancelling remaining work");
            }
        }
        cancel.cancel();
    });
}

async fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(report)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("Run report written to {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(days) = cli.days {
        config.lookback_days = days;
    }
    if let Some(output) = cli.output {
        config.output_dir = output;
    }
    config.validate()?;
    let tenants = config.tenants(|name| std::env::var(name).ok())?;

    let now = Utc::now();
    let window = Window::last_days(now, config.lookback_days);
    info!(
        "Exporting {} days for {} tenants into {}",
        config.lookback_days,
        tenants.len(),
        config.output_dir.display()
    );

    let cancel = CancellationToken::new();
    spawn_deadline(cancel.clone(), config.run_timeout());

    let orchestrator = Orchestrator::new(
        SessionManager::new(config.session_config()),
        Arc::new(config.catalog()),
        Arc::new(CsvDirectorySink::new(&config.output_dir)),
        config.run_settings(),
    )
    .with_cancellation(cancel.clone());
    let report = orchestrator.run(&tenants, window, now).await;
    cancel.cancel();

    report.log_summary();
    let report_path = cli
        .report
        .unwrap_or_else(|| config.output_dir.join("run-report.json"));
    write_report(&report_path, &report).await?;

    if !report.any_completed() {
        bail!("no tenant completed successfully");
    }
    Ok(())
}
