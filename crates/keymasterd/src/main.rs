//! keymasterd entry point

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use keymaster_common::KeymasterError;
use keymasterd::config::DEFAULT_CONFIG_PATH;
use keymasterd::{Applier, KeymasterConfig, Reconciler, ReconcilerOptions, Supplier};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// sysexits.h EX_CONFIG
const EX_CONFIG: u8 = 78;

/// WireGuard interface reconciliation daemon
#[derive(Parser, Debug)]
#[command(name = "keymasterd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Run a single reconciliation pass and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "keymasterd: Starting"
    );

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "keymasterd: Exiting with error");
            ExitCode::from(exit_status_for(&e))
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

fn exit_status_for(e: &anyhow::Error) -> u8 {
    match e.downcast_ref::<KeymasterError>() {
        Some(k) if k.is_config_error() => EX_CONFIG,
        _ => 1,
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config = KeymasterConfig::load(&args.config)?.validate()?;
    info!(
        sync_period_secs = config.sync_period.as_secs(),
        max_concurrent_applies = config.max_concurrent_applies,
        "keymasterd: Configuration loaded"
    );

    let supplier = Supplier::from_config(&config.supplier).context("creating supplier")?;
    let applier = Applier::from_config(&config.applier);
    let mut reconciler = Reconciler::new(
        supplier,
        applier,
        ReconcilerOptions {
            private_key_override: config.private_key,
            max_concurrent_applies: config.max_concurrent_applies,
        },
    );

    if args.once {
        let report = reconciler.run_pass().await;
        if report.is_success() {
            return Ok(ExitCode::SUCCESS);
        }
        warn!(
            outcome = ?report.outcome,
            failed = report.failed.len(),
            "keymasterd: Pass did not succeed"
        );
        return Ok(ExitCode::FAILURE);
    }

    let shutdown = setup_signal_handlers().context("installing signal handlers")?;
    reconciler.run(config.sync_period, shutdown).await;

    info!("keymasterd: Graceful shutdown complete");
    Ok(ExitCode::SUCCESS)
}

/// SIGINT and SIGTERM both flip the returned receiver to `true`.
fn setup_signal_handlers() -> std::io::Result<watch::Receiver<bool>> {
    let (tx, rx) = watch::channel(false);
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("keymasterd: Received SIGINT"),
            _ = sigterm.recv() => info!("keymasterd: Received SIGTERM"),
        }
        // the loop may already be gone
        let _ = tx.send(true);
    });

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["keymasterd"]);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(args.log_level, "info");
        assert!(!args.once);

        let args = Args::parse_from(["keymasterd", "-c", "/tmp/k.toml", "-l", "debug", "--once"]);
        assert_eq!(args.config, PathBuf::from("/tmp/k.toml"));
        assert!(args.once);
    }

    #[test]
    fn test_exit_codes() {
        let config = anyhow::Error::new(KeymasterError::invalid_config(
            "sync_period_secs",
            "must be > 0",
        ));
        assert_eq!(exit_status_for(&config), EX_CONFIG);

        let wrapped = anyhow::Error::new(KeymasterError::invalid_config("supplier", "missing"))
            .context("loading");
        assert_eq!(exit_status_for(&wrapped), EX_CONFIG);

        let other = anyhow::Error::new(KeymasterError::internal("boom"));
        assert_eq!(exit_status_for(&other), 1);
    }
}
