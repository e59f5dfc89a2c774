//! CLI entry point.
//!
//! Grounded on `dwctl::main`'s `shutdown_signal()` (ctrl_c + SIGTERM via
//! `tokio::select!`) and its clap-driven startup. The `--async` flag picks
//! between a multi-thread cooperative runtime and a current-thread "blocking"
//! runtime wrapping the same scan loop, mirroring the source's
//! `start_async()` vs. `start()` entry points.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use pysentinel::config::RawConfig;
use pysentinel::Scanner;

#[derive(Parser, Debug)]
#[command(name = "pysentinel", version, about = "Threshold-based alerting scanner")]
struct Args {
    /// Path to the YAML or JSON configuration file.
    config: String,

    /// Run on the cooperative (multi-thread) async runtime instead of the
    /// default blocking (current-thread) wrapper.
    #[arg(long = "async")]
    async_mode: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let runtime = if args.async_mode {
        tokio::runtime::Builder::new_multi_thread().enable_all().build()
    } else {
        tokio::runtime::Builder::new_current_thread().enable_all().build()
    };
    let runtime = match runtime {
        Ok(rt) => rt,
        Err(error) => {
            eprintln!("failed to start runtime: {error}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::from(0),
        Err(error) => {
            eprintln!("pysentinel: {error}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = RawConfig::load(&args.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.global.log_level)),
        )
        .init();

    tracing::info!(config = %config.redacted(), "loaded configuration");

    let datasources = config.build_datasources()?;
    let channels = config.build_channels()?;
    let alerts = config.alert_definitions();
    let ledger = Arc::new(pysentinel::ledger::SqliteRunLedger::open("alerts.db").await?);

    let scanner = Arc::new(Scanner::new(
        alerts,
        datasources,
        channels,
        ledger,
        i64::from(config.global.alert_cooldown_minutes) * 60,
        1000,
    ));

    scanner.start().await;
    tracing::info!("scanner started");

    shutdown_signal().await;

    tracing::info!("shutdown signal received, stopping scanner");
    scanner.stop().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
