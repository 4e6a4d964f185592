//! Field-bus cycle service binary
//!
//! Loads the YAML configuration, builds the channel registry, bridge and
//! cycle scheduler, and runs the fixed-period loop until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use flux_channel::ChannelRegistry;

use fieldsrv::config::{build_bridge, FieldSrvConfig, DEFAULT_CONFIG_PATH};
use fieldsrv::cycle::CycleScheduler;

#[derive(Parser, Debug)]
#[command(name = "fieldsrv", about = "FluxEMS field-bus cycle service")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "FIELDSRV_CONFIG")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "FIELDSRV_LOG_LEVEL")]
    log_level: String,

    /// Log to daily-rotated files in this directory instead of the console
    #[arg(long, env = "FIELDSRV_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    validate: bool,
}

/// Initialize tracing with console or rolling-file output
///
/// Returns the appender guard; dropping it flushes buffered log lines.
fn init_logging(args: &Args) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fieldsrv={0},flux_channel={0}", args.log_level)));

    if let Some(log_dir) = &args.log_dir {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("creating log directory {}", log_dir.display()))?;
        let appender = tracing_appender::rolling::daily(log_dir, "fieldsrv.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Ok(Some(guard))
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        Ok(None)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&args)?;

    info!(
        started_at = %chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "fieldsrv starting"
    );

    let config = FieldSrvConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if args.validate {
        // Channel registration and element binding run the full
        // activation-time validation.
        let registry = ChannelRegistry::new();
        build_bridge(&config, &registry).context("validating device layout")?;
        println!(
            "{}",
            serde_yaml::to_string(&config).context("rendering effective configuration")?
        );
        info!("configuration is valid");
        return Ok(());
    }

    let registry = Arc::new(ChannelRegistry::new());
    let bridge = build_bridge(&config, &registry).context("building protocol bridge")?;
    let mut scheduler = CycleScheduler::new(config.cycle_period(), registry, bridge)
        .context("building cycle scheduler")?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal_token.cancel();
        }
    });

    scheduler.run(shutdown).await;
    Ok(())
}
