//! Roadway device communication service (`comsrv`)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use comsrv::config::{AppConfig, DEFAULT_CONFIG_PATH};
use comsrv::sink::LoggingSink;
use comsrv::CommService;

/// Command-line arguments for comsrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "comsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Roadway Device Communication Service",
    long_about = None
)]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level or filter, overrides `logging.level`
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    validate: bool,

    /// Periodic tick in seconds, overrides `service.poll_interval_secs`
    #[arg(long)]
    poll_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(secs) = args.poll_interval {
        config.service.poll_interval_secs = secs;
        config.validate()?;
    }

    if args.validate {
        println!(
            "Configuration OK: {} links, {} controllers",
            config.links.len(),
            config.links.iter().map(|l| l.controllers.len()).sum::<usize>()
        );
        return Ok(());
    }

    let _log_guard = common::init_logging(&config.service.name, &config.logging)?;
    info!("Starting {} with {}", config.service.name, args.config.display());

    let cancel = CancellationToken::new();
    let signal_listener = common::shutdown::spawn_shutdown_listener(cancel.clone());

    let service = CommService::new(&config, Arc::new(LoggingSink), cancel.clone());
    service.start()?;
    let queued = service.submit_startup();
    info!("Queued {queued} startup operations");

    let mut tick = interval(Duration::from_secs(config.service.poll_interval_secs));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                service.submit_periodic();
            },
        }
    }

    service.shutdown().await;
    if let Err(e) = signal_listener.await {
        debug!("Shutdown listener ended abnormally: {e}");
    }
    info!("{} stopped", config.service.name);
    Ok(())
}
