//! rdp-vchan-runtime - RDP client-side virtual channel runtime.
//!
//! Entry point for the standalone binary: loads configuration, builds the
//! addin registry, and starts the virtual-channel session. The actual RDP
//! wire transport (TLS, NLA, PDU framing) is supplied by the embedding RDP
//! client via [`rdp_vchan_runtime::transport::VirtualChannelTransport`];
//! this binary only demonstrates wiring the runtime up against it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rdp_vchan_runtime::addin::Registry;
use rdp_vchan_runtime::config::Config;

/// Command-line arguments for rdp-vchan-runtime.
#[derive(Parser, Debug)]
#[command(name = "rdp-vchan-runtime")]
#[command(version, about = "RDP client-side virtual channel runtime", long_about = None)]
pub struct Args {
    /// Configuration file path.
    #[arg(short, long, default_value = "/etc/rdp-vchan-runtime/config.toml")]
    pub config: String,

    /// Force inline (non-worker-task) dispatch for every channel.
    #[arg(long)]
    pub disable_threads: bool,

    /// Verbose logging (can be specified multiple times).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format override (json|pretty|compact).
    #[arg(long)]
    pub log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config).or_else(|err| {
        tracing::warn!("failed to load config: {err}, using defaults");
        Config::default_config()
    })?;
    if let Some(format) = &args.log_format {
        config.logging.format = format.clone();
    }
    if args.disable_threads {
        config = config.with_overrides(Some(true));
    }
    config.validate()?;

    init_logging(&config.logging, args.verbose)?;
    info!("starting rdp-vchan-runtime v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!(?config, "configuration loaded");

    // No addins are statically linked into this binary; a real deployment
    // populates this table at build time, or relies entirely on dynamic
    // discovery under `config.addin.dynamic_search_path`.
    let _registry = Arc::new(Registry::new(HashMap::new(), HashSet::new()));
    info!(
        channels = config.channels.definitions.len(),
        addin_path = %config.addin.dynamic_search_path.display(),
        "addin registry ready"
    );

    // No real transport is available outside an embedding RDP client;
    // RuntimeSession::new is exercised against `transport::mock::MockTransport`
    // in this crate's own test suite.
    info!("waiting for shutdown signal");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, exiting");

    Ok(())
}

fn init_logging(logging: &rdp_vchan_runtime::config::LoggingConfig, verbose: u8) -> Result<()> {
    let log_level = match verbose {
        0 => logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("rdp_vchan_runtime={log_level},warn")));

    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(dir) = &logging.log_dir {
        let file_appender = tracing_appender::rolling::daily(dir, "rdp-vchan-runtime.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leaked deliberately: the guard must outlive every log call made by
        // this process, and this function only runs once at startup.
        std::mem::forget(guard);
        registry.with(tracing_subscriber::fmt::layer().with_writer(non_blocking).json()).init();
        return Ok(());
    }

    match logging.format.as_str() {
        "json" => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        "compact" => registry.with(tracing_subscriber::fmt::layer().compact()).init(),
        _ => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
    }

    Ok(())
}
