//! Avlgate - AVL tracker ingestion gateway
//!
//! Binds one TCP port, negotiates the protocol family per connection and
//! appends decoded telemetry as JSONL.

use anyhow::Context;
use avlgate_core::config::GatewayConfig;
use avlgate_core::core::{FileStore, GatewayServer, Negotiator, WorkerSettings};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// AVL tracker ingestion gateway
#[derive(Parser, Debug)]
#[command(
    name = "avlgate",
    version,
    about = "TCP ingestion gateway for AVL vehicle trackers",
    long_about = None
)]
struct Cli {
    /// Config file path (defaults to the platform config directory)
    #[arg(short, long, env = "AVLGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding the config file
    #[arg(short, long, env = "AVLGATE_LISTEN")]
    listen: Option<String>,

    /// Output directory for JSONL files, overriding the config file
    #[arg(short, long, env = "AVLGATE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Verbose output (debug-level logging)
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(cli: &Cli, config: &GatewayConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if cli.verbose {
        "debug"
    } else {
        config.log.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    match &config.log.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "avlgate.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = GatewayConfig::load(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("loading configuration")?;
    if let Some(listen) = &cli.listen {
        config.listen = listen.clone();
    }
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = Some(data_dir.clone());
    }
    config.validate().map_err(|e| anyhow::anyhow!("{e}"))?;

    let _log_guard = init_logging(&cli, &config);
    tracing::info!("Starting avlgate v{}", env!("CARGO_PKG_VERSION"));

    let listen: SocketAddr = config
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {:?}", config.listen))?;

    let data_dir = config.resolved_data_dir();
    let store = FileStore::open(&data_dir, config.allowlist_path.as_deref())
        .await
        .with_context(|| format!("opening data dir {}", data_dir.display()))?;

    let negotiator = Negotiator::with_families(&config.protocols, config.gt06.strict_crc);
    let settings = WorkerSettings {
        queue_capacity: config.queue_capacity,
        verify_devices: config.verify_devices,
    };

    let server = GatewayServer::new(negotiator, Arc::new(store), settings);
    server.serve(listen).await.context("gateway listener")?;
    Ok(())
}
