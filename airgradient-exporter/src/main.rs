//! Prometheus exporter for AirGradient air quality monitors.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use airgradient_exporter::config::parse_duration;
use airgradient_exporter::{
    AirGradientMetrics, ExporterConfig, HttpServer, HttpSource, Poller, init_tracing,
};

/// Prometheus exporter for AirGradient air quality monitors.
#[derive(Parser, Debug)]
#[command(name = "airgradient-exporter")]
#[command(about = "Export AirGradient measurements as Prometheus metrics")]
#[command(disable_version_flag = true)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// Time between measurements, e.g. "30s" or "1m" (overrides config).
    #[arg(long, value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// Address for the Prometheus server, e.g. ":9500" (overrides config).
    #[arg(long)]
    http_addr: Option<String>,

    /// URL to fetch AirGradient measurements from (overrides config).
    #[arg(long)]
    measurements_url: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Print version and exit.
    #[arg(short = 'v', long)]
    version: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.version {
        println!("airgradient-exporter {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load configuration; validated once the CLI overrides are applied
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path))?
    } else {
        ExporterConfig::default()
    };

    // CLI overrides
    if let Some(interval) = args.timeout {
        anyhow::ensure!(
            interval.subsec_nanos() == 0,
            "--timeout must be a whole number of seconds, got {:?}",
            interval
        );
        config.poll.interval_secs = interval.as_secs();
    }
    if let Some(addr) = args.http_addr {
        config.prometheus.listen = addr;
    }
    if let Some(url) = args.measurements_url {
        config.device.url = url;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    config.validate()?;
    init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        url = %config.device.url,
        interval = ?config.poll.interval(),
        "Starting AirGradient exporter"
    );

    let metrics = Arc::new(AirGradientMetrics::new(config.labels.policy));

    let source = HttpSource::new(config.device.url.clone())?;
    let poller = Poller::new(source, metrics.clone(), &config.poll);

    let listen_addr = config.prometheus.listen_addr()?;
    let http_server = HttpServer::new(
        metrics.clone(),
        listen_addr,
        config.prometheus.path.clone(),
    );
    let listener = http_server.bind().await?;

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut http_task = tokio::spawn(http_server.serve(listener, shutdown_rx.clone()));
    let mut poll_task = tokio::spawn(poller.run(shutdown_rx));

    // Exit on signal without draining in-flight scrapes or polls.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, exiting");
        }
        _ = terminate() => {
            info!("Received SIGTERM, exiting");
        }
        result = &mut http_task => {
            match result {
                Ok(Ok(())) => anyhow::bail!("HTTP server stopped unexpectedly"),
                Ok(Err(e)) => {
                    error!(error = %e, "HTTP server failed");
                    return Err(e.into());
                }
                Err(e) => return Err(anyhow::anyhow!("HTTP server task panicked: {}", e)),
            }
        }
        result = &mut poll_task => {
            return Err(poller_exit(result));
        }
    }

    let stats = metrics.stats();
    info!(
        successes = stats.successes,
        fetch_errors = stats.fetch_errors,
        decode_errors = stats.decode_errors,
        "Exporter stopped"
    );
    Ok(())
}

/// Error for a poll task that ended before shutdown was requested.
fn poller_exit(result: Result<(), tokio::task::JoinError>) -> anyhow::Error {
    match result {
        Ok(()) => {
            error!("Poller stopped unexpectedly");
            anyhow::anyhow!("Poller stopped unexpectedly")
        }
        Err(e) => {
            error!(error = %e, "Poller task panicked");
            anyhow::anyhow!("Poller task panicked: {}", e)
        }
    }
}

async fn terminate() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
