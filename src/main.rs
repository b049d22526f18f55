//! Proxy Log Forwarder - correlates proxy and VPN gateway access logs
//!
//! This service tails the forward proxy's access log and the VPN gateway's
//! access log, joins each proxied connection to the gateway user that opened
//! it, and posts the result to a collector API.
//!
//! ## Features
//!
//! - Tailing of files (with rotation handling) or log commands
//! - Identity correlation within a configurable time window
//! - HTTP delivery with bounded retries and dead letters
//! - Graceful shutdown on SIGINT/SIGTERM
//!
//! ## Configuration
//!
//! Configuration is loaded from `PROXYLOG_*` environment variables, see
//! `Config::from_env` for the full list. The most common ones:
//!
//! - `PROXYLOG_PROXY_LOG_PATH`: proxy access log (default: /var/log/squid/access.log)
//! - `PROXYLOG_GATEWAY_LOG_PATH`: gateway access log (default: /var/log/xray/access.log)
//! - `PROXYLOG_COLLECTOR_URL`: collector endpoint (default: http://localhost:8000/api/v1/proxylog/)
//! - `PROXYLOG_CORRELATION_WINDOW_SECS`: correlation window (default: 5)
//! - `RUST_LOG`: Logging level filter (default: info)

use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use proxylog_forwarder::config::Config;
use proxylog_forwarder::pipeline::Pipeline;

/// Interval between progress reports
const REPORT_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with environment filter
    init_tracing();

    info!("Starting Proxy Log Forwarder...");

    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                proxy_source = %config.proxy_source,
                gateway_source = %config.gateway_source,
                collector_url = %config.collector_url,
                window_secs = config.correlation_window.as_secs(),
                max_retries = config.max_retries,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let pipeline = match Pipeline::new(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!(error = %e, "Failed to build pipeline");
            std::process::exit(1);
        }
    };

    pipeline.start().await;
    info!("Proxy Log Forwarder running. Press Ctrl+C to stop.");

    let mut ticker = interval(REPORT_INTERVAL);
    // Skip the first immediate tick
    ticker.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let stats = pipeline.stats();
                info!(
                    proxy_lines = stats.proxy_lines,
                    gateway_lines = stats.gateway_lines,
                    parse_failures = stats.parse_failures,
                    correlated = stats.correlated,
                    unmatched_dropped = stats.unmatched_dropped,
                    delivered = stats.delivered,
                    delivery_failures = stats.delivery_failures,
                    dead_lettered = stats.dead_lettered,
                    "Forwarder progress"
                );
            }
        }
    }

    // Graceful shutdown
    info!("Initiating graceful shutdown...");
    pipeline.stop().await;
    info!("Proxy Log Forwarder stopped");
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Resolve on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Shutdown signal received, stopping..."),
        _ = terminate => info!("SIGTERM received, stopping..."),
    }
}
