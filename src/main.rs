#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! `dlschain` node entrypoint (systemd-friendly).
//!
//! Loads session configuration, wires up metrics, and keeps the process
//! alive. Byte transport between peers is an integrator concern (see
//! [`dlschain::transport`]); the full driver loop over an in-process
//! loopback transport lives in `src/bin/simulate.rs`.

use std::sync::Arc;

use axum::{routing::get, Router};
use dlschain::core::config::NodeConfig;
use dlschain::core::consensus::checkpoint::{CheckpointSink, FileCheckpointSink};
use dlschain::core::consensus::driver::PeerDriver;
use dlschain::core::signer::Sha256MacSigner;
use dlschain::monitoring::metrics::Metrics;
use tracing::{info, warn};

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

async fn serve_metrics(addr: String, metrics: Arc<Metrics>) {
    use prometheus::Encoder;

    let app = Router::new().route(
        "/metrics",
        get(move || {
            let metrics = Arc::clone(&metrics);
            async move {
                let encoder = prometheus::TextEncoder::new();
                let families = metrics.registry.gather();
                let mut buf = Vec::new();
                if encoder.encode(&families, &mut buf).is_err() {
                    return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, String::new());
                }
                (axum::http::StatusCode::OK, String::from_utf8_lossy(&buf).into_owned())
            }
        }),
    );

    match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => {
            info!(%addr, "metrics endpoint listening");
            if let Err(e) = axum::serve(listener, app).await {
                warn!(error = %e, "metrics server exited");
            }
        }
        Err(e) => warn!(error = %e, %addr, "failed to bind metrics endpoint"),
    }
}

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .compact()
        .try_init();

    let config_path = env("DLSCHAIN_CONFIG", "./node.toml");
    let config = match NodeConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config at {config_path}: {e}");
            std::process::exit(1);
        }
    };

    info!(
        my_id = config.session.my_id,
        peers = config.session.addrs.len(),
        channel_id = %config.session.channel_id,
        "dlschain node starting"
    );

    let metrics = Arc::new(Metrics::new().expect("metrics init failed"));

    let pubs = config.pubs().unwrap_or_else(|e| {
        eprintln!("failed to decode configured public keys: {e}");
        std::process::exit(1);
    });
    let sinks: Vec<Box<dyn CheckpointSink>> = config
        .backup
        .paths
        .iter()
        .map(|path| Box::new(FileCheckpointSink::new(path.clone())) as Box<dyn CheckpointSink>)
        .collect();

    // Rebuilding the driver here and recovering from `config.backup.paths` is
    // the crash-recovery lifecycle moment: a restarted process resumes the
    // active block's round-window state from whichever sink holds the
    // highest-round intact checkpoint, instead of starting over at round 0.
    let driver: PeerDriver<String, Sha256MacSigner> = PeerDriver::new(
        config.session.my_id,
        config.session.addrs.clone(),
        pubs,
        config.session.channel_id.clone(),
        config.session.start_round,
        Sha256MacSigner,
    )
    .with_metrics(Arc::clone(&metrics))
    .with_checkpoint_sinks(sinks);

    info!(
        block_no = driver.current_block_no(),
        round = driver.round(),
        "driver state ready (recovered from checkpoint if one existed)"
    );

    let metrics_task = config.metrics.listen_addr.clone().map(|addr| {
        let metrics = Arc::clone(&metrics);
        tokio::spawn(serve_metrics(addr, metrics))
    });

    info!("node ready; byte transport is an integrator concern, see src/bin/simulate.rs for an in-process run");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => warn!(error = %e, "failed to listen for shutdown signal"),
    }

    if let Some(task) = metrics_task {
        task.abort();
    }
}
