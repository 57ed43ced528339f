//! Sky Quality Meter logger with a JSON web interface
//!
//! Polls one serial-attached SQM on a dedicated thread and serves the
//! readings over HTTP.

mod api;
mod averager;
mod cli;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use sqm_core::prelude::*;
use sqm_core::protocol::list_ports;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::api::{create_routes, AppState};
use crate::averager::spawn_averager;
use crate::cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init("info")?;

    if args.list_ports {
        for port in list_ports() {
            match &port.product {
                Some(product) => println!("{}\t{}", port.name, product),
                None => println!("{}", port.name),
            }
        }
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => SqmConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SqmConfig::default(),
    };
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    info!(
        version = sqm_core::VERSION,
        port = %config.port,
        baud_rate = config.baud_rate,
        "starting SQM monitor"
    );

    let store = Arc::new(match &config.log_file {
        Some(path) => Store::with_log(config.retention_capacity, path),
        None => Store::new(config.retention_capacity),
    });

    let link = SerialLink::new(config.link_config());
    let poller = Poller::new(link, Arc::clone(&store), config.poller_config());
    let stop = poller.stop_handle();
    let state = AppState::new(
        Arc::clone(&store),
        poller.status_handle(),
        AverageHistory::new(config.average_history),
    );
    let poll_thread = spawn_poller(poller)?;
    let averager = spawn_averager(state.clone(), config.average_interval());

    let addr = SocketAddr::from(([0, 0, 0, 0], args.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "web interface listening");

    axum::serve(listener, create_routes(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("web server failed")?;

    info!("shutting down");
    averager.abort();
    stop.stop();
    // One in-flight read can block for up to the reply timeout
    match tokio::task::spawn_blocking(move || poll_thread.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => error!("poller thread panicked"),
        Err(e) => error!(error = %e, "failed to join poller thread"),
    }
    if let Err(e) = store.persist() {
        warn!(error = %e, "final flush of the record log failed");
    }
    info!("shutdown complete");
    Ok(())
}

/// Run the poll loop on its own OS thread. The web server keeps serving
/// stale data after the loop gives up.
fn spawn_poller(mut poller: Poller) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("sqm-poller".into())
        .spawn(move || {
            if let Err(e) = poller.run() {
                error!(error = %e, "polling halted, serving stale data");
            }
        })
        .context("spawning poller thread")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
