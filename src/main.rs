//! memcached-operator - keeps memcached + mcrouter clusters converged with
//! Memcached custom resources.
//!
//! This is the main entry point that:
//! - Parses options and initializes structured logging
//! - Creates the Kubernetes client
//! - Starts the health server, the watch dispatcher and the periodic reconciler
//! - Stops the loops cooperatively on SIGTERM or SIGINT

use std::sync::Arc;

use clap::Parser;
use kube::{Client, CustomResourceExt};
use tokio::signal;
use tracing::{error, info, warn};

use memcached_operator::config::{LogFormat, OperatorOpt};
use memcached_operator::crd::Memcached;
use memcached_operator::health::{HealthState, run_health_server};
use memcached_operator::{Context, KubeApi, Shutdown, run_operator};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = OperatorOpt::parse();

    if opt.print_crd {
        println!("{}", serde_json::to_string_pretty(&Memcached::crd())?);
        return Ok(());
    }

    // Initialize tracing subscriber
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("memcached_operator=info".parse()?)
        .add_directive("kube=info".parse()?);
    match opt.log_format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    info!("Starting memcached-operator");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Create shared health state
    let health_state = Arc::new(HealthState::new());

    // Start health server immediately so probes answer during startup
    let health_handle = {
        let health_state = health_state.clone();
        let port = opt.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let ctx = Arc::new(Context::new(
        KubeApi::new(client),
        opt.settings(),
        Some(health_state.clone()),
    ));
    let shutdown = Shutdown::new();
    let handles = run_operator(ctx, shutdown.clone()).await;
    let mut watch_handle = handles.watch;
    let mut resync_handle = handles.resync;

    // Wait for any task to complete (or fail), or shutdown signal
    tokio::select! {
        result = &mut watch_handle => {
            if let Err(e) = result {
                error!("Watch dispatcher task panicked: {}", e);
            }
        }
        result = &mut resync_handle => {
            if let Err(e) = result {
                error!("Periodic reconciler task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        // Handle graceful shutdown on SIGTERM or SIGINT
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            // Mark as not ready to stop receiving new work
            health_state.set_ready(false).await;
            shutdown.trigger();

            let grace = opt.shutdown_grace();
            info!("Waiting up to {}s for both loops to stop...", grace.as_secs());
            let stopped = tokio::time::timeout(grace, async {
                let _ = (&mut watch_handle).await;
                let _ = (&mut resync_handle).await;
            })
            .await;
            if stopped.is_err() {
                warn!("Grace period elapsed before loops stopped");
                watch_handle.abort();
                resync_handle.abort();
            }
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Signal handler setup failures are fatal: the operator cannot shut down
/// gracefully without them.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
