// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use axum::{routing::get, Router};
use namespace_manager::{
    alerts::AlertGateway,
    config::Config,
    constants::{
        EXIT_CONFIGURATION, EXIT_LEADER_ELECTION, EXIT_OK, EXIT_RUNTIME,
        METRICS_SERVER_BIND_ADDRESS, METRICS_SERVER_PATH, METRICS_SERVER_PORT,
        TOKIO_WORKER_THREADS,
    },
    controllers::{ActionController, CollectController},
    kubernetes::KubeGateway,
    leader::{self, LeaderArbiter},
    metrics,
    notifier::Notifier,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

fn main() {
    // Build Tokio runtime with custom thread names
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("namespace-manager")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to build runtime: {err}");
            std::process::exit(EXIT_RUNTIME);
        }
    };

    let code = runtime.block_on(async_main());
    std::process::exit(code);
}

/// Initialize logging with custom format
///
/// Respects `RUST_LOG` environment variable if set, otherwise defaults to INFO level.
/// Respects `RUST_LOG_FORMAT` environment variable for output format (json or text).
fn initialize_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    info!("Starting Namespace Manager");
}

/// Start the Prometheus metrics HTTP server
///
/// Serves metrics on the configured port and path (default: 0.0.0.0:8080/metrics)
fn start_metrics_server() -> tokio::task::JoinHandle<()> {
    info!(
        bind_address = METRICS_SERVER_BIND_ADDRESS,
        port = METRICS_SERVER_PORT,
        path = METRICS_SERVER_PATH,
        "Starting Prometheus metrics HTTP server"
    );

    tokio::spawn(async move {
        async fn metrics_handler() -> String {
            match metrics::gather_metrics() {
                Ok(metrics_text) => metrics_text,
                Err(e) => {
                    error!("Failed to gather metrics: {}", e);
                    String::from("# Error gathering metrics\n")
                }
            }
        }

        let app = Router::new().route(METRICS_SERVER_PATH, get(metrics_handler));

        let bind_addr = format!("{METRICS_SERVER_BIND_ADDRESS}:{METRICS_SERVER_PORT}");
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind metrics server to {bind_addr}: {e}");
                return;
            }
        };

        info!("Metrics server listening on http://{bind_addr}{METRICS_SERVER_PATH}");

        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {e}");
        }
    })
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            result.map_err(anyhow::Error::from)
        }
        result = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate())?;
                sigterm.recv().await;
                Ok::<(), anyhow::Error>(())
            }
            #[cfg(not(unix))]
            {
                // On non-Unix platforms, just wait forever
                std::future::pending::<()>().await;
                Ok::<(), anyhow::Error>(())
            }
        } => {
            info!("Received SIGTERM (pod termination), initiating graceful shutdown...");
            result
        }
    }
}

async fn async_main() -> i32 {
    initialize_logging();

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(err) => {
            error!("Configuration error: {err:#}");
            return EXIT_CONFIGURATION;
        }
    };
    info!(
        rules = config.namespaces.len(),
        leader_election = config.leader_election.enabled,
        "Configuration loaded"
    );

    let arbiter = if config.leader_election.enabled {
        match LeaderArbiter::new(&config.leader_election.path, config.leader_election.lease_ttl) {
            Ok(arbiter) => Arc::new(arbiter),
            Err(err) => {
                error!("Leader election infrastructure failure: {err}");
                return EXIT_LEADER_ELECTION;
            }
        }
    } else {
        warn!("Leader election DISABLED - running without high availability");
        Arc::new(LeaderArbiter::disabled())
    };
    debug!(identity = arbiter.identity(), "Leader identity resolved");

    let gateway = match KubeGateway::connect(&config.context.namespace).await {
        Ok(gateway) => gateway,
        Err(err) => {
            error!("Failed to initialize Kubernetes client: {err:#}");
            return EXIT_RUNTIME;
        }
    };

    let alert_gateway = match AlertGateway::new(&config.prometheus) {
        Ok(alerts) => alerts,
        Err(err) => {
            error!("Failed to initialize Prometheus gateway: {err:#}");
            return EXIT_RUNTIME;
        }
    };

    let notifier = match Notifier::new(&config.notifier) {
        Ok(notifier) => Arc::new(notifier),
        Err(err) => {
            error!("Failed to initialize notifier: {err:#}");
            return EXIT_RUNTIME;
        }
    };

    let _metrics_handle = if config.metrics.enabled {
        Some(start_metrics_server())
    } else {
        None
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let renewal_handle = tokio::spawn(leader::run_renewal(arbiter.clone(), shutdown_rx.clone()));

    let collect = CollectController::new(
        config.clone(),
        gateway.clone(),
        alert_gateway,
        arbiter.clone(),
    );
    let collect_rx = shutdown_rx.clone();
    let collect_handle = tokio::spawn(async move { collect.run(collect_rx).await });

    let action = ActionController::new(config.clone(), gateway, notifier, arbiter.clone());
    let action_rx = shutdown_rx.clone();
    let action_handle = tokio::spawn(async move { action.run(action_rx).await });

    info!("Controllers started, waiting for leadership and work");

    if let Err(err) = shutdown_signal().await {
        error!("Signal handling failed: {err}");
        let _ = shutdown_tx.send(true);
        return EXIT_RUNTIME;
    }

    info!("Stopping controllers and releasing leader lease...");
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(collect_handle, action_handle, renewal_handle);

    info!("Graceful shutdown completed successfully");
    EXIT_OK
}
