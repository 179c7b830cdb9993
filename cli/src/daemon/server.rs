// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Foreground dispatcher server
//!
//! Wires the in-memory dispatch runtime, starts the scheduler and health
//! monitor, and serves the HTTP API until Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use agv_dispatch_core::{
    application::DispatchRuntime,
    domain::{command::DispatchCommand, dispatch_config::DispatchConfigManifest},
    infrastructure::{command_channel::MpscCommandDispatcher, site_loader::SiteManifestParser},
    presentation::api::{app, AppState},
};

const COMMAND_BUFFER: usize = 1024;

pub async fn run_server(config_path: Option<PathBuf>, site_override: Option<PathBuf>) -> Result<()> {
    let config = DispatchConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;
    info!(name = %config.metadata.name, "Configuration loaded");

    let site = match site_override.or_else(|| config.spec.site_file.clone()) {
        Some(path) => Some(
            SiteManifestParser::parse_file(&path)
                .with_context(|| format!("Failed to load site manifest {:?}", path))?,
        ),
        None => {
            warn!("No site manifest configured; starting with an empty map and fleet");
            None
        }
    };

    if let Some(port) = config.spec.observability.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(port, "Prometheus exporter listening");
    }

    let (dispatcher, commands) = MpscCommandDispatcher::channel(COMMAND_BUFFER);
    let runtime = DispatchRuntime::in_memory(&config.spec, site.as_ref(), Arc::new(dispatcher))
        .await
        .context("Failed to initialize dispatch runtime")?;
    let drain = tokio::spawn(log_commands(commands));

    let scheduler = Arc::new(runtime.scheduler());
    let scheduler_token = scheduler.shutdown_token();
    let scheduler_handle = scheduler.start();

    let monitor = Arc::new(runtime.health_monitor());
    let monitor_token = monitor.shutdown_token();
    let monitor_handle = monitor.start();

    let state = Arc::new(AppState {
        dispatch: runtime.dispatch.clone(),
        locks: runtime.lock_manager.clone(),
        telemetry: runtime.telemetry.clone(),
        event_bus: runtime.event_bus.clone(),
        start_time: Instant::now(),
    });

    let addr = format!("{}:{}", config.spec.api.host, config.spec.api.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Dispatcher listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Dispatcher shutting down");
    scheduler_token.cancel();
    monitor_token.cancel();
    if let Err(e) = scheduler_handle.await {
        error!("Scheduler task failed: {}", e);
    }
    if let Err(e) = monitor_handle.await {
        error!("Health monitor task failed: {}", e);
    }
    drain.abort();

    Ok(())
}

/// Outbound commands go to the messaging bridge; the daemon logs them.
async fn log_commands(mut commands: mpsc::Receiver<DispatchCommand>) {
    while let Some(command) = commands.recv().await {
        match serde_json::to_string(&command) {
            Ok(payload) => info!(agv = %command.agv_code, task_id = %command.task_id, %payload, "Outbound command"),
            Err(e) => warn!(agv = %command.agv_code, "Failed to encode command: {}", e),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
