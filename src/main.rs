//! panel-uplink - control-plane uplink for a hosting panel
//!
//! This binary:
//! - Opens one WebSocket shard session per configured shard ID
//! - Polls the configured node IDs for reachability transitions
//! - Logs and counts the typed events both state machines emit
//! - Exposes health/ready endpoints and Prometheus metrics

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use panel_uplink::config::UplinkConfig;
use panel_uplink::events::{self, UplinkEvent};
use panel_uplink::health::{self, AppState};
use panel_uplink::metrics::{self, UplinkMetrics};
use panel_uplink::panel::{PanelClient, SessionSource};
use panel_uplink::shard::{Shard, ShardRegistry, WsConnector};
use panel_uplink::status::{NodeStatus, PollerHealth};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first to get log level
    let config = UplinkConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("panel_uplink={}", config.log_level).parse()?)
                .add_directive("tokio_tungstenite=info".parse()?)
                .add_directive("tungstenite=info".parse()?),
        )
        .json()
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        nodes = config.status.nodes.len(),
        shards = config.shard_ids.len(),
        "Starting panel uplink"
    );

    let uplink_metrics = Arc::new(UplinkMetrics::new());
    info!("Prometheus metrics initialized");

    let client = PanelClient::new(config.status.domain.clone(), config.status.auth.clone())?;
    let registry = ShardRegistry::new(config.shard_ids.iter().copied());
    let poller_health = Arc::new(PollerHealth::default());

    let (events_tx, mut events_rx) = events::channel();

    // Event consumer: the in-process subscriber to the uplink's event
    // surface. Logs transitions and counts emissions.
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            metrics::record_event(event.event_type());
            match &event {
                UplinkEvent::NodeConnect { node_id } => info!(node_id, "Node connected"),
                UplinkEvent::NodeDisconnect { node_id } => warn!(node_id, "Node disconnected"),
                UplinkEvent::Interval { attributes } => {
                    debug!(%attributes, "Interval snapshot")
                }
                UplinkEvent::RawPayload { shard_id, payload } => {
                    debug!(shard_id, %payload, "Raw shard payload")
                }
            }
        }
    });

    let (shutdown_tx, _) = broadcast::channel(1);

    // Shard sessions
    let mut shard_tasks = Vec::with_capacity(config.shard_ids.len());
    for &shard_id in &config.shard_ids {
        let session = client.fresh_session(shard_id).await?;
        let shard = Shard::new(
            shard_id,
            WsConnector,
            client.clone(),
            events_tx.clone(),
            registry.clone(),
        );
        let shutdown_rx = shutdown_tx.subscribe();

        shard_tasks.push(tokio::spawn(async move {
            if let Err(e) = shard.run(session, shutdown_rx).await {
                error!(shard_id, error = %e, "Shard task failed");
            }
        }));
    }

    info!(shard_count = shard_tasks.len(), "Shard sessions started");

    // Status poller
    let poller = NodeStatus::new(
        client.clone(),
        config.status.clone(),
        events_tx.clone(),
        Arc::clone(&poller_health),
    );
    let poller_task = {
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(poller.run(shutdown_rx))
    };

    // Health server
    let app_state = AppState {
        registry: registry.clone(),
        poller: Arc::clone(&poller_health),
        metrics: Arc::clone(&uplink_metrics),
    };

    let health_router = health::router(app_state);
    let addr: SocketAddr = ([0, 0, 0, 0], config.http_port).into();

    info!(port = config.http_port, "Starting HTTP server");

    let http_server = axum::serve(tokio::net::TcpListener::bind(addr).await?, health_router);

    tokio::select! {
        result = poller_task => {
            match result {
                Ok(Err(e)) => error!(error = %e, "Status poller failed"),
                _ => info!("Status poller finished"),
            }
        }
        result = http_server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    // Graceful shutdown
    info!("Shutting down uplink...");
    let _ = shutdown_tx.send(());

    for task in shard_tasks {
        let _ = task.await;
    }

    info!("Uplink shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
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
