//! Node status poller
//!
//! Periodically probes the configured node IDs against the panel's
//! application API and reports per-node reachability transitions plus
//! per-cycle snapshots. Probes within a cycle are strictly sequential
//! with a cooperative delay between nodes, bounding load on the panel;
//! transient failures are retried in place up to the configured budget,
//! and authorization failures close the poller terminally.

use crate::config::StatusOptions;
use crate::error::UplinkError;
use crate::events::normalize::camel_case_keys;
use crate::events::{EventTx, UplinkEvent};
use crate::metrics::{record_error, record_probe, record_retry, set_nodes_connected};
use crate::panel::PanelTransport;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Shared snapshot of the poller's state for the health endpoints
#[derive(Debug)]
pub struct PollerHealth {
    ready: AtomicBool,
    connected: AtomicU64,
    api_ping_ms: AtomicI64,
}

impl PollerHealth {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn connected(&self) -> u64 {
        self.connected.load(Ordering::SeqCst)
    }

    /// Last measured application-API round-trip, -1 until measured
    pub fn api_ping_ms(&self) -> i64 {
        self.api_ping_ms.load(Ordering::SeqCst)
    }

    fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    fn set_connected(&self, count: u64) {
        self.connected.store(count, Ordering::SeqCst);
    }

    fn set_api_ping(&self, ping: Duration) {
        self.api_ping_ms.store(ping.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Default for PollerHealth {
    fn default() -> Self {
        Self {
            ready: AtomicBool::new(false),
            connected: AtomicU64::new(0),
            api_ping_ms: AtomicI64::new(-1),
        }
    }
}

/// The polling state machine
pub struct NodeStatus<T> {
    transport: T,
    options: StatusOptions,
    connected: HashSet<u64>,
    retries: u32,
    ping: Option<Duration>,
    ready_at: Option<Instant>,
    events: EventTx,
    health: Arc<PollerHealth>,
}

impl<T: PanelTransport> NodeStatus<T> {
    /// Build a poller from validated options. Validation has already
    /// happened in `StatusOptions::new`.
    pub fn new(
        transport: T,
        options: StatusOptions,
        events: EventTx,
        health: Arc<PollerHealth>,
    ) -> Self {
        Self {
            transport,
            options,
            connected: HashSet::new(),
            retries: 0,
            ping: None,
            ready_at: None,
            events,
            health,
        }
    }

    pub fn is_running(&self) -> bool {
        self.ready_at.is_some()
    }

    /// Last measured application-API round-trip
    pub fn ping(&self) -> Option<Duration> {
        self.ping
    }

    /// Start the poller: one root liveness probe, then one full poll
    /// cycle so the first observations are available before this
    /// resolves. Errors with AlreadyRunning on a second start.
    pub async fn connect(&mut self) -> Result<(), UplinkError> {
        if self.ready_at.is_some() {
            return Err(UplinkError::AlreadyRunning);
        }

        info!(nodes = self.options.nodes.len(), "Starting connection to panel API");
        self.ping_root().await?;
        self.run_cycle().await?;

        self.ready_at = Some(Instant::now());
        self.health.set_ready(true);

        Ok(())
    }

    /// Startup liveness probe against the application root. 401/403 is
    /// terminal; so is any response that neither succeeds nor carries
    /// the panel's recognizable errors payload.
    async fn ping_root(&mut self) -> Result<(), UplinkError> {
        let start = Instant::now();
        let response = self.transport.probe_root().await?;

        if response.status == 401 || response.status == 403 {
            return Err(self.fail(UplinkError::Unauthorized {
                status: response.status,
            }));
        }

        let ping = start.elapsed();
        self.ping = Some(ping);
        self.health.set_api_ping(ping);

        // An unauthenticated hit on the application root answers with a
        // non-empty errors array; that shape proves the API is there.
        let recognized = response
            .body
            .as_ref()
            .and_then(|body| body.get("errors"))
            .and_then(Value::as_array)
            .is_some_and(|errors| !errors.is_empty());

        if response.is_success() || recognized {
            debug!(ping_ms = ping.as_millis() as u64, "Panel API reachable");
            return Ok(());
        }

        Err(self.fail(UplinkError::ApiUnavailable))
    }

    /// One full poll cycle: every watched node in order, with the
    /// intra-cycle delay between consecutive nodes but not after the
    /// last. A cycle without transient failures clears the retry
    /// budget.
    async fn run_cycle(&mut self) -> Result<(), UplinkError> {
        let retries_before = self.retries;
        let nodes = self.options.nodes.clone();
        let last = nodes.len().saturating_sub(1);

        for (index, node_id) in nodes.into_iter().enumerate() {
            self.probe_node(node_id).await?;
            if index < last {
                tokio::time::sleep(self.options.next_interval).await;
            }
        }

        if self.retries == retries_before {
            self.retries = 0;
        }

        self.health.set_connected(self.connected.len() as u64);
        set_nodes_connected(self.connected.len());

        Ok(())
    }

    /// Probe one node, retrying transient failures in place within the
    /// retry budget.
    async fn probe_node(&mut self, node_id: u64) -> Result<(), UplinkError> {
        loop {
            debug!(node_id, "Fetching node status");

            let response = match self.transport.probe_node(node_id).await {
                Ok(response) => response,
                Err(err) => {
                    // No status to classify; treated as transient.
                    warn!(node_id, error = %err, "Probe transport error");
                    record_probe(node_id, "transient");
                    self.bump_retry(node_id)?;
                    continue;
                }
            };

            match response.status {
                401 | 403 => {
                    record_probe(node_id, "unauthorized");
                    return Err(self.fail(UplinkError::Unauthorized {
                        status: response.status,
                    }));
                }
                // Valid "resource absent" signal, never a transient error.
                404 => {
                    record_probe(node_id, "absent");
                    if self.connected.remove(&node_id) {
                        self.emit(UplinkEvent::NodeDisconnect { node_id });
                    }
                    return Ok(());
                }
                status if !response.is_success() => {
                    record_probe(node_id, "transient");
                    self.bump_retry(node_id)?;
                    debug!(node_id, status, "Attempting retry fetch");
                }
                _ => {
                    record_probe(node_id, "success");

                    let attributes = response
                        .body
                        .and_then(|mut body| body.get_mut("attributes").map(Value::take))
                        .map(camel_case_keys)
                        .unwrap_or(Value::Null);

                    if self.connected.insert(node_id) {
                        self.emit(UplinkEvent::NodeConnect { node_id });
                    }
                    self.emit(UplinkEvent::Interval { attributes });

                    return Ok(());
                }
            }
        }
    }

    fn bump_retry(&mut self, node_id: u64) -> Result<(), UplinkError> {
        if self.retries >= self.options.retry_limit {
            return Err(self.fail(UplinkError::RetryLimitExceeded {
                node_id,
                retries: self.retries,
                limit: self.options.retry_limit,
            }));
        }

        self.retries += 1;
        record_retry(node_id);
        Ok(())
    }

    fn emit(&self, event: UplinkEvent) {
        let _ = self.events.send(event);
    }

    /// The single close-with-error path: every terminal condition
    /// funnels through here before surfacing to the caller.
    fn fail(&mut self, err: UplinkError) -> UplinkError {
        error!(error = %err, "Status poller closing");
        record_error(err.error_type_label());
        self.close();
        err
    }

    /// Stop reporting. A no-op when the poller never started.
    pub fn close(&mut self) {
        if self.ready_at.is_none() {
            return;
        }

        debug!("Closing connection");
        self.ready_at = None;
        self.connected.clear();
        self.health.set_ready(false);
        self.health.set_connected(0);
    }

    /// Drive the poller: start, then repeat cycles on the call
    /// interval until a terminal failure or shutdown. A tick that
    /// fires while a slow cycle is still in flight is skipped, so
    /// cycles never overlap.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), UplinkError> {
        self.connect().await?;

        let mut timer = tokio::time::interval(self.options.call_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick resolves immediately; connect already ran a cycle.
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.run_cycle().await?;
                }
                _ = shutdown.recv() => {
                    info!("Status poller received shutdown signal");
                    self.close();
                    return Ok(());
                }
            }
        }
    }
}
