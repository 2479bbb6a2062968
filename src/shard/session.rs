//! Shard session state machine
//!
//! One logical session over the panel's WebSocket control plane. The
//! shard opens the channel, treats the first inbound frame as the auth
//! handshake trigger, measures round-trip latency on auth success,
//! replaces its token and channel transparently when the panel signals
//! token expiry, and forwards unrecognized payloads to the event
//! surface. All state is mutated only by the owning run loop.

use crate::error::UplinkError;
use crate::events::{EventTx, UplinkEvent};
use crate::metrics::{record_shard_message, record_shard_reconnect, set_shard_ping};
use crate::panel::{SessionDescriptor, SessionSource};
use crate::shard::socket::{
    SocketCommand, SocketConnector, SocketEvent, CLOSE_CODE_DISCONNECT, CLOSE_CODE_RECONNECT,
};
use crate::shard::state::ShardRegistry;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Connection state of one shard session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardStatus {
    /// No channel open
    Closed,
    /// Channel open, waiting for the priming frame
    Connecting,
    /// Authenticated session
    Connected,
    /// Session refresh in flight after a credential expiry
    Reconnecting,
}

impl ShardStatus {
    /// True while the session may transmit frames
    pub fn is_open(&self) -> bool {
        matches!(self, ShardStatus::Connecting | ShardStatus::Connected)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ShardStatus::Connected)
    }
}

/// One WebSocket shard session
pub struct Shard<C, S> {
    id: u64,
    token: Option<String>,
    status: ShardStatus,
    channel: Option<mpsc::UnboundedSender<SocketCommand>>,
    inbound: Option<mpsc::UnboundedReceiver<SocketEvent>>,
    ready_at: Option<Instant>,
    last_ping_sent: Option<Instant>,
    ping: Option<Duration>,
    connector: C,
    sessions: S,
    events: EventTx,
    registry: ShardRegistry,
}

impl<C: SocketConnector, S: SessionSource> Shard<C, S> {
    pub fn new(
        id: u64,
        connector: C,
        sessions: S,
        events: EventTx,
        registry: ShardRegistry,
    ) -> Self {
        Self {
            id,
            token: None,
            status: ShardStatus::Closed,
            channel: None,
            inbound: None,
            ready_at: None,
            last_ping_sent: None,
            ping: None,
            connector,
            sessions,
            events,
            registry,
        }
    }

    pub fn status(&self) -> ShardStatus {
        self.status
    }

    /// Last measured auth round-trip, unset until the first handshake
    pub fn ping(&self) -> Option<Duration> {
        self.ping
    }

    fn set_status(&mut self, status: ShardStatus) {
        self.status = status;
        self.registry.set_status(self.id, status);
    }

    /// Open a new channel for the given session. Allowed only from
    /// Closed or Reconnecting; otherwise a logged no-op, guarding
    /// against duplicate opens.
    pub async fn connect(&mut self, session: SessionDescriptor) -> Result<(), UplinkError> {
        if !matches!(self.status, ShardStatus::Closed | ShardStatus::Reconnecting) {
            debug!(shard_id = self.id, status = ?self.status, "Connect ignored: channel already open");
            return Ok(());
        }

        let handle = self.connector.open(self.id, &session.socket_url).await?;

        // Old channel ends (if any) are dropped here wholesale.
        self.token = Some(session.token);
        self.channel = Some(handle.commands);
        self.inbound = Some(handle.events);
        self.set_status(ShardStatus::Connecting);

        Ok(())
    }

    /// Fetch a fresh session descriptor, close the current channel with
    /// the reconnect code, and connect again with the new token. A
    /// logged no-op when a reconnect is already in flight, guarding
    /// against reentrant triggers from overlapping expiry signals.
    pub async fn reconnect(&mut self) -> Result<(), UplinkError> {
        if self.status == ShardStatus::Reconnecting {
            debug!(shard_id = self.id, "Reconnect already in progress");
            return Ok(());
        }

        self.set_status(ShardStatus::Reconnecting);
        info!(shard_id = self.id, "Reconnecting shard session");

        let session = self.sessions.fresh_session(self.id).await?;

        if let Some(channel) = &self.channel {
            let _ = channel.send(SocketCommand::Close {
                code: CLOSE_CODE_RECONNECT,
                reason: "uplink::reconnect",
            });
        }

        record_shard_reconnect(self.id);
        self.connect(session).await
    }

    /// Close the channel and clear session state. A no-op when the
    /// shard never became ready.
    pub fn disconnect(&mut self) {
        if self.ready_at.is_none() {
            return;
        }

        if let Some(channel) = self.channel.take() {
            let _ = channel.send(SocketCommand::Close {
                code: CLOSE_CODE_DISCONNECT,
                reason: "uplink::disconnect",
            });
        }

        self.ready_at = None;
        self.last_ping_sent = None;
        self.ping = None;
        self.token = None;
        self.set_status(ShardStatus::Closed);

        info!(shard_id = self.id, "Shard disconnected");
    }

    /// Transmit an event frame. Non-array payloads are wrapped into a
    /// one-element array before transmission. Errors when no channel is
    /// open.
    pub fn send(&self, event: &str, args: Value) -> Result<(), UplinkError> {
        let channel = self
            .channel
            .as_ref()
            .ok_or(UplinkError::ChannelClosed { shard_id: self.id })?;

        let args = if args.is_array() {
            args
        } else {
            Value::Array(vec![args])
        };

        let frame = json!({ "event": event, "args": args }).to_string();

        channel
            .send(SocketCommand::Send(frame))
            .map_err(|_| UplinkError::ChannelClosed { shard_id: self.id })
    }

    fn handle_open(&self) {
        debug!(shard_id = self.id, "Socket connected");
    }

    /// Dispatch one inbound frame.
    ///
    /// The first frame after entering Connecting doubles as the auth
    /// handshake trigger regardless of content: the panel always sends
    /// exactly one priming frame before real traffic, so collapsing
    /// "hello" and "authenticate" saves a round trip and a state.
    pub async fn handle_message(&mut self, raw: &str) -> Result<(), UplinkError> {
        if raw.is_empty() {
            debug!(shard_id = self.id, "Received a malformed packet");
            return Ok(());
        }

        if self.status == ShardStatus::Connecting {
            self.set_status(ShardStatus::Connected);
            self.last_ping_sent = Some(Instant::now());
            let token = self.token.clone().unwrap_or_default();
            return self.send("auth", Value::String(token));
        }

        let payload: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(_) => {
                debug!(shard_id = self.id, "Received a malformed packet");
                return Ok(());
            }
        };

        self.registry.record_message(self.id);
        record_shard_message(self.id);

        match payload.get("event").and_then(Value::as_str) {
            Some("auth success") => {
                if let Some(sent) = self.last_ping_sent {
                    let ping = sent.elapsed();
                    self.ping = Some(ping);
                    self.registry.set_ping(self.id, ping);
                    set_shard_ping(self.id, ping);
                }
                self.ready_at = Some(Instant::now());
                info!(shard_id = self.id, "Shard authenticated");
            }
            // The panel warns ahead of expiry; renewal happens on the
            // expired signal.
            Some("token expiring") => {}
            Some("token expired") => {
                self.reconnect().await?;
            }
            _ => {
                let _ = self.events.send(UplinkEvent::RawPayload {
                    shard_id: self.id,
                    payload,
                });
            }
        }

        Ok(())
    }

    fn handle_error(&self, error: &str) {
        if error.is_empty() {
            return;
        }
        warn!(shard_id = self.id, error, "Error received");
    }

    fn handle_close(&mut self) {
        self.set_status(ShardStatus::Closed);
        self.ready_at = None;
        debug!(shard_id = self.id, "Connection closed");
    }

    /// Drive the session: connect with the initial descriptor, then
    /// process socket events until the channel closes or shutdown is
    /// signalled. A reconnect replaces the inbound receiver mid-loop;
    /// the next iteration picks up the fresh channel.
    pub async fn run(
        mut self,
        initial: SessionDescriptor,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), UplinkError> {
        self.connect(initial).await?;

        loop {
            let event = {
                let Some(inbound) = self.inbound.as_mut() else {
                    break;
                };

                tokio::select! {
                    event = inbound.recv() => event,
                    _ = shutdown.recv() => {
                        info!(shard_id = self.id, "Shard received shutdown signal");
                        self.disconnect();
                        return Ok(());
                    }
                }
            };

            match event {
                Some(SocketEvent::Open) => self.handle_open(),
                Some(SocketEvent::Message(text)) => self.handle_message(&text).await?,
                Some(SocketEvent::Error(error)) => self.handle_error(&error),
                Some(SocketEvent::Closed) | None => {
                    self.handle_close();
                    break;
                }
            }
        }

        info!(shard_id = self.id, "Shard event stream ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use crate::shard::socket::SocketHandle;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedConnector {
        handles: Mutex<VecDeque<SocketHandle>>,
        opened_urls: Mutex<Vec<String>>,
    }

    impl ScriptedConnector {
        fn new(handles: Vec<SocketHandle>) -> Self {
            Self {
                handles: Mutex::new(handles.into()),
                opened_urls: Mutex::new(Vec::new()),
            }
        }

        fn opened(&self) -> Vec<String> {
            self.opened_urls.lock().unwrap().clone()
        }
    }

    impl SocketConnector for &ScriptedConnector {
        async fn open(&self, _shard_id: u64, url: &str) -> Result<SocketHandle, UplinkError> {
            self.opened_urls.lock().unwrap().push(url.to_string());
            Ok(self
                .handles
                .lock()
                .unwrap()
                .pop_front()
                .expect("no scripted socket handle left"))
        }
    }

    struct ScriptedSessions {
        calls: AtomicU32,
    }

    impl ScriptedSessions {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
            }
        }
    }

    impl SessionSource for &ScriptedSessions {
        async fn fresh_session(&self, _shard_id: u64) -> Result<SessionDescriptor, UplinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SessionDescriptor {
                token: "fresh-token".to_string(),
                socket_url: "wss://panel.example.com/fresh".to_string(),
            })
        }
    }

    struct TestSocket {
        commands: mpsc::UnboundedReceiver<SocketCommand>,
        #[allow(dead_code)]
        events: mpsc::UnboundedSender<SocketEvent>,
    }

    fn socket_pair() -> (SocketHandle, TestSocket) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            SocketHandle {
                commands: command_tx,
                events: event_rx,
            },
            TestSocket {
                commands: command_rx,
                events: event_tx,
            },
        )
    }

    fn descriptor(token: &str) -> SessionDescriptor {
        SessionDescriptor {
            token: token.to_string(),
            socket_url: "wss://panel.example.com/initial".to_string(),
        }
    }

    fn shard<'a>(
        connector: &'a ScriptedConnector,
        sessions: &'a ScriptedSessions,
    ) -> (
        Shard<&'a ScriptedConnector, &'a ScriptedSessions>,
        events::EventRx,
    ) {
        let (events_tx, events_rx) = events::channel();
        let registry = ShardRegistry::new([0u64].into_iter());
        (Shard::new(0, connector, sessions, events_tx, registry), events_rx)
    }

    #[tokio::test]
    async fn connect_transitions_closed_to_connecting() {
        let (handle, _socket) = socket_pair();
        let connector = ScriptedConnector::new(vec![handle]);
        let sessions = ScriptedSessions::new();
        let (mut shard, _events) = shard(&connector, &sessions);

        shard.connect(descriptor("tok")).await.unwrap();
        assert_eq!(shard.status(), ShardStatus::Connecting);

        // Duplicate connect while a channel is open is a no-op.
        shard.connect(descriptor("tok2")).await.unwrap();
        assert_eq!(connector.opened().len(), 1);
        assert_eq!(shard.token.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn first_message_triggers_auth_handshake() {
        let (handle, mut socket) = socket_pair();
        let connector = ScriptedConnector::new(vec![handle]);
        let sessions = ScriptedSessions::new();
        let (mut shard, _events) = shard(&connector, &sessions);

        shard.connect(descriptor("session-token")).await.unwrap();
        // Priming frame content is irrelevant.
        shard.handle_message("hello").await.unwrap();

        assert_eq!(shard.status(), ShardStatus::Connected);
        assert!(shard.last_ping_sent.is_some());

        let command = socket.commands.try_recv().unwrap();
        let SocketCommand::Send(frame) = command else {
            panic!("expected a send command, got {command:?}");
        };
        let frame: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(frame["event"], "auth");
        assert_eq!(frame["args"], json!(["session-token"]));
    }

    #[tokio::test]
    async fn auth_success_records_ping_and_ready() {
        let (handle, _socket) = socket_pair();
        let connector = ScriptedConnector::new(vec![handle]);
        let sessions = ScriptedSessions::new();
        let (mut shard, _events) = shard(&connector, &sessions);

        shard.connect(descriptor("tok")).await.unwrap();
        shard.handle_message("hello").await.unwrap();
        assert!(shard.ping().is_none());

        shard
            .handle_message(r#"{"event":"auth success","args":[]}"#)
            .await
            .unwrap();

        assert!(shard.ping().is_some());
        assert!(shard.ready_at.is_some());
        assert_eq!(shard.status(), ShardStatus::Connected);
    }

    #[tokio::test]
    async fn token_expired_triggers_reconnect_with_fresh_session() {
        let (first, mut first_socket) = socket_pair();
        let (second, _second_socket) = socket_pair();
        let connector = ScriptedConnector::new(vec![first, second]);
        let sessions = ScriptedSessions::new();
        let (mut shard, _events) = shard(&connector, &sessions);

        shard.connect(descriptor("stale-token")).await.unwrap();
        shard.handle_message("hello").await.unwrap();
        let _auth = first_socket.commands.try_recv().unwrap();

        shard
            .handle_message(r#"{"event":"token expired"}"#)
            .await
            .unwrap();

        assert_eq!(sessions.calls.load(Ordering::SeqCst), 1);
        assert_eq!(shard.status(), ShardStatus::Connecting);
        assert_eq!(shard.token.as_deref(), Some("fresh-token"));
        assert_eq!(connector.opened().len(), 2);

        // Old channel was told to close with the reconnect code.
        let close = first_socket.commands.try_recv().unwrap();
        assert_eq!(
            close,
            SocketCommand::Close {
                code: CLOSE_CODE_RECONNECT,
                reason: "uplink::reconnect"
            }
        );
    }

    #[tokio::test]
    async fn reconnect_is_noop_while_already_reconnecting() {
        let (handle, _socket) = socket_pair();
        let connector = ScriptedConnector::new(vec![handle]);
        let sessions = ScriptedSessions::new();
        let (mut shard, _events) = shard(&connector, &sessions);

        shard.connect(descriptor("tok")).await.unwrap();
        shard.status = ShardStatus::Reconnecting;

        shard.reconnect().await.unwrap();
        assert_eq!(sessions.calls.load(Ordering::SeqCst), 0, "no duplicate session refresh");
    }

    #[tokio::test]
    async fn disconnect_before_ready_is_noop() {
        let (handle, mut socket) = socket_pair();
        let connector = ScriptedConnector::new(vec![handle]);
        let sessions = ScriptedSessions::new();
        let (mut shard, _events) = shard(&connector, &sessions);

        shard.connect(descriptor("tok")).await.unwrap();
        shard.disconnect();

        assert!(socket.commands.try_recv().is_err(), "no close frame expected");
        assert_eq!(shard.token.as_deref(), Some("tok"));
        assert_eq!(shard.status(), ShardStatus::Connecting);
    }

    #[tokio::test]
    async fn disconnect_after_ready_clears_session_state() {
        let (handle, mut socket) = socket_pair();
        let connector = ScriptedConnector::new(vec![handle]);
        let sessions = ScriptedSessions::new();
        let (mut shard, _events) = shard(&connector, &sessions);

        shard.connect(descriptor("tok")).await.unwrap();
        shard.handle_message("hello").await.unwrap();
        shard
            .handle_message(r#"{"event":"auth success"}"#)
            .await
            .unwrap();
        let _auth = socket.commands.try_recv().unwrap();

        shard.disconnect();

        let close = socket.commands.try_recv().unwrap();
        assert_eq!(
            close,
            SocketCommand::Close {
                code: CLOSE_CODE_DISCONNECT,
                reason: "uplink::disconnect"
            }
        );
        assert_eq!(shard.status(), ShardStatus::Closed);
        assert!(shard.ready_at.is_none());
        assert!(shard.ping().is_none());
        assert!(shard.token.is_none());
    }

    #[tokio::test]
    async fn unrecognized_events_are_forwarded_as_raw_payloads() {
        let (handle, _socket) = socket_pair();
        let connector = ScriptedConnector::new(vec![handle]);
        let sessions = ScriptedSessions::new();
        let (mut shard, mut events) = shard(&connector, &sessions);

        shard.connect(descriptor("tok")).await.unwrap();
        shard.handle_message("hello").await.unwrap();
        shard
            .handle_message(r#"{"event":"status","args":["running"]}"#)
            .await
            .unwrap();

        match events.try_recv().unwrap() {
            UplinkEvent::RawPayload { shard_id, payload } => {
                assert_eq!(shard_id, 0);
                assert_eq!(payload["event"], "status");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_packets_are_logged_and_dropped() {
        let (handle, _socket) = socket_pair();
        let connector = ScriptedConnector::new(vec![handle]);
        let sessions = ScriptedSessions::new();
        let (mut shard, mut events) = shard(&connector, &sessions);

        shard.connect(descriptor("tok")).await.unwrap();
        shard.handle_message("hello").await.unwrap();

        shard.handle_message("").await.unwrap();
        shard.handle_message("not json at all").await.unwrap();

        assert_eq!(shard.status(), ShardStatus::Connected);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_channel_errors() {
        let connector = ScriptedConnector::new(vec![]);
        let sessions = ScriptedSessions::new();
        let (shard, _events) = shard(&connector, &sessions);

        let err = shard.send("auth", json!("tok")).unwrap_err();
        assert_eq!(err.error_type_label(), "channel_closed");
    }

    #[tokio::test]
    async fn socket_close_event_flips_state_to_closed() {
        let (handle, _socket) = socket_pair();
        let connector = ScriptedConnector::new(vec![handle]);
        let sessions = ScriptedSessions::new();
        let (mut shard, _events) = shard(&connector, &sessions);

        shard.connect(descriptor("tok")).await.unwrap();
        shard.handle_message("hello").await.unwrap();
        shard
            .handle_message(r#"{"event":"auth success"}"#)
            .await
            .unwrap();

        shard.handle_close();
        assert_eq!(shard.status(), ShardStatus::Closed);
        assert!(shard.ready_at.is_none());
    }
}
