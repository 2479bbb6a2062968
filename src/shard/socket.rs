//! Socket plumbing for shard sessions
//!
//! A live socket is represented to the state machine as a command/event
//! channel pair: a writer task drains outbound commands into the
//! tungstenite sink, a reader task surfaces inbound frames as events.
//! The shard only ever holds the channel ends, so replacing the handle
//! on reconnect drops the old connection wholesale and nothing can send
//! on a stale channel.

use crate::error::UplinkError;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Close code sent when the channel is replaced during a reconnect
pub const CLOSE_CODE_RECONNECT: u16 = 4009;

/// Normal-closure code sent by an explicit disconnect
pub const CLOSE_CODE_DISCONNECT: u16 = 1000;

/// Outbound instructions for the writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    /// Transmit a text frame
    Send(String),
    /// Send a close frame and stop the writer
    Close { code: u16, reason: &'static str },
}

/// Inbound channel lifecycle events for the shard state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Message(String),
    Error(String),
    Closed,
}

/// Both ends of one live socket
pub struct SocketHandle {
    pub commands: mpsc::UnboundedSender<SocketCommand>,
    pub events: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Seam for opening sockets; tests substitute scripted connectors
#[allow(async_fn_in_trait)]
pub trait SocketConnector {
    async fn open(&self, shard_id: u64, url: &str) -> Result<SocketHandle, UplinkError>;
}

/// tokio-tungstenite connector used in production
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl SocketConnector for WsConnector {
    async fn open(&self, shard_id: u64, url: &str) -> Result<SocketHandle, UplinkError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| UplinkError::SocketConnect {
                shard_id,
                source: Box::new(e),
            })?;

        let (mut sink, mut source) = stream.split();
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        // Writer task: drains commands until a close command or the
        // shard drops its sender.
        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                match command {
                    SocketCommand::Send(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            warn!(shard_id, error = %e, "Socket send failed");
                            break;
                        }
                    }
                    SocketCommand::Close { code, reason } => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                            debug!(shard_id, error = %e, "Close frame not delivered");
                        }
                        break;
                    }
                }
            }
        });

        // Reader task: surfaces frames as events until the stream ends
        // or the shard replaces the handle.
        tokio::spawn(async move {
            if event_tx.send(SocketEvent::Open).is_err() {
                return;
            }

            while let Some(frame) = source.next().await {
                let delivered = match frame {
                    Ok(Message::Text(text)) => {
                        event_tx.send(SocketEvent::Message(text.to_string()))
                    }
                    Ok(Message::Close(_)) => break,
                    // Ping/pong/binary frames are not part of the panel protocol
                    Ok(_) => continue,
                    Err(e) => event_tx.send(SocketEvent::Error(e.to_string())),
                };

                if delivered.is_err() {
                    return;
                }
            }

            let _ = event_tx.send(SocketEvent::Closed);
        });

        Ok(SocketHandle {
            commands: command_tx,
            events: event_rx,
        })
    }
}
