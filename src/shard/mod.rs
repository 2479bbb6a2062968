//! Shard session module
//!
//! One WebSocket session per configured shard ID, each driven by its
//! own state machine, with a shared registry for health reporting.

mod session;
mod socket;
mod state;

pub use session::{Shard, ShardStatus};
pub use socket::{
    SocketCommand, SocketConnector, SocketEvent, SocketHandle, WsConnector,
    CLOSE_CODE_DISCONNECT, CLOSE_CODE_RECONNECT,
};
pub use state::{ShardEntry, ShardRegistry};
