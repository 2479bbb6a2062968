//! # panel-uplink
//!
//! Control-plane uplink for a hosting panel. Two independent state
//! machines make up the core:
//!
//! - **Shard sessions**: one WebSocket session per configured shard ID,
//!   authenticated via a first-message handshake and transparently
//!   reconnected on credential expiry.
//! - **Status poller**: a strictly sequential polling loop over a fixed
//!   set of node IDs with bounded transient-failure retry, reporting
//!   per-node reachability transitions and per-cycle snapshots.
//!
//! Both emit typed [`events::UplinkEvent`]s over a channel; health
//! endpoints and Prometheus metrics surface their state to operators.

pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod metrics;
pub mod panel;
pub mod shard;
pub mod status;

pub use config::{StatusOptions, UplinkConfig};
pub use error::UplinkError;
pub use events::UplinkEvent;
pub use panel::{PanelClient, SessionDescriptor};
pub use shard::{Shard, ShardRegistry, ShardStatus};
pub use status::{NodeStatus, PollerHealth};
