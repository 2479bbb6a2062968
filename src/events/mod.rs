//! Event surface module
//!
//! Typed lifecycle events emitted by the shard and the status poller,
//! delivered over an unbounded channel instead of a publish/subscribe
//! base type. Consumers hold the receiving end and react to
//! connect/disconnect transitions, per-cycle snapshots, and raw shard
//! payloads.

pub mod normalize;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// A lifecycle event emitted by the uplink core
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UplinkEvent {
    /// A watched node became reachable
    NodeConnect { node_id: u64 },
    /// A previously reachable node answered 404
    NodeDisconnect { node_id: u64 },
    /// Per-cycle snapshot of one node's normalized attributes
    Interval { attributes: Value },
    /// A shard message with no recognized discriminator, forwarded as-is
    RawPayload { shard_id: u64, payload: Value },
}

impl UplinkEvent {
    /// Static label for the `event_type` metric dimension
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::NodeConnect { .. } => "node_connect",
            Self::NodeDisconnect { .. } => "node_disconnect",
            Self::Interval { .. } => "interval",
            Self::RawPayload { .. } => "raw_payload",
        }
    }
}

/// Sending half of the event surface
pub type EventTx = mpsc::UnboundedSender<UplinkEvent>;

/// Receiving half of the event surface
pub type EventRx = mpsc::UnboundedReceiver<UplinkEvent>;

/// Create the event channel pair
pub fn channel() -> (EventTx, EventRx) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_labels_are_distinct() {
        let labels = [
            UplinkEvent::NodeConnect { node_id: 1 }.event_type(),
            UplinkEvent::NodeDisconnect { node_id: 1 }.event_type(),
            UplinkEvent::Interval {
                attributes: Value::Null,
            }
            .event_type(),
            UplinkEvent::RawPayload {
                shard_id: 0,
                payload: Value::Null,
            }
            .event_type(),
        ];

        let mut unique = labels.to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(labels.len(), unique.len());
    }

    #[test]
    fn events_serialize_with_tagged_discriminator() {
        let event = UplinkEvent::NodeConnect { node_id: 4 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "node_connect");
        assert_eq!(json["node_id"], 4);
    }
}
