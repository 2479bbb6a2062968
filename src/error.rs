//! Domain error types for the panel uplink
//!
//! Structured thiserror variants for navigable diagnostics and
//! compile-time exhaustive handling.
//!
//! main.rs is the ONLY module allowed to use anyhow::Result (process
//! boundary). All application code returns Result<T, UplinkError>.

use thiserror::Error;

/// Uplink domain errors
///
/// Every variant carries structured context fields for diagnostics.
/// On-call engineers can pattern-match on the variant to understand
/// the failure mode without parsing error message strings.
#[derive(Error, Debug)]
pub enum UplinkError {
    /// Configuration error (environment variable missing or invalid,
    /// domain shape, interval range, non-integer node list)
    #[error("configuration error: {0}")]
    Config(String),

    /// A second start was attempted while the poller was running
    #[error("status poller already running")]
    AlreadyRunning,

    /// 401/403 from the control plane — credential or access failure,
    /// terminal for the whole component
    #[error("panel rejected credentials with status {status}")]
    Unauthorized { status: u16 },

    /// The application root answered but not with a recognized payload
    #[error("application API is unavailable")]
    ApiUnavailable,

    /// Transient failures for one node exhausted the retry budget
    #[error("maximum retry limit exceeded for node {node_id} ({retries}/{limit})")]
    RetryLimitExceeded {
        node_id: u64,
        retries: u32,
        limit: u32,
    },

    /// Fetching a fresh WebSocket session descriptor failed
    #[error("session refresh failed for shard {shard_id}")]
    SessionRefresh {
        shard_id: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// HTTP transport failure (no status available) — counted as a
    /// transient error by the poller
    #[error("panel transport error")]
    Transport(#[from] reqwest::Error),

    /// Opening the WebSocket channel failed
    #[error("socket connect failed for shard {shard_id}")]
    SocketConnect {
        shard_id: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A send was attempted with no open channel
    #[error("no open channel for shard {shard_id}")]
    ChannelClosed { shard_id: u64 },
}

impl UplinkError {
    /// Returns a static label string suitable for Prometheus metrics.
    ///
    /// Used as the `error_type` label on `uplink_errors_total`,
    /// enabling per-error-type monitoring and alerting.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::AlreadyRunning => "already_running",
            Self::Unauthorized { .. } => "unauthorized",
            Self::ApiUnavailable => "api_unavailable",
            Self::RetryLimitExceeded { .. } => "retry_limit",
            Self::SessionRefresh { .. } => "session_refresh",
            Self::Transport(_) => "transport",
            Self::SocketConnect { .. } => "socket_connect",
            Self::ChannelClosed { .. } => "channel_closed",
        }
    }

    /// True for the authorization class of failures (401/403), which is
    /// terminal wherever it appears.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_source() -> Box<dyn std::error::Error + Send + Sync> {
        Box::new(std::io::Error::new(std::io::ErrorKind::Other, "test"))
    }

    #[test]
    fn every_variant_has_distinct_error_type_label() {
        let labels = [
            UplinkError::Config("bad".into()).error_type_label(),
            UplinkError::AlreadyRunning.error_type_label(),
            UplinkError::Unauthorized { status: 401 }.error_type_label(),
            UplinkError::ApiUnavailable.error_type_label(),
            UplinkError::RetryLimitExceeded {
                node_id: 1,
                retries: 3,
                limit: 2,
            }
            .error_type_label(),
            UplinkError::SessionRefresh {
                shard_id: 0,
                source: test_source(),
            }
            .error_type_label(),
            UplinkError::SocketConnect {
                shard_id: 0,
                source: test_source(),
            }
            .error_type_label(),
            UplinkError::ChannelClosed { shard_id: 0 }.error_type_label(),
        ];

        let mut unique = labels.to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(labels.len(), unique.len(), "Duplicate error_type_label found");
    }

    #[test]
    fn error_messages_contain_context() {
        let err = UplinkError::RetryLimitExceeded {
            node_id: 7,
            retries: 3,
            limit: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("node 7"), "message should contain node_id");
        assert!(msg.contains("3/2"), "message should contain retries/limit");

        let err = UplinkError::Unauthorized { status: 403 };
        assert!(err.to_string().contains("403"));

        let err = UplinkError::ChannelClosed { shard_id: 4 };
        assert!(err.to_string().contains("shard 4"));
    }

    #[test]
    fn config_error_preserves_message() {
        let err = UplinkError::Config("PANEL_URL must be set".to_string());
        assert_eq!(err.to_string(), "configuration error: PANEL_URL must be set");
    }

    #[test]
    fn unauthorized_classification() {
        assert!(UplinkError::Unauthorized { status: 401 }.is_unauthorized());
        assert!(!UplinkError::ApiUnavailable.is_unauthorized());
    }
}
