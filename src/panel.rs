//! Panel API transport
//!
//! reqwest-backed client for the control plane. The core state machines
//! depend only on the two seams defined here: `PanelTransport` for the
//! status poller's HTTP probes and `SessionSource` for the shard's
//! WebSocket session descriptors. Tests substitute scripted
//! implementations; production wires in `PanelClient`.

use crate::error::UplinkError;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

const USER_AGENT: &str = concat!("panel-uplink/", env!("CARGO_PKG_VERSION"));

/// Minimal response view the probe decisions need: the HTTP status plus
/// the decoded JSON body when there is one.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// WebSocket session descriptor for one shard, as returned by the
/// panel's client API.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionDescriptor {
    /// Opaque credential presented in the auth handshake
    pub token: String,
    /// URL of the WebSocket endpoint to open
    #[serde(rename = "socket")]
    pub socket_url: String,
}

#[derive(Deserialize)]
struct SessionEnvelope {
    data: SessionDescriptor,
}

/// HTTP probe seam the status poller depends on
#[allow(async_fn_in_trait)]
pub trait PanelTransport {
    /// Probe the application root (startup liveness check)
    async fn probe_root(&self) -> Result<ApiResponse, UplinkError>;

    /// Probe a single node
    async fn probe_node(&self, id: u64) -> Result<ApiResponse, UplinkError>;
}

/// Session descriptor seam the shard's connect/reconnect path depends on
#[allow(async_fn_in_trait)]
pub trait SessionSource {
    /// Fetch a fresh session descriptor for one shard
    async fn fresh_session(&self, shard_id: u64) -> Result<SessionDescriptor, UplinkError>;
}

/// Production transport over a shared reqwest client
#[derive(Debug, Clone)]
pub struct PanelClient {
    http: reqwest::Client,
    domain: String,
    auth: String,
}

impl PanelClient {
    /// Build a client for a validated panel base URL and API key
    pub fn new(domain: impl Into<String>, auth: impl Into<String>) -> Result<Self, UplinkError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(UplinkError::Transport)?;

        Ok(Self {
            http,
            domain: domain.into(),
            auth: auth.into(),
        })
    }

    async fn get(&self, path: &str) -> Result<ApiResponse, UplinkError> {
        let url = format!("{}{path}", self.domain);
        debug!(%url, "Fetching");

        let res = self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.auth))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = res.status().as_u16();
        let body = res.json::<Value>().await.ok();

        Ok(ApiResponse { status, body })
    }
}

impl PanelTransport for PanelClient {
    async fn probe_root(&self) -> Result<ApiResponse, UplinkError> {
        self.get("/api/application").await
    }

    async fn probe_node(&self, id: u64) -> Result<ApiResponse, UplinkError> {
        self.get(&format!("/api/application/nodes/{id}")).await
    }
}

impl SessionSource for PanelClient {
    async fn fresh_session(&self, shard_id: u64) -> Result<SessionDescriptor, UplinkError> {
        let res = self
            .get(&format!("/api/client/servers/{shard_id}/websocket"))
            .await?;

        if res.status == 401 || res.status == 403 {
            return Err(UplinkError::Unauthorized { status: res.status });
        }

        let body = res.body.ok_or_else(|| UplinkError::SessionRefresh {
            shard_id,
            source: format!("panel answered {} with no body", res.status).into(),
        })?;

        let envelope: SessionEnvelope =
            serde_json::from_value(body).map_err(|e| UplinkError::SessionRefresh {
                shard_id,
                source: Box::new(e),
            })?;

        Ok(envelope.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_covers_2xx_only() {
        let ok = ApiResponse {
            status: 204,
            body: None,
        };
        assert!(ok.is_success());

        for status in [199, 301, 401, 404, 500] {
            let res = ApiResponse { status, body: None };
            assert!(!res.is_success(), "{status} should not be success");
        }
    }

    #[test]
    fn session_envelope_unwraps_data() {
        let body = json!({
            "data": {
                "token": "jwt-token",
                "socket": "wss://node.example.com:8080/api/servers/abc/ws"
            }
        });

        let envelope: SessionEnvelope = serde_json::from_value(body).unwrap();
        assert_eq!(envelope.data.token, "jwt-token");
        assert!(envelope.data.socket_url.starts_with("wss://"));
    }
}
