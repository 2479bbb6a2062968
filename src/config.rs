//! Uplink configuration module
//!
//! Handles loading configuration from environment variables and the
//! construction-time validation of the status poller options (domain
//! shape, integer node IDs, interval ranges).

use crate::error::UplinkError;
use std::env;
use std::time::Duration;
use url::Url;

/// Minimum allowed probe interval (10 seconds)
pub const MIN_CALL_INTERVAL: Duration = Duration::from_millis(10_000);

/// Maximum allowed probe interval (12 hours)
pub const MAX_CALL_INTERVAL: Duration = Duration::from_millis(43_200_000);

/// Default intra-cycle delay between node probes
pub const DEFAULT_NEXT_INTERVAL: Duration = Duration::from_millis(5_000);

/// Validated options for the status poller
///
/// Construction is the fail-fast point: every contract violation is a
/// distinct `UplinkError::Config` raised synchronously, never later.
#[derive(Debug, Clone)]
pub struct StatusOptions {
    /// Panel base URL, scheme + host, no trailing slash
    pub domain: String,
    /// Bearer credential for the application API
    pub auth: String,
    /// Watched node IDs, probed strictly in this order
    pub nodes: Vec<u64>,
    /// Interval between poll cycles
    pub call_interval: Duration,
    /// Delay between consecutive node probes within a cycle
    pub next_interval: Duration,
    /// Transient failures tolerated before a terminal close
    pub retry_limit: u32,
}

impl StatusOptions {
    pub fn new(
        domain: impl Into<String>,
        auth: impl Into<String>,
        nodes: Vec<u64>,
        call_interval: Duration,
        next_interval: Duration,
        retry_limit: u32,
    ) -> Result<Self, UplinkError> {
        let domain = validate_domain(&domain.into())?;

        if call_interval < MIN_CALL_INTERVAL || call_interval > MAX_CALL_INTERVAL {
            return Err(UplinkError::Config(format!(
                "call interval must be between {}ms and {}ms, got {}ms",
                MIN_CALL_INTERVAL.as_millis(),
                MAX_CALL_INTERVAL.as_millis(),
                call_interval.as_millis()
            )));
        }

        if next_interval >= call_interval {
            return Err(UplinkError::Config(format!(
                "next interval ({}ms) must be less than the call interval ({}ms)",
                next_interval.as_millis(),
                call_interval.as_millis()
            )));
        }

        Ok(Self {
            domain,
            auth: auth.into(),
            nodes,
            call_interval,
            next_interval,
            retry_limit,
        })
    }
}

/// Validate the panel domain shape: http(s) scheme, a host, and an
/// explicit port when the host is localhost. Returns the normalized
/// base URL without a trailing slash.
pub fn validate_domain(domain: &str) -> Result<String, UplinkError> {
    let url = Url::parse(domain)
        .map_err(|e| UplinkError::Config(format!("invalid panel URL '{domain}': {e}")))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UplinkError::Config(format!(
            "panel URL must start with 'http://' or 'https://', got '{}'",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| UplinkError::Config(format!("panel URL '{domain}' has no host")))?;

    if host == "localhost" && url.port().is_none() {
        return Err(UplinkError::Config(
            "panel URL must be bound to a port when using localhost".to_string(),
        ));
    }

    Ok(domain.trim_end_matches('/').to_string())
}

/// Uplink process configuration
#[derive(Debug, Clone)]
pub struct UplinkConfig {
    /// Validated status poller options
    pub status: StatusOptions,

    /// Server shard IDs to open WebSocket sessions for
    pub shard_ids: Vec<u64>,

    /// Health/metrics HTTP port
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl UplinkConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, UplinkError> {
        dotenvy::dotenv().ok();

        let domain = env::var("PANEL_URL")
            .map_err(|_| UplinkError::Config("PANEL_URL must be set".to_string()))?;

        let auth = env::var("PANEL_API_KEY")
            .map_err(|_| UplinkError::Config("PANEL_API_KEY must be set".to_string()))?;

        let nodes = parse_id_list(&env::var("NODE_IDS").unwrap_or_default(), "NODE_IDS")?;
        let shard_ids = parse_id_list(&env::var("SHARD_IDS").unwrap_or_default(), "SHARD_IDS")?;

        let call_interval = env::var("CALL_INTERVAL_MS")
            .unwrap_or_else(|_| "30000".to_string())
            .parse()
            .map(Duration::from_millis)
            .map_err(|e| {
                UplinkError::Config(format!("CALL_INTERVAL_MS must be a valid number: {e}"))
            })?;

        let next_interval = env::var("NEXT_INTERVAL_MS")
            .map(|raw| {
                raw.parse().map(Duration::from_millis).map_err(|e| {
                    UplinkError::Config(format!("NEXT_INTERVAL_MS must be a valid number: {e}"))
                })
            })
            .unwrap_or(Ok(DEFAULT_NEXT_INTERVAL))?;

        let retry_limit = env::var("RETRY_LIMIT")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .map_err(|e| UplinkError::Config(format!("RETRY_LIMIT must be a valid number: {e}")))?;

        let status = StatusOptions::new(domain, auth, nodes, call_interval, next_interval, retry_limit)?;

        let http_port = env::var("HTTP_PORT")
            .unwrap_or_else(|_| "9090".to_string())
            .parse()
            .map_err(|e| UplinkError::Config(format!("HTTP_PORT must be a valid port number: {e}")))?;

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            status,
            shard_ids,
            http_port,
            log_level,
        })
    }
}

/// Parse a comma-separated ID list; every entry must be an integer.
fn parse_id_list(raw: &str, var: &str) -> Result<Vec<u64>, UplinkError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map_err(|_| UplinkError::Config(format!("{var} entries must be integers, got '{s}'")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options_with(
        domain: &str,
        call_ms: u64,
        next_ms: u64,
    ) -> Result<StatusOptions, UplinkError> {
        StatusOptions::new(
            domain,
            "key",
            vec![1, 2],
            Duration::from_millis(call_ms),
            Duration::from_millis(next_ms),
            0,
        )
    }

    #[test]
    fn accepts_well_formed_options() {
        let opts = options_with("https://panel.example.com", 30_000, 5_000).unwrap();
        assert_eq!(opts.domain, "https://panel.example.com");
        assert_eq!(opts.nodes, vec![1, 2]);
    }

    #[test]
    fn rejects_non_http_scheme() {
        let err = options_with("ftp://x.com", 30_000, 5_000).unwrap_err();
        assert_eq!(err.error_type_label(), "config");
    }

    #[test]
    fn rejects_localhost_without_port() {
        assert!(options_with("http://localhost", 30_000, 5_000).is_err());
        assert!(options_with("http://localhost:8080", 30_000, 5_000).is_ok());
    }

    #[test]
    fn rejects_call_interval_out_of_range() {
        // Below 10 seconds
        assert!(options_with("https://panel.example.com", 5_000, 1_000).is_err());
        // Above 12 hours
        assert!(options_with("https://panel.example.com", 43_200_001, 5_000).is_err());
        // Boundaries are inclusive
        assert!(options_with("https://panel.example.com", 10_000, 5_000).is_ok());
        assert!(options_with("https://panel.example.com", 43_200_000, 5_000).is_ok());
    }

    #[test]
    fn rejects_next_interval_not_below_call_interval() {
        assert!(options_with("https://panel.example.com", 10_000, 10_000).is_err());
        assert!(options_with("https://panel.example.com", 10_000, 12_000).is_err());
        assert!(options_with("https://panel.example.com", 10_000, 9_999).is_ok());
    }

    #[test]
    fn trailing_slash_is_normalized() {
        let opts = options_with("https://panel.example.com/", 30_000, 5_000).unwrap();
        assert_eq!(opts.domain, "https://panel.example.com");
    }

    #[test]
    fn id_list_rejects_non_integers() {
        assert_eq!(parse_id_list("1, 2,3", "NODE_IDS").unwrap(), vec![1, 2, 3]);
        assert!(parse_id_list("1,two", "NODE_IDS").is_err());
        assert!(parse_id_list("", "NODE_IDS").unwrap().is_empty());
    }
}
