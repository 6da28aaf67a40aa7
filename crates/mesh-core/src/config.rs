//! Environment-driven configuration for a mesh server process.

use std::time::Duration;

/// Default peer-link listening port.
pub const DEFAULT_PEER_PORT: u16 = 4000;
/// Default discovery service address.
pub const DEFAULT_DISCOVERY_ADDRESS: &str = "ws://localhost:8000";
/// Default fan-out query deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);
/// Default delay between discovery reconnect attempts. Fixed delay, no
/// backoff growth, retried indefinitely.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Configuration error: an environment value that would not parse.
#[derive(Debug, thiserror::Error)]
#[error("invalid value {value:?} for {variable}")]
pub struct ConfigError {
    /// Environment variable name.
    pub variable: &'static str,
    /// The offending value.
    pub value: String,
}

/// Settings for one mesh server process.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Port the peer-link listener binds.
    pub peer_port: u16,
    /// This server's externally reachable peer-link address.
    pub server_address: String,
    /// Address of the discovery service.
    pub discovery_address: String,
    /// Deadline for fan-out queries, unless overridden per call.
    pub request_timeout: Duration,
    /// Delay between discovery reconnect attempts.
    pub reconnect_delay: Duration,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            peer_port: DEFAULT_PEER_PORT,
            server_address: format!("ws://localhost:{DEFAULT_PEER_PORT}"),
            discovery_address: DEFAULT_DISCOVERY_ADDRESS.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl MeshConfig {
    /// Build a configuration from the process environment.
    ///
    /// Recognized variables: `MESH_PEER_PORT`, `MESH_SERVER_ADDRESS`,
    /// `MESH_DISCOVERY_ADDRESS`, `MESH_REQUEST_TIMEOUT_MS`,
    /// `MESH_RECONNECT_DELAY_MS`. Unset variables fall back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let peer_port = match std::env::var("MESH_PEER_PORT") {
            Ok(value) => parse(&value, "MESH_PEER_PORT")?,
            Err(_) => DEFAULT_PEER_PORT,
        };
        let server_address = std::env::var("MESH_SERVER_ADDRESS")
            .unwrap_or_else(|_| format!("ws://localhost:{peer_port}"));
        let discovery_address = std::env::var("MESH_DISCOVERY_ADDRESS")
            .unwrap_or_else(|_| DEFAULT_DISCOVERY_ADDRESS.to_string());
        let request_timeout = match std::env::var("MESH_REQUEST_TIMEOUT_MS") {
            Ok(value) => Duration::from_millis(parse(&value, "MESH_REQUEST_TIMEOUT_MS")?),
            Err(_) => DEFAULT_REQUEST_TIMEOUT,
        };
        let reconnect_delay = match std::env::var("MESH_RECONNECT_DELAY_MS") {
            Ok(value) => Duration::from_millis(parse(&value, "MESH_RECONNECT_DELAY_MS")?),
            Err(_) => DEFAULT_RECONNECT_DELAY,
        };

        Ok(Self {
            peer_port,
            server_address,
            discovery_address,
            request_timeout,
            reconnect_delay,
        })
    }
}

fn parse<T: std::str::FromStr>(value: &str, variable: &'static str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError {
        variable,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = MeshConfig::default();
        assert_eq!(config.peer_port, 4000);
        assert_eq!(config.server_address, "ws://localhost:4000");
        assert_eq!(config.request_timeout, Duration::from_millis(5000));
        assert_eq!(config.reconnect_delay, Duration::from_millis(1000));
    }

    #[test]
    fn bad_numeric_value_is_rejected() {
        let err = parse::<u16>("not-a-port", "MESH_PEER_PORT").unwrap_err();
        assert_eq!(err.variable, "MESH_PEER_PORT");
        assert_eq!(err.value, "not-a-port");
    }
}
