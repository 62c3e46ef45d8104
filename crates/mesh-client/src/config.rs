//! Client configuration.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default relay WebSocket endpoint.
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:3000/ws";

/// Default bound on an in-place transport restart before the link is rebuilt.
pub const DEFAULT_RECONNECT_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Mesh client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshConfig {
    /// Relay WebSocket URL (default: `ws://127.0.0.1:3000/ws`).
    pub relay_url: String,

    /// How long a link may stay `reconnecting` before it is rebuilt
    /// (default: 5s).
    pub reconnect_timeout: Duration,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            reconnect_timeout: Duration::from_millis(DEFAULT_RECONNECT_TIMEOUT_MS),
        }
    }
}

impl MeshConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let relay_url = vars
            .get("MESH_RELAY_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string());

        if !relay_url.starts_with("ws://") && !relay_url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue(format!(
                "MESH_RELAY_URL must be a ws:// or wss:// URL, got {relay_url}"
            )));
        }

        let reconnect_timeout_ms = match vars.get("MESH_RECONNECT_TIMEOUT_MS") {
            None => DEFAULT_RECONNECT_TIMEOUT_MS,
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| {
                    ConfigError::InvalidValue(format!("MESH_RECONNECT_TIMEOUT_MS={raw}"))
                })?,
        };

        Ok(Self {
            relay_url,
            reconnect_timeout: Duration::from_millis(reconnect_timeout_ms),
        })
    }

    /// HTTP base URL of the relay, derived from the WebSocket URL. Used to
    /// reach `/api/ice-servers` on the same host.
    #[must_use]
    pub fn http_base_url(&self) -> String {
        let base = self
            .relay_url
            .strip_suffix("/ws")
            .unwrap_or(&self.relay_url);
        if let Some(rest) = base.strip_prefix("wss://") {
            format!("https://{rest}")
        } else if let Some(rest) = base.strip_prefix("ws://") {
            format!("http://{rest}")
        } else {
            base.to_string()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MeshConfig::from_vars(&HashMap::new()).unwrap();
        assert_eq!(config, MeshConfig::default());
        assert_eq!(config.reconnect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_custom_values() {
        let vars = HashMap::from([
            (
                "MESH_RELAY_URL".to_string(),
                "wss://meet.example.com/ws".to_string(),
            ),
            ("MESH_RECONNECT_TIMEOUT_MS".to_string(), "2500".to_string()),
        ]);
        let config = MeshConfig::from_vars(&vars).unwrap();
        assert_eq!(config.relay_url, "wss://meet.example.com/ws");
        assert_eq!(config.reconnect_timeout, Duration::from_millis(2500));
        assert_eq!(config.http_base_url(), "https://meet.example.com");
    }

    #[test]
    fn test_invalid_timeout_rejected() {
        for raw in ["soon", "0", "-5"] {
            let vars = HashMap::from([("MESH_RECONNECT_TIMEOUT_MS".to_string(), raw.to_string())]);
            assert!(
                matches!(MeshConfig::from_vars(&vars), Err(ConfigError::InvalidValue(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_invalid_url_rejected() {
        let vars = HashMap::from([(
            "MESH_RELAY_URL".to_string(),
            "http://127.0.0.1:3000/ws".to_string(),
        )]);
        assert!(MeshConfig::from_vars(&vars).is_err());
    }

    #[test]
    fn test_http_base_url_plain() {
        assert_eq!(
            MeshConfig::default().http_base_url(),
            "http://127.0.0.1:3000"
        );
    }
}
