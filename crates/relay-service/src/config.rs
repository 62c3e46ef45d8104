//! Relay configuration.
//!
//! Configuration is loaded from environment variables. The relay-credential
//! provider secret is redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Default maximum members per room.
pub const DEFAULT_ROOM_CAPACITY: usize = 200;

/// Default maximum inbound frame size in bytes.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Default channel name sent to the relay-credential provider.
pub const DEFAULT_ICE_CHANNEL: &str = "mesh";

/// Default STUN endpoint served when no provider is configured.
pub const DEFAULT_ICE_FALLBACK_URLS: &str = "stun:stun.l.google.com:19302";

/// Credentials for the external relay-credential provider.
#[derive(Clone)]
pub struct IceProviderConfig {
    /// Provider base URL (e.g. `https://global.xirsys.net`).
    pub url: String,
    /// Channel identity the endpoints are issued for.
    pub channel: String,
    /// Basic-auth user name.
    pub username: String,
    /// Basic-auth secret.
    pub secret: SecretString,
}

impl fmt::Debug for IceProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IceProviderConfig")
            .field("url", &self.url)
            .field("channel", &self.channel)
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP/WebSocket bind address (default: "0.0.0.0:3000").
    pub bind_address: String,

    /// Maximum members per room (default: 200).
    pub room_capacity: usize,

    /// Largest inbound frame accepted, in bytes (default: 65536).
    pub max_message_bytes: usize,

    /// Emit JSON logs instead of human-readable lines.
    pub log_json: bool,

    /// External relay-credential provider. `None` serves the fallback list.
    pub ice_provider: Option<IceProviderConfig>,

    /// STUN/TURN URLs served when no provider is configured.
    pub ice_fallback_urls: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("RELAY_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let room_capacity = parse_or(vars, "RELAY_ROOM_CAPACITY", DEFAULT_ROOM_CAPACITY)?;
        if room_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "RELAY_ROOM_CAPACITY must be greater than 0".to_string(),
            ));
        }

        let max_message_bytes =
            parse_or(vars, "RELAY_MAX_MESSAGE_BYTES", DEFAULT_MAX_MESSAGE_BYTES)?;
        if max_message_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "RELAY_MAX_MESSAGE_BYTES must be greater than 0".to_string(),
            ));
        }

        let log_json = parse_or(vars, "RELAY_LOG_JSON", false)?;

        // Provider is all-or-nothing: a URL without credentials is a mistake.
        let ice_provider = match vars.get("ICE_PROVIDER_URL") {
            None => None,
            Some(url) => {
                let username = vars
                    .get("ICE_PROVIDER_USERNAME")
                    .ok_or_else(|| ConfigError::MissingEnvVar("ICE_PROVIDER_USERNAME".to_string()))?
                    .clone();
                let secret = SecretString::from(
                    vars.get("ICE_PROVIDER_SECRET")
                        .ok_or_else(|| {
                            ConfigError::MissingEnvVar("ICE_PROVIDER_SECRET".to_string())
                        })?
                        .clone(),
                );
                let channel = vars
                    .get("ICE_PROVIDER_CHANNEL")
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_ICE_CHANNEL.to_string());
                Some(IceProviderConfig {
                    url: url.trim_end_matches('/').to_string(),
                    channel,
                    username,
                    secret,
                })
            }
        };

        let ice_fallback_urls = vars
            .get("ICE_FALLBACK_URLS")
            .map_or(DEFAULT_ICE_FALLBACK_URLS, String::as_str)
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect();

        Ok(Config {
            bind_address,
            room_capacity,
            max_message_bytes,
            log_json,
            ice_provider,
            ice_fallback_urls,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn provider_vars() -> HashMap<String, String> {
        HashMap::from([
            (
                "ICE_PROVIDER_URL".to_string(),
                "https://global.xirsys.net/".to_string(),
            ),
            ("ICE_PROVIDER_USERNAME".to_string(), "mesh-user".to_string()),
            (
                "ICE_PROVIDER_SECRET".to_string(),
                "c2VjcmV0LXR1cm4ta2V5".to_string(),
            ),
        ])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load successfully");

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.room_capacity, DEFAULT_ROOM_CAPACITY);
        assert_eq!(config.max_message_bytes, DEFAULT_MAX_MESSAGE_BYTES);
        assert!(!config.log_json);
        assert!(config.ice_provider.is_none());
        assert_eq!(config.ice_fallback_urls, vec![DEFAULT_ICE_FALLBACK_URLS]);
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = provider_vars();
        vars.insert("RELAY_BIND_ADDRESS".to_string(), "127.0.0.1:8443".to_string());
        vars.insert("RELAY_ROOM_CAPACITY".to_string(), "8".to_string());
        vars.insert("RELAY_MAX_MESSAGE_BYTES".to_string(), "4096".to_string());
        vars.insert("RELAY_LOG_JSON".to_string(), "true".to_string());
        vars.insert("ICE_PROVIDER_CHANNEL".to_string(), "standup".to_string());
        vars.insert(
            "ICE_FALLBACK_URLS".to_string(),
            "stun:a.example:3478, stun:b.example:3478,".to_string(),
        );

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.bind_address, "127.0.0.1:8443");
        assert_eq!(config.room_capacity, 8);
        assert_eq!(config.max_message_bytes, 4096);
        assert!(config.log_json);
        assert_eq!(
            config.ice_fallback_urls,
            vec!["stun:a.example:3478", "stun:b.example:3478"]
        );

        let provider = config.ice_provider.expect("provider configured");
        assert_eq!(provider.url, "https://global.xirsys.net");
        assert_eq!(provider.channel, "standup");
        assert_eq!(provider.username, "mesh-user");
        assert_eq!(provider.secret.expose_secret(), "c2VjcmV0LXR1cm4ta2V5");
    }

    #[test]
    fn test_provider_channel_defaults() {
        let config = Config::from_vars(&provider_vars()).unwrap();
        assert_eq!(config.ice_provider.unwrap().channel, DEFAULT_ICE_CHANNEL);
    }

    #[test]
    fn test_from_vars_provider_missing_secret() {
        let mut vars = provider_vars();
        vars.remove("ICE_PROVIDER_SECRET");

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "ICE_PROVIDER_SECRET"));
    }

    #[test]
    fn test_from_vars_provider_missing_username() {
        let mut vars = provider_vars();
        vars.remove("ICE_PROVIDER_USERNAME");

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "ICE_PROVIDER_USERNAME")
        );
    }

    #[test]
    fn test_from_vars_rejects_invalid_numbers() {
        let vars = HashMap::from([("RELAY_ROOM_CAPACITY".to_string(), "lots".to_string())]);
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));

        let vars = HashMap::from([("RELAY_ROOM_CAPACITY".to_string(), "0".to_string())]);
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));

        let vars = HashMap::from([("RELAY_MAX_MESSAGE_BYTES".to_string(), "-1".to_string())]);
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_debug_redacts_sensitive_fields() {
        let config = Config::from_vars(&provider_vars()).expect("Config should load successfully");

        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("c2VjcmV0LXR1cm4ta2V5"));
        assert!(debug_output.contains("mesh-user"));
    }
}
