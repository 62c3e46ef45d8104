//! STUN/TURN endpoint lookup for `GET /api/ice-servers`.
//!
//! With a provider configured, each request asks the provider for fresh
//! short-lived TURN credentials. Without one, the configured fallback
//! STUN list is served as-is.

use crate::config::IceProviderConfig;
use crate::errors::RelayError;
use crate::observability::metrics;
use async_trait::async_trait;
use common::secret::ExposeSecret;
use serde::Deserialize;
use signaling_protocol::ice::{deserialize_servers, IceServer};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, trace, warn};

/// Total timeout for one provider request.
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect timeout for the provider.
const PROVIDER_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of the endpoint list handed to browsers.
#[async_trait]
pub trait IceServerSource: Send + Sync {
    /// Current STUN/TURN endpoints.
    async fn ice_servers(&self) -> Result<Vec<IceServer>, RelayError>;
}

/// Fixed list, used when no provider is configured.
#[derive(Debug, Clone)]
pub struct StaticIceServers {
    servers: Vec<IceServer>,
}

impl StaticIceServers {
    /// One anonymous server group holding every fallback URL.
    #[must_use]
    pub fn from_urls(urls: Vec<String>) -> Self {
        let servers = if urls.is_empty() {
            Vec::new()
        } else {
            vec![IceServer::anonymous(urls)]
        };
        Self { servers }
    }
}

#[async_trait]
impl IceServerSource for StaticIceServers {
    async fn ice_servers(&self) -> Result<Vec<IceServer>, RelayError> {
        Ok(self.servers.clone())
    }
}

#[derive(Debug, Deserialize)]
struct ProviderEnvelope {
    #[serde(default)]
    s: Option<String>,
    v: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderServers {
    #[serde(deserialize_with = "deserialize_servers")]
    ice_servers: Vec<IceServer>,
}

/// Client for the external relay-credential provider.
///
/// Issues `PUT {url}/_turn/{channel}` with basic auth and a
/// `{"format":"urls"}` body; the endpoints come back under `v.iceServers`.
pub struct ProviderClient {
    config: IceProviderConfig,
    http_client: reqwest::Client,
}

impl ProviderClient {
    /// Build a client with the relay's request timeouts.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Config` if the HTTP client cannot be built.
    pub fn new(config: IceProviderConfig) -> Result<Self, RelayError> {
        let http_client = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .connect_timeout(PROVIDER_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    async fn fetch(&self) -> Result<Vec<IceServer>, RelayError> {
        let url = format!("{}/_turn/{}", self.config.url, self.config.channel);

        debug!(
            target: "relay.ice",
            url = %url,
            channel = %self.config.channel,
            "Requesting ICE servers from provider"
        );

        let response = self
            .http_client
            .put(&url)
            .basic_auth(
                &self.config.username,
                Some(self.config.secret.expose_secret()),
            )
            .json(&serde_json::json!({ "format": "urls" }))
            .send()
            .await
            .map_err(|e| RelayError::CredentialProvider(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            // Body may echo account details.
            trace!(target: "relay.ice", body = %body, "Provider error body");
            return Err(RelayError::CredentialProvider(format!("status {status}")));
        }

        let envelope: ProviderEnvelope = response
            .json()
            .await
            .map_err(|e| RelayError::CredentialProvider(format!("invalid response: {e}")))?;

        if let Some(s) = envelope.s.as_deref() {
            if s != "ok" {
                return Err(RelayError::CredentialProvider(format!(
                    "provider status {s}"
                )));
            }
        }

        let servers: ProviderServers = serde_json::from_value(envelope.v)
            .map_err(|e| RelayError::CredentialProvider(format!("invalid response: {e}")))?;
        Ok(servers.ice_servers)
    }
}

#[async_trait]
impl IceServerSource for ProviderClient {
    #[instrument(skip_all, name = "relay.ice.fetch")]
    async fn ice_servers(&self) -> Result<Vec<IceServer>, RelayError> {
        let start = Instant::now();
        let result = self.fetch().await;

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_ice_provider_request(status, start.elapsed());

        match &result {
            Ok(servers) => debug!(
                target: "relay.ice",
                count = servers.len(),
                "ICE servers fetched"
            ),
            Err(e) => warn!(target: "relay.ice", error = %e, "ICE server fetch failed"),
        }
        result
    }
}

/// Mock ICE server source for testing.
pub mod mock {

    use super::{async_trait, IceServer, IceServerSource, RelayError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock source that returns canned servers or fails.
    pub struct MockIceServers {
        servers: Option<Vec<IceServer>>,
        calls: AtomicUsize,
    }

    impl MockIceServers {
        #[must_use]
        pub fn returning(servers: Vec<IceServer>) -> Self {
            Self {
                servers: Some(servers),
                calls: AtomicUsize::new(0),
            }
        }

        #[must_use]
        pub fn failing() -> Self {
            Self {
                servers: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IceServerSource for MockIceServers {
        async fn ice_servers(&self) -> Result<Vec<IceServer>, RelayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.servers
                .clone()
                .ok_or_else(|| RelayError::CredentialProvider("mock failure".to_string()))
        }
    }
}
