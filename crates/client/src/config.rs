//! Client configuration: where the hub lives and how to reach it.

use std::time::Duration;

use realmsync_shared::{http_base_url, hub_url_for_host};
use url::Url;

use crate::error::ClientError;
use crate::transport::ReconnectPolicy;

pub const ENV_HOST: &str = "REALMSYNC_HOST";
pub const ENV_HUB_URL: &str = "REALMSYNC_HUB_URL";
pub const ENV_API_URL: &str = "REALMSYNC_API_URL";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "REALMSYNC_CONNECT_TIMEOUT_MS";
pub const ENV_INVOKE_TIMEOUT_MS: &str = "REALMSYNC_INVOKE_TIMEOUT_MS";

pub const DEFAULT_HOST: &str = "localhost:5000";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket address of the realm hub
    pub hub_url: String,
    /// Base URL for one-shot HTTP calls
    pub api_base_url: String,
    pub reconnect: ReconnectPolicy,
    pub connect_timeout: Duration,
    pub invoke_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::for_host(DEFAULT_HOST)
    }
}

impl ClientConfig {
    /// Derive hub and API URLs from a bare host (or absolute URL).
    ///
    /// Local and private addresses get plain `ws`/`http`.
    pub fn for_host(host: &str) -> Self {
        Self {
            hub_url: hub_url_for_host(host),
            api_base_url: http_base_url(host),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            invoke_timeout: DEFAULT_INVOKE_TIMEOUT,
        }
    }

    /// Load from environment with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let host = lookup(ENV_HOST).unwrap_or_else(|| DEFAULT_HOST.to_string());
        let mut config = Self::for_host(&host);

        if let Some(url) = lookup(ENV_HUB_URL) {
            config.hub_url = url;
        }
        if let Some(url) = lookup(ENV_API_URL) {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(ms) = lookup(ENV_CONNECT_TIMEOUT_MS).and_then(|v| v.parse().ok()) {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = lookup(ENV_INVOKE_TIMEOUT_MS).and_then(|v| v.parse().ok()) {
            config.invoke_timeout = Duration::from_millis(ms);
        }

        config
    }

    /// Check that both URLs parse and use the expected schemes
    pub fn validate(&self) -> Result<(), ClientError> {
        let hub = Url::parse(&self.hub_url)
            .map_err(|e| ClientError::Config(format!("hub url `{}`: {e}", self.hub_url)))?;
        if !matches!(hub.scheme(), "ws" | "wss") {
            return Err(ClientError::Config(format!(
                "hub url must use ws or wss, got `{}`",
                hub.scheme()
            )));
        }

        let api = Url::parse(&self.api_base_url)
            .map_err(|e| ClientError::Config(format!("api url `{}`: {e}", self.api_base_url)))?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(ClientError::Config(format!(
                "api url must use http or https, got `{}`",
                api.scheme()
            )));
        }

        Ok(())
    }
}
