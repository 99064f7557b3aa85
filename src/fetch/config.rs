//! Fetch configuration.
//!
//! A [`FetchConfig`] is built once (by the worker's configuration loader or the CLI)
//! and handed to [`FetchClient`](super::FetchClient), which shares it read-only with
//! every fetch and pooled connection. Durations are expressed in milliseconds when
//! (de)serialized.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::constants::{
    DEFAULT_CONNECTION_TIMEOUT, DEFAULT_MAX_CONNECTIONS_PER_HOST, DEFAULT_MAX_DOWNLOAD_SIZE_BYTES,
    DEFAULT_MAX_TOTAL_CONNECTIONS, DEFAULT_SOCKET_TIMEOUT,
};
use super::error::ConfigError;
use crate::user_agent;

/// Settings for one fetch client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Hard cap on live connections across all destinations.
    pub max_total_connections: usize,
    /// Hard cap on live connections to one destination.
    pub max_connections_per_host: usize,
    /// Maximum time a read on an established connection may block.
    #[serde(rename = "socket_timeout_ms", with = "duration_ms")]
    pub socket_timeout: Duration,
    /// Maximum time to establish a connection, and to wait for a free pool slot.
    #[serde(rename = "connection_timeout_ms", with = "duration_ms")]
    pub connection_timeout: Duration,
    /// Let the transport follow redirects before classification.
    pub follow_redirects: bool,
    /// `User-Agent` request header.
    pub user_agent: String,
    /// Register the `https` scheme with the pool.
    pub include_https: bool,
    /// Bodies larger than this are rejected with `TooBig`.
    pub max_download_size_bytes: u64,
    /// Optional outbound proxy.
    pub proxy: Option<ProxyConfig>,
}

/// Outbound HTTP proxy with optional credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy host name or address.
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Username for proxy authentication.
    #[serde(default)]
    pub username: Option<String>,
    /// Password for proxy authentication.
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Creates a proxy without credentials.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    /// Adds credentials to the proxy.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Returns the proxy URL used by the transport.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_total_connections: DEFAULT_MAX_TOTAL_CONNECTIONS,
            max_connections_per_host: DEFAULT_MAX_CONNECTIONS_PER_HOST,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            follow_redirects: true,
            user_agent: user_agent::default_fetch_user_agent(),
            include_https: false,
            max_download_size_bytes: DEFAULT_MAX_DOWNLOAD_SIZE_BYTES,
            proxy: None,
        }
    }
}

impl FetchConfig {
    /// Returns the URL schemes the connection pool accepts.
    ///
    /// `http` is always registered; `https` only when [`include_https`](Self::include_https) is set.
    #[must_use]
    pub fn registered_schemes(&self) -> Vec<&'static str> {
        if self.include_https {
            vec!["http", "https"]
        } else {
            vec!["http"]
        }
    }

    /// Validates values against the pool and transport constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_total_connections == 0 {
            return Err(ConfigError::invalid(
                "max_total_connections",
                "must be at least 1",
            ));
        }
        if self.max_connections_per_host == 0 {
            return Err(ConfigError::invalid(
                "max_connections_per_host",
                "must be at least 1",
            ));
        }
        if self.max_connections_per_host > self.max_total_connections {
            return Err(ConfigError::invalid(
                "max_connections_per_host",
                format!(
                    "{} exceeds max_total_connections ({})",
                    self.max_connections_per_host, self.max_total_connections
                ),
            ));
        }
        if self.socket_timeout.is_zero() {
            return Err(ConfigError::invalid("socket_timeout", "must be non-zero"));
        }
        if self.connection_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "connection_timeout",
                "must be non-zero",
            ));
        }
        if self.max_download_size_bytes == 0 {
            return Err(ConfigError::invalid(
                "max_download_size_bytes",
                "must be at least 1",
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::invalid("user_agent", "must not be empty"));
        }
        if let Some(proxy) = &self.proxy {
            if proxy.host.trim().is_empty() {
                return Err(ConfigError::invalid("proxy.host", "must not be empty"));
            }
            if proxy.port == 0 {
                return Err(ConfigError::invalid("proxy.port", "must be non-zero"));
            }
            if proxy.password.is_some() && proxy.username.is_none() {
                return Err(ConfigError::invalid(
                    "proxy.password",
                    "set without proxy.username",
                ));
            }
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
