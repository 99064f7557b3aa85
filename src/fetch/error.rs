//! Error types for the fetch module.
//!
//! None of these escape [`FetchClient::fetch`](super::FetchClient::fetch): they are
//! converted into a [`FetchResult`](super::FetchResult) variant at the fetch boundary.
//! They are public so the pool and classifier can be used on their own.

use std::time::Duration;

use thiserror::Error;

use super::pool::Destination;

/// Boxed error returned by [`Connector`](super::Connector) implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the [`ConnectionPool`](super::ConnectionPool).
#[derive(Debug, Error)]
pub enum PoolError {
    /// The destination's scheme is not registered (e.g. `https` without `include_https`).
    #[error("scheme `{scheme}` is not registered with the connection pool")]
    SchemeUnsupported {
        /// The rejected scheme.
        scheme: String,
    },

    /// No connection slot freed up before the connection timeout elapsed.
    #[error("connection pool exhausted for {destination} after waiting {waited:?}")]
    Exhausted {
        /// The destination that could not be served.
        destination: Destination,
        /// How long the caller waited for a slot.
        waited: Duration,
    },

    /// The pool was shut down and rejects further acquisitions.
    #[error("connection pool has been shut down")]
    Shutdown,

    /// The connector failed to open a connection for a reserved slot.
    #[error("failed to open connection to {destination}: {source}")]
    Connect {
        /// The destination the connection was opened for.
        destination: Destination,
        /// The connector's error.
        #[source]
        source: BoxError,
    },
}

impl PoolError {
    /// Creates a scheme-unsupported error.
    pub fn scheme_unsupported(scheme: impl Into<String>) -> Self {
        Self::SchemeUnsupported {
            scheme: scheme.into(),
        }
    }

    /// Creates a pool-exhausted error.
    pub fn exhausted(destination: Destination, waited: Duration) -> Self {
        Self::Exhausted {
            destination,
            waited,
        }
    }

    /// Creates a connect error.
    pub fn connect(destination: Destination, source: BoxError) -> Self {
        Self::Connect {
            destination,
            source,
        }
    }
}

/// Errors raised while performing a single fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request URL could not be parsed or has no host.
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The transport failed before any response was obtained (connect, timeout, reset).
    #[error("transport error fetching {url}: {source}")]
    Transport {
        /// The URL being fetched.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The transport failed while the body was streaming.
    #[error("connection failed mid-body fetching {url}: {source}")]
    Body {
        /// The URL being fetched.
        url: String,
        /// The underlying IO error wrapping the transport error.
        #[source]
        source: std::io::Error,
    },

    /// The body could not be decoded (corrupt gzip data).
    #[error("failed to decode body of {url}: {source}")]
    Decode {
        /// The URL being fetched.
        url: String,
        /// The decoder's error.
        #[source]
        source: std::io::Error,
    },

    /// The `Content-Length` header is not a valid length.
    #[error("invalid Content-Length `{value}` fetching {url}")]
    InvalidContentLength {
        /// The URL being fetched.
        url: String,
        /// The raw header value.
        value: String,
    },
}

impl FetchError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.into(),
            source,
        }
    }

    /// Creates an error for a failure while reading the body stream.
    ///
    /// Body streams carry transport errors wrapped in `std::io::Error`; those become
    /// [`FetchError::Body`]. Anything else came from the decoder and becomes
    /// [`FetchError::Decode`].
    pub fn body_stream(url: impl Into<String>, source: std::io::Error) -> Self {
        let from_transport = source
            .get_ref()
            .is_some_and(|inner| inner.is::<reqwest::Error>());
        if from_transport {
            Self::Body {
                url: url.into(),
                source,
            }
        } else {
            Self::Decode {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates an invalid Content-Length error.
    pub fn invalid_content_length(url: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidContentLength {
            url: url.into(),
            value: value.into(),
        }
    }

    /// Returns true when the connection used for the exchange can no longer be trusted
    /// and must be discarded rather than returned to the idle set.
    #[must_use]
    pub fn breaks_connection(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Body { .. })
    }
}

/// Invalid [`FetchConfig`](super::FetchConfig) value.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds a value outside its accepted range.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an invalid-field error.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors raised while constructing a [`FetchClient`](super::FetchClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The client was created outside a Tokio runtime, so the idle reaper cannot be spawned.
    #[error("fetch client must be created inside a Tokio runtime")]
    NoRuntime,
}
