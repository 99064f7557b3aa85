//! Fetch inputs and the classified outcome of one fetch.

use std::fmt;

use bytes::Bytes;

use super::constants::{
    STATUS_FATAL_TRANSPORT_ERROR, STATUS_PAGE_TOO_BIG, STATUS_POOL_EXHAUSTED,
    STATUS_SCHEME_UNSUPPORTED, STATUS_UNKNOWN_ERROR,
};
use super::error::{FetchError, PoolError};

/// Opaque id of the document in which a URL was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocId(pub u64);

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One URL to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// The URL to retrieve.
    pub url: String,
    /// The document the URL was found in, for log context.
    pub parent_doc_id: Option<DocId>,
}

impl FetchRequest {
    /// Creates a request without a parent document.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            parent_doc_id: None,
        }
    }

    /// Records the document the URL was discovered in.
    #[must_use]
    pub fn with_parent(mut self, parent_doc_id: DocId) -> Self {
        self.parent_doc_id = Some(parent_doc_id);
        self
    }
}

/// Classified outcome of one fetch. Exactly one case applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    /// HTTP 200 with its decoded body.
    Ok {
        /// The URL that served the body: the requested URL unless a followed redirect
        /// led to a canonically different one.
        fetched_url: String,
        /// Response headers in received order.
        headers: Vec<(String, String)>,
        /// Decoded body.
        body: Bytes,
    },
    /// HTTP 301/302.
    Redirect {
        /// 301 or 302.
        status_code: u16,
        /// Canonical absolute redirect target.
        moved_to: String,
    },
    /// HTTP 404.
    NotFound,
    /// Any other status that is not a usable page.
    HttpStatus {
        /// The received status code.
        code: u16,
    },
    /// The body exceeded the download size cap.
    TooBig,
    /// Connect or IO failure before a response was obtained.
    FatalTransportError {
        /// Transport error description.
        message: String,
    },
    /// The URL's scheme is not registered with the pool.
    SchemeUnsupported {
        /// The rejected scheme.
        scheme: String,
    },
    /// No pooled connection became available within the connection timeout.
    PoolExhausted,
    /// Any failure that fits no other case.
    Unknown {
        /// Description, when one is available.
        message: Option<String>,
    },
}

impl FetchResult {
    /// Numeric status: the HTTP code where one exists, the crawler's custom code otherwise.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Ok { .. } => 200,
            Self::Redirect { status_code, .. } => *status_code,
            Self::NotFound => 404,
            Self::HttpStatus { code } => *code,
            Self::TooBig => STATUS_PAGE_TOO_BIG,
            Self::FatalTransportError { .. } => STATUS_FATAL_TRANSPORT_ERROR,
            Self::SchemeUnsupported { .. } => STATUS_SCHEME_UNSUPPORTED,
            Self::PoolExhausted => STATUS_POOL_EXHAUSTED,
            Self::Unknown { .. } => STATUS_UNKNOWN_ERROR,
        }
    }

    /// Stable lowercase label of the case.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ok { .. } => "ok",
            Self::Redirect { .. } => "redirect",
            Self::NotFound => "not_found",
            Self::HttpStatus { .. } => "http_status",
            Self::TooBig => "too_big",
            Self::FatalTransportError { .. } => "fatal_transport_error",
            Self::SchemeUnsupported { .. } => "scheme_unsupported",
            Self::PoolExhausted => "pool_exhausted",
            Self::Unknown { .. } => "unknown",
        }
    }

    /// Returns true for [`FetchResult::Ok`].
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// Body of an `Ok` result.
    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        match self {
            Self::Ok { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Fetched URL of an `Ok` result.
    #[must_use]
    pub fn fetched_url(&self) -> Option<&str> {
        match self {
            Self::Ok { fetched_url, .. } => Some(fetched_url),
            _ => None,
        }
    }

    /// First value of header `name` (case-insensitive) of an `Ok` result.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        match self {
            Self::Ok { headers, .. } => headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str()),
            _ => None,
        }
    }

    pub(crate) fn from_fetch_error(error: &FetchError) -> Self {
        match error {
            FetchError::Transport { source, .. } => Self::FatalTransportError {
                message: source.to_string(),
            },
            other => Self::Unknown {
                message: Some(other.to_string()),
            },
        }
    }

    pub(crate) fn from_pool_error(error: &PoolError) -> Self {
        match error {
            PoolError::SchemeUnsupported { scheme } => Self::SchemeUnsupported {
                scheme: scheme.clone(),
            },
            PoolError::Exhausted { .. } => Self::PoolExhausted,
            other => Self::Unknown {
                message: Some(other.to_string()),
            },
        }
    }
}

impl fmt::Display for FetchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok { body, .. } => write!(f, "ok ({} bytes)", body.len()),
            Self::Redirect {
                status_code,
                moved_to,
            } => write!(f, "redirect {status_code} -> {moved_to}"),
            Self::HttpStatus { code } => write!(f, "http status {code}"),
            Self::FatalTransportError { message } => {
                write!(f, "fatal transport error: {message}")
            }
            Self::SchemeUnsupported { scheme } => write!(f, "scheme `{scheme}` unsupported"),
            Self::Unknown {
                message: Some(message),
            } => write!(f, "unknown error: {message}"),
            other => f.write_str(other.kind()),
        }
    }
}
