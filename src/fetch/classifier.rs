//! Pure response classification.
//!
//! [`classify_response`] maps a received status line and headers onto a
//! [`Disposition`], the decision the fetch client acts on. It performs no IO; the
//! client is responsible for streaming the body of an accepted response and for
//! re-checking the size cap against bytes actually read.
//!
//! Evaluation order:
//!
//! 1. `404` is [`Disposition::NotFound`].
//! 2. `301`/`302` with a resolvable `Location` is [`Disposition::Redirect`], before any
//!    size check. Without one the status falls through to rule 4.
//! 3. `200` is accepted unless its declared size exceeds the cap
//!    ([`Disposition::TooBig`]).
//! 4. Anything else is [`Disposition::HttpStatus`].

use reqwest::header::{CONTENT_LENGTH, HeaderMap, LOCATION};

use super::error::FetchError;
use crate::canonical::Canonicalizer;

/// The parts of a received response the classifier looks at.
#[derive(Debug, Clone)]
pub struct ResponseHead<'a> {
    /// HTTP status code.
    pub status: u16,
    /// URL the fetch was requested for.
    pub request_url: &'a str,
    /// URL that actually served the response, after any followed redirects.
    /// Relative `Location` targets resolve against it.
    pub final_url: &'a str,
    /// Response headers.
    pub headers: &'a HeaderMap,
    /// Entity length reported by the transport, if known.
    pub entity_length: Option<u64>,
}

/// Classification decision for a received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// HTTP 404.
    NotFound,
    /// HTTP 301/302 with a canonicalized absolute target.
    Redirect {
        /// 301 or 302.
        status_code: u16,
        /// Canonical redirect target.
        moved_to: String,
    },
    /// Any other status that is not accepted.
    HttpStatus {
        /// The received status code.
        code: u16,
    },
    /// HTTP 200 whose declared size exceeds the cap.
    TooBig {
        /// The declared body size.
        declared_size: u64,
    },
    /// HTTP 200 whose body should be streamed.
    Accept {
        /// URL to report as fetched.
        fetched_url: String,
        /// Declared body size, when known.
        declared_size: Option<u64>,
    },
}

/// Classifies a received response.
///
/// # Errors
///
/// Returns [`FetchError::InvalidContentLength`] when a 200 response carries a
/// `Content-Length` that is not a non-negative integer.
pub fn classify_response(
    head: &ResponseHead<'_>,
    max_download_size_bytes: u64,
    canonicalizer: &dyn Canonicalizer,
) -> Result<Disposition, FetchError> {
    match head.status {
        404 => Ok(Disposition::NotFound),
        301 | 302 => Ok(redirect_target(head, canonicalizer).map_or(
            Disposition::HttpStatus { code: head.status },
            |moved_to| Disposition::Redirect {
                status_code: head.status,
                moved_to,
            },
        )),
        200 => {
            let fetched_url =
                effective_fetched_url(head.request_url, head.final_url, canonicalizer);
            let declared_size = declared_size(head)?;
            match declared_size {
                Some(size) if exceeds_limit(size, max_download_size_bytes) => {
                    Ok(Disposition::TooBig {
                        declared_size: size,
                    })
                }
                _ => Ok(Disposition::Accept {
                    fetched_url,
                    declared_size,
                }),
            }
        }
        code => Ok(Disposition::HttpStatus { code }),
    }
}

fn redirect_target(head: &ResponseHead<'_>, canonicalizer: &dyn Canonicalizer) -> Option<String> {
    let location = head.headers.get(LOCATION)?.to_str().ok()?;
    canonicalizer.canonicalize(location, Some(head.final_url))
}

/// Returns the URL to record as fetched.
///
/// The final URL is reported only when it differs from the requested URL and its
/// canonical form differs too; otherwise the requested URL is kept.
#[must_use]
pub fn effective_fetched_url(
    request_url: &str,
    final_url: &str,
    canonicalizer: &dyn Canonicalizer,
) -> String {
    if final_url == request_url {
        return request_url.to_string();
    }
    match canonicalizer.canonicalize(final_url, None) {
        Some(canonical) if canonical == request_url => request_url.to_string(),
        _ => final_url.to_string(),
    }
}

/// Declared body size: the transport's entity length, else the last `Content-Length`.
fn declared_size(head: &ResponseHead<'_>) -> Result<Option<u64>, FetchError> {
    if let Some(length) = head.entity_length {
        return Ok(Some(length));
    }
    let Some(value) = head.headers.get_all(CONTENT_LENGTH).iter().last() else {
        return Ok(None);
    };
    let raw = value.to_str().unwrap_or_default().trim();
    raw.parse::<u64>()
        .map(Some)
        .map_err(|_| FetchError::invalid_content_length(head.request_url, raw))
}

/// Returns true when `size` bytes exceed the download cap.
#[must_use]
pub fn exceeds_limit(size: u64, max_download_size_bytes: u64) -> bool {
    size > max_download_size_bytes
}
