//! URL canonicalization used to resolve redirects and compare fetched URLs.
//!
//! The crawler's full canonicalization rules live with the frontier; the fetcher only
//! consumes them through the [`Canonicalizer`] trait. [`UrlCanonicalizer`] is the
//! default implementation and applies the WHATWG URL normalizations:
//! relative references are resolved against the base, scheme and host are
//! lowercased, default ports and dot segments are removed, an empty path becomes
//! `/`, and the fragment is dropped.
//!
//! # Example
//!
//! ```
//! use crawl_fetcher::canonical::canonicalize;
//!
//! assert_eq!(
//!     canonicalize("../next?page=2#top", Some("http://Example.com:80/docs/a/index.html")),
//!     Some("http://example.com/docs/next?page=2".to_string())
//! );
//! ```

use url::Url;

/// Resolves a URL (optionally relative to a base) to its canonical absolute form.
pub trait Canonicalizer: Send + Sync {
    /// Returns the canonical form of `url`, or `None` when it cannot be resolved.
    fn canonicalize(&self, url: &str, base: Option<&str>) -> Option<String>;
}

/// Default [`Canonicalizer`] backed by the `url` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlCanonicalizer;

impl Canonicalizer for UrlCanonicalizer {
    fn canonicalize(&self, url: &str, base: Option<&str>) -> Option<String> {
        let base = base.and_then(|b| Url::parse(b.trim()).ok());
        let mut resolved = Url::options()
            .base_url(base.as_ref())
            .parse(url.trim())
            .ok()?;
        if resolved.cannot_be_a_base() {
            return None;
        }
        resolved.set_fragment(None);
        Some(resolved.into())
    }
}

/// Canonicalizes with the default [`UrlCanonicalizer`].
#[must_use]
pub fn canonicalize(url: &str, base: Option<&str>) -> Option<String> {
    UrlCanonicalizer.canonicalize(url, base)
}
