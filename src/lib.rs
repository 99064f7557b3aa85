//! Crawl Fetcher Library
//!
//! This library provides the HTTP fetch subsystem of a distributed crawl worker:
//! given a candidate URL it performs a pooled, policy-bounded HTTP retrieval and
//! returns a classified result the crawler's parsing and scheduling stages can
//! switch on.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`fetch`] - Connection pool, idle reaper, content decoder, response classifier
//!   and the [`FetchClient`] that orchestrates them
//! - [`canonical`] - URL canonicalization consumed for redirects and fetched URLs
//!
//! Robots.txt policy, content parsing, the crawl frontier and page storage live
//! outside this crate.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod canonical;
pub mod fetch;
mod user_agent;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use canonical::{Canonicalizer, UrlCanonicalizer, canonicalize};
pub use fetch::{
    ClientError, DocId, FetchClient, FetchConfig, FetchRequest, FetchResult, IdleReaperSettings,
    PoolStats, ProxyConfig,
};
