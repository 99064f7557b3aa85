//! Pooled HTTP fetch subsystem of the crawl worker.
//!
//! Given a URL, [`FetchClient::fetch`] performs one bounded HTTP retrieval and returns
//! a [`FetchResult`] the crawler can switch on. The pieces, leaf first:
//!
//! - [`decoder`] undoes `Content-Encoding: gzip` as the body streams
//! - [`ConnectionPool`] caps and reuses connections per destination and in aggregate
//! - [`IdleReaper`] periodically closes connections idle for too long
//! - [`classify_response`] maps a received response onto the result taxonomy
//! - [`FetchClient`] ties them together and owns the pool and reaper
//!
//! # Example
//!
//! ```no_run
//! use crawl_fetcher::fetch::{DocId, FetchClient, FetchConfig, FetchRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = FetchClient::new(FetchConfig {
//!     max_connections_per_host: 4,
//!     ..FetchConfig::default()
//! })?;
//!
//! let request = FetchRequest::new("http://example.com/").with_parent(DocId(7));
//! let result = client.fetch(&request).await;
//! println!("{} {}", result.status_code(), result.kind());
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod classifier;
mod client;
mod config;
pub mod constants;
pub mod decoder;
mod error;
mod pool;
mod reaper;
mod result;

pub use classifier::{
    Disposition, ResponseHead, classify_response, effective_fetched_url, exceeds_limit,
};
pub use client::{FetchClient, ReqwestConnector};
pub use config::{FetchConfig, ProxyConfig};
pub use error::{BoxError, ClientError, ConfigError, FetchError, PoolError};
pub use pool::{
    ConnectionPool, ConnectionState, Connector, Destination, HostStats, Lease, PoolSettings,
    PoolStats, PooledConnection,
};
pub use reaper::{IdleReaper, IdleReaperSettings, IdleSweep};
pub use result::{DocId, FetchRequest, FetchResult};
