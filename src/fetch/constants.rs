//! Constants for the fetch module (pool limits, timeouts, reaper cadence, custom status codes).

use std::time::Duration;

/// Default cap on live connections across all hosts.
pub const DEFAULT_MAX_TOTAL_CONNECTIONS: usize = 100;

/// Default cap on live connections to a single destination.
pub const DEFAULT_MAX_CONNECTIONS_PER_HOST: usize = 100;

/// Default socket (read) timeout (20 seconds).
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(20);

/// Default connection timeout (30 seconds), also the longest a fetch waits for a pool slot.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum body size (1 MiB).
pub const DEFAULT_MAX_DOWNLOAD_SIZE_BYTES: u64 = 1_048_576;

/// Default cadence of the idle reaper.
pub const DEFAULT_IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Default age after which an idle pooled connection is closed.
pub const DEFAULT_MAX_IDLE_AGE: Duration = Duration::from_secs(30);

/// Redirect hops a fetch follows when `follow_redirects` is enabled.
pub const MAX_REDIRECTS: usize = 10;

/// Value sent in the `Accept-Encoding` request header.
pub const ACCEPT_ENCODING_VALUE: &str = "gzip";

/// Status code reported for [`FetchResult::TooBig`](super::FetchResult::TooBig).
pub const STATUS_PAGE_TOO_BIG: u16 = 1001;

/// Status code reported for [`FetchResult::FatalTransportError`](super::FetchResult::FatalTransportError).
pub const STATUS_FATAL_TRANSPORT_ERROR: u16 = 1005;

/// Status code reported for [`FetchResult::Unknown`](super::FetchResult::Unknown).
pub const STATUS_UNKNOWN_ERROR: u16 = 1006;

/// Status code reported for [`FetchResult::SchemeUnsupported`](super::FetchResult::SchemeUnsupported).
pub const STATUS_SCHEME_UNSUPPORTED: u16 = 1007;

/// Status code reported for [`FetchResult::PoolExhausted`](super::FetchResult::PoolExhausted).
pub const STATUS_POOL_EXHAUSTED: u16 = 1008;
