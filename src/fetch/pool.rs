//! Bounded connection pool keyed by destination.
//!
//! The [`ConnectionPool`] owns every outbound connection. A fetch borrows one through
//! [`ConnectionPool::lease`] (or [`acquire`](ConnectionPool::acquire) plus an explicit
//! [`release`](ConnectionPool::release)/[`discard`](ConnectionPool::discard)) for the
//! duration of one exchange and hands it back afterwards.
//!
//! # Limits
//!
//! - Live connections (idle + in use) never exceed `max_total_connections`.
//! - Live connections to one destination never exceed `max_connections_per_host`.
//! - Only registered schemes are acquirable; others fail with
//!   [`PoolError::SchemeUnsupported`].
//!
//! Slots are reserved under the state lock before a connection is opened, so neither
//! cap is exceeded even transiently. When the global cap is full but another
//! destination has idle connections, the least recently used idle one is closed to
//! make room. Otherwise the caller waits for a release until the acquire timeout
//! elapses and gets [`PoolError::Exhausted`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use crawl_fetcher::fetch::{BoxError, ConnectionPool, Connector, Destination, PoolSettings};
//!
//! struct NoopConnector;
//!
//! impl Connector for NoopConnector {
//!     type Connection = ();
//!     fn connect(&self, _destination: &Destination) -> Result<(), BoxError> {
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = PoolSettings::new(10, 2, Duration::from_secs(1), ["http"]);
//! let pool = ConnectionPool::new(NoopConnector, settings);
//! let destination = Destination::new("http", "example.com", 80);
//!
//! let lease = pool.lease(&destination).await?;
//! assert_eq!(pool.stats().in_use, 1);
//! drop(lease);
//! assert_eq!(pool.stats().idle, 1);
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use url::Url;

use super::config::FetchConfig;
use super::error::{BoxError, PoolError};

/// Scheme, host and port a connection is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    scheme: String,
    host: String,
    port: u16,
}

impl Destination {
    /// Creates a destination; scheme and host are lowercased.
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: scheme.into().to_ascii_lowercase(),
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    /// Derives the destination of a URL, using the scheme's default port when none is given.
    ///
    /// Schemes without a default port get port 0. Returns `None` for URLs without a host.
    #[must_use]
    pub fn from_url(url: &Url) -> Option<Self> {
        let host = url.host_str()?;
        let port = url.port_or_known_default().unwrap_or(0);
        Some(Self::new(url.scheme(), host, port))
    }

    /// URL scheme (`http`, `https`, ...).
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host name or address.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Opens transport connections for the pool.
pub trait Connector: Send + Sync + 'static {
    /// The connection handle kept in the pool. Dropping it closes the connection.
    type Connection: Send + 'static;

    /// Opens a new connection to `destination`.
    ///
    /// # Errors
    ///
    /// Returns the transport's error when the connection cannot be set up.
    fn connect(&self, destination: &Destination) -> Result<Self::Connection, BoxError>;
}

/// Lifecycle state of a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Parked in the pool, available for reuse.
    Idle,
    /// Owned by exactly one in-flight fetch.
    InUse,
    /// Closed; never handed out again.
    Closed,
}

/// A connection owned by the pool and lent to one fetch at a time.
pub struct PooledConnection<T> {
    id: u64,
    destination: Destination,
    last_used_at: Instant,
    state: ConnectionState,
    transport: T,
}

impl<T> PooledConnection<T> {
    /// Pool-unique connection id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Destination this connection is bound to.
    #[must_use]
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Host of the destination.
    #[must_use]
    pub fn host(&self) -> &str {
        self.destination.host()
    }

    /// Port of the destination.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.destination.port()
    }

    /// Scheme of the destination.
    #[must_use]
    pub fn scheme(&self) -> &str {
        self.destination.scheme()
    }

    /// When the connection was last handed out or returned.
    #[must_use]
    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The underlying transport handle.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T> fmt::Debug for PooledConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("last_used_at", &self.last_used_at)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Limits and scheme registry of a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    max_total_connections: usize,
    max_connections_per_host: usize,
    acquire_timeout: Duration,
    schemes: HashSet<String>,
}

impl PoolSettings {
    /// Creates pool settings.
    ///
    /// Caps are clamped to at least one connection.
    pub fn new<I, S>(
        max_total_connections: usize,
        max_connections_per_host: usize,
        acquire_timeout: Duration,
        schemes: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            max_total_connections: max_total_connections.max(1),
            max_connections_per_host: max_connections_per_host.max(1),
            acquire_timeout,
            schemes: schemes
                .into_iter()
                .map(|s| s.into().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Derives the pool settings of a fetch configuration.
    ///
    /// The connection timeout doubles as the longest wait for a free slot.
    #[must_use]
    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(
            config.max_total_connections,
            config.max_connections_per_host,
            config.connection_timeout,
            config.registered_schemes(),
        )
    }

    /// Global cap on live connections.
    #[must_use]
    pub fn max_total_connections(&self) -> usize {
        self.max_total_connections
    }

    /// Per-destination cap on live connections.
    #[must_use]
    pub fn max_connections_per_host(&self) -> usize {
        self.max_connections_per_host
    }

    /// Longest time `acquire` waits for a slot.
    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// Returns true when `scheme` is registered.
    #[must_use]
    pub fn supports_scheme(&self, scheme: &str) -> bool {
        self.schemes.contains(&scheme.to_ascii_lowercase())
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections parked in the idle set.
    pub idle: usize,
    /// Connections currently lent to fetches (including slots being opened).
    pub in_use: usize,
    /// Connections opened since the pool was created.
    pub opened: u64,
    /// Connections closed since the pool was created.
    pub closed: u64,
}

impl PoolStats {
    /// Live connections (idle + in use).
    #[must_use]
    pub fn live(&self) -> usize {
        self.idle + self.in_use
    }
}

/// Point-in-time counters of one destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    /// Idle connections to the destination.
    pub idle: usize,
    /// Live connections (idle + in use) to the destination.
    pub live: usize,
}

struct PoolState<T> {
    idle: HashMap<Destination, Vec<PooledConnection<T>>>,
    live_per_destination: HashMap<Destination, usize>,
    live_total: usize,
    in_use: usize,
    shut_down: bool,
}

impl<T> PoolState<T> {
    fn new() -> Self {
        Self {
            idle: HashMap::new(),
            live_per_destination: HashMap::new(),
            live_total: 0,
            in_use: 0,
            shut_down: false,
        }
    }

    fn live_for(&self, destination: &Destination) -> usize {
        self.live_per_destination
            .get(destination)
            .copied()
            .unwrap_or(0)
    }

    fn idle_count(&self) -> usize {
        self.idle.values().map(Vec::len).sum()
    }

    fn take_idle(&mut self, destination: &Destination) -> Option<PooledConnection<T>> {
        let conns = self.idle.get_mut(destination)?;
        let conn = conns.pop();
        if conns.is_empty() {
            self.idle.remove(destination);
        }
        conn
    }

    fn reserve(&mut self, destination: &Destination) {
        *self
            .live_per_destination
            .entry(destination.clone())
            .or_insert(0) += 1;
        self.live_total += 1;
        self.in_use += 1;
    }

    fn forget_live(&mut self, destination: &Destination) {
        if let Some(count) = self.live_per_destination.get_mut(destination) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.live_per_destination.remove(destination);
            }
        }
        self.live_total = self.live_total.saturating_sub(1);
    }

    /// Removes the least recently used idle connection of any destination.
    fn evict_lru_idle(&mut self) -> Option<PooledConnection<T>> {
        let (destination, index) = self
            .idle
            .iter()
            .flat_map(|(dest, conns)| {
                conns
                    .iter()
                    .enumerate()
                    .map(move |(i, conn)| (dest, i, conn.last_used_at))
            })
            .min_by_key(|(_, _, last_used_at)| *last_used_at)
            .map(|(dest, i, _)| (dest.clone(), i))?;

        let conns = self.idle.get_mut(&destination)?;
        let conn = conns.remove(index);
        if conns.is_empty() {
            self.idle.remove(&destination);
        }
        self.forget_live(&destination);
        Some(conn)
    }
}

enum Slot<T> {
    Reused(PooledConnection<T>),
    Reserved { evicted: Option<PooledConnection<T>> },
    Full,
}

/// Bounded, shared pool of outbound connections.
///
/// `ConnectionPool` is `Send + Sync` and is meant to be wrapped in `Arc` and shared by
/// the fetch client and the [`IdleReaper`](super::IdleReaper). All bookkeeping happens
/// under one short-lived mutex; connections are opened and closed outside of it.
pub struct ConnectionPool<C: Connector> {
    connector: C,
    settings: PoolSettings,
    state: Mutex<PoolState<C::Connection>>,
    released: Notify,
    next_id: AtomicU64,
    opened: AtomicU64,
    closed: AtomicU64,
}

impl<C: Connector> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("settings", &self.settings)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(connector: C, settings: PoolSettings) -> Self {
        debug!(
            max_total = settings.max_total_connections,
            max_per_host = settings.max_connections_per_host,
            acquire_timeout_ms = settings.acquire_timeout.as_millis(),
            "creating connection pool"
        );
        Self {
            connector,
            settings,
            state: Mutex::new(PoolState::new()),
            released: Notify::new(),
            next_id: AtomicU64::new(1),
            opened: AtomicU64::new(0),
            closed: AtomicU64::new(0),
        }
    }

    /// Returns the pool's settings.
    #[must_use]
    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState<C::Connection>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquires a connection to `destination`, reusing an idle one when available.
    ///
    /// Waits up to the acquire timeout when a cap is reached.
    ///
    /// # Errors
    ///
    /// - [`PoolError::SchemeUnsupported`] for unregistered schemes
    /// - [`PoolError::Exhausted`] when no slot frees up in time
    /// - [`PoolError::Shutdown`] after [`shutdown`](Self::shutdown)
    /// - [`PoolError::Connect`] when the connector fails
    #[instrument(level = "debug", skip(self), fields(destination = %destination))]
    pub async fn acquire(
        &self,
        destination: &Destination,
    ) -> Result<PooledConnection<C::Connection>, PoolError> {
        if !self.settings.supports_scheme(destination.scheme()) {
            return Err(PoolError::scheme_unsupported(destination.scheme()));
        }

        let started = Instant::now();
        let deadline = started + self.settings.acquire_timeout;

        loop {
            // Register interest before inspecting state so a release in between is not missed.
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            match self.try_reserve(destination)? {
                Slot::Reused(conn) => {
                    debug!(connection_id = conn.id, "reusing idle connection");
                    return Ok(conn);
                }
                Slot::Reserved { evicted } => {
                    if let Some(evicted) = evicted {
                        self.close(evicted);
                    }
                    return self.open(destination);
                }
                Slot::Full => {}
            }

            if tokio::time::timeout_at(deadline, released).await.is_err() {
                let waited = started.elapsed();
                warn!(
                    destination = %destination,
                    waited_ms = waited.as_millis(),
                    "connection pool exhausted"
                );
                return Err(PoolError::exhausted(destination.clone(), waited));
            }
        }
    }

    /// Acquires a connection wrapped in a [`Lease`] that hands it back on drop.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub async fn lease(&self, destination: &Destination) -> Result<Lease<'_, C>, PoolError> {
        let connection = self.acquire(destination).await?;
        Ok(Lease {
            pool: self,
            connection: Some(connection),
            broken: false,
        })
    }

    fn try_reserve(
        &self,
        destination: &Destination,
    ) -> Result<Slot<C::Connection>, PoolError> {
        let mut state = self.lock_state();
        if state.shut_down {
            return Err(PoolError::Shutdown);
        }

        if let Some(mut conn) = state.take_idle(destination) {
            conn.state = ConnectionState::InUse;
            conn.last_used_at = Instant::now();
            state.in_use += 1;
            return Ok(Slot::Reused(conn));
        }

        if state.live_for(destination) >= self.settings.max_connections_per_host {
            return Ok(Slot::Full);
        }

        let mut evicted = None;
        if state.live_total >= self.settings.max_total_connections {
            match state.evict_lru_idle() {
                Some(conn) => evicted = Some(conn),
                None => return Ok(Slot::Full),
            }
        }

        state.reserve(destination);
        Ok(Slot::Reserved { evicted })
    }

    fn open(
        &self,
        destination: &Destination,
    ) -> Result<PooledConnection<C::Connection>, PoolError> {
        match self.connector.connect(destination) {
            Ok(transport) => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                self.opened.fetch_add(1, Ordering::SeqCst);
                debug!(connection_id = id, destination = %destination, "opened connection");
                Ok(PooledConnection {
                    id,
                    destination: destination.clone(),
                    last_used_at: Instant::now(),
                    state: ConnectionState::InUse,
                    transport,
                })
            }
            Err(source) => {
                {
                    let mut state = self.lock_state();
                    state.in_use = state.in_use.saturating_sub(1);
                    state.forget_live(destination);
                }
                self.released.notify_waiters();
                Err(PoolError::connect(destination.clone(), source))
            }
        }
    }

    fn close(&self, mut conn: PooledConnection<C::Connection>) {
        conn.state = ConnectionState::Closed;
        self.closed.fetch_add(1, Ordering::SeqCst);
        debug!(connection_id = conn.id, destination = %conn.destination, "closed connection");
        drop(conn);
    }

    /// Returns a healthy connection to the idle set.
    ///
    /// After [`shutdown`](Self::shutdown) the connection is closed instead.
    pub fn release(&self, mut conn: PooledConnection<C::Connection>) {
        let rejected = {
            let mut state = self.lock_state();
            state.in_use = state.in_use.saturating_sub(1);
            if state.shut_down {
                state.forget_live(&conn.destination);
                Some(conn)
            } else {
                conn.state = ConnectionState::Idle;
                conn.last_used_at = Instant::now();
                state
                    .idle
                    .entry(conn.destination.clone())
                    .or_default()
                    .push(conn);
                None
            }
        };
        if let Some(conn) = rejected {
            self.close(conn);
        }
        self.released.notify_waiters();
    }

    /// Permanently closes a connection that proved broken.
    pub fn discard(&self, conn: PooledConnection<C::Connection>) {
        {
            let mut state = self.lock_state();
            state.in_use = state.in_use.saturating_sub(1);
            state.forget_live(&conn.destination);
        }
        self.close(conn);
        self.released.notify_waiters();
    }

    /// Closes and removes idle connections unused for at least `max_idle_age`.
    ///
    /// Returns the number of connections closed.
    pub fn sweep_idle(&self, max_idle_age: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<PooledConnection<C::Connection>> = {
            let mut state = self.lock_state();
            let mut expired = Vec::new();
            for conns in state.idle.values_mut() {
                let (stale, fresh): (Vec<_>, Vec<_>) = conns
                    .drain(..)
                    .partition(|conn| now.duration_since(conn.last_used_at) >= max_idle_age);
                *conns = fresh;
                expired.extend(stale);
            }
            state.idle.retain(|_, conns| !conns.is_empty());
            for conn in &expired {
                state.forget_live(&conn.destination);
            }
            expired
        };

        let count = expired.len();
        for conn in expired {
            self.close(conn);
        }
        if count > 0 {
            debug!(closed = count, max_idle_age_ms = max_idle_age.as_millis(), "swept idle connections");
            self.released.notify_waiters();
        }
        count
    }

    /// Closes every idle connection and rejects further acquisitions.
    ///
    /// Connections still in use are closed when they are released. Returns the number
    /// of connections closed by this call; calling it again closes nothing.
    pub fn shutdown(&self) -> usize {
        let idle: Vec<PooledConnection<C::Connection>> = {
            let mut state = self.lock_state();
            if state.shut_down {
                return 0;
            }
            state.shut_down = true;
            let idle: Vec<_> = state.idle.drain().flat_map(|(_, conns)| conns).collect();
            for conn in &idle {
                state.forget_live(&conn.destination);
            }
            idle
        };

        let count = idle.len();
        for conn in idle {
            self.close(conn);
        }
        debug!(closed = count, "connection pool shut down");
        self.released.notify_waiters();
        count
    }

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.lock_state().shut_down
    }

    /// Returns the current counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.lock_state();
        PoolStats {
            idle: state.idle_count(),
            in_use: state.in_use,
            opened: self.opened.load(Ordering::SeqCst),
            closed: self.closed.load(Ordering::SeqCst),
        }
    }

    /// Returns the counters of one destination.
    #[must_use]
    pub fn host_stats(&self, destination: &Destination) -> HostStats {
        let state = self.lock_state();
        HostStats {
            idle: state.idle.get(destination).map_or(0, Vec::len),
            live: state.live_for(destination),
        }
    }
}

/// RAII handle on a pooled connection.
///
/// Dropping the lease releases the connection to the idle set, or discards it when
/// [`mark_broken`](Self::mark_broken) was called. Every exit path of the code holding a
/// lease therefore hands the connection back.
pub struct Lease<'a, C: Connector> {
    pool: &'a ConnectionPool<C>,
    connection: Option<PooledConnection<C::Connection>>,
    broken: bool,
}

impl<C: Connector> Lease<'_, C> {
    /// Flags the connection as broken so it is discarded instead of reused.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Returns true when the connection will be discarded on drop.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

impl<C: Connector> Deref for Lease<'_, C> {
    type Target = PooledConnection<C::Connection>;

    #[allow(clippy::expect_used)]
    fn deref(&self) -> &Self::Target {
        // Only taken in Drop.
        self.connection
            .as_ref()
            .expect("lease holds its connection until dropped")
    }
}

impl<C: Connector> Drop for Lease<'_, C> {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            if self.broken {
                self.pool.discard(conn);
            } else {
                self.pool.release(conn);
            }
        }
    }
}

impl<C: Connector> fmt::Debug for Lease<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("connection", &self.connection)
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Default)]
    struct CountingConnector {
        connects: AtomicUsize,
        fail: bool,
    }

    impl Connector for CountingConnector {
        type Connection = usize;

        fn connect(&self, _destination: &Destination) -> Result<usize, BoxError> {
            if self.fail {
                return Err("connector refused".into());
            }
            Ok(self.connects.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn pool(max_total: usize, max_per_host: usize) -> ConnectionPool<CountingConnector> {
        ConnectionPool::new(
            CountingConnector::default(),
            PoolSettings::new(max_total, max_per_host, Duration::from_millis(200), ["http"]),
        )
    }

    fn dest(host: &str) -> Destination {
        Destination::new("http", host, 80)
    }

    // ==================== Destination Tests ====================

    #[test]
    fn test_destination_from_url_uses_default_port() {
        let url = Url::parse("http://Example.COM/path").unwrap();
        let destination = Destination::from_url(&url).unwrap();
        assert_eq!(destination, Destination::new("http", "example.com", 80));

        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(Destination::from_url(&url).unwrap().port(), 443);
    }

    #[test]
    fn test_destination_from_url_keeps_explicit_port() {
        let url = Url::parse("http://127.0.0.1:8080/x").unwrap();
        let destination = Destination::from_url(&url).unwrap();
        assert_eq!(destination.to_string(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_destination_from_url_unknown_scheme_has_port_zero() {
        let url = Url::parse("gopher2://example.com/x").unwrap();
        assert_eq!(Destination::from_url(&url).unwrap().port(), 0);
    }

    #[test]
    fn test_destination_from_url_without_host() {
        let url = Url::parse("data:text/plain,hello").unwrap();
        assert!(Destination::from_url(&url).is_none());
    }

    // ==================== Acquire / Release Tests ====================

    #[tokio::test]
    async fn test_acquire_opens_then_reuses_after_release() {
        let pool = pool(4, 2);
        let conn = pool.acquire(&dest("a.com")).await.unwrap();
        assert_eq!(conn.state(), ConnectionState::InUse);
        let first_id = conn.id();
        pool.release(conn);

        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.in_use, 0);

        let conn = pool.acquire(&dest("a.com")).await.unwrap();
        assert_eq!(conn.id(), first_id, "idle connection should be reused");
        assert_eq!(pool.stats().opened, 1);
        pool.release(conn);
    }

    #[tokio::test]
    async fn test_acquire_rejects_unregistered_scheme() {
        let pool = pool(4, 2);
        let result = pool.acquire(&Destination::new("https", "a.com", 443)).await;
        assert!(matches!(
            result,
            Err(PoolError::SchemeUnsupported { ref scheme }) if scheme == "https"
        ));
        assert_eq!(pool.stats().opened, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out_when_host_cap_reached() {
        let pool = pool(4, 1);
        let held = pool.acquire(&dest("a.com")).await.unwrap();

        let result = pool.acquire(&dest("a.com")).await;

        assert!(matches!(result, Err(PoolError::Exhausted { .. })));
        assert_eq!(pool.host_stats(&dest("a.com")).live, 1);
        pool.release(held);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_release() {
        let pool = Arc::new(pool(4, 1));
        let held = pool.acquire(&dest("a.com")).await.unwrap();
        let held_id = held.id();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire(&dest("a.com")).await.map(|c| c.id()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.release(held);

        let reused = waiter.await.unwrap().unwrap();
        assert_eq!(reused, held_id);
    }

    #[tokio::test]
    async fn test_global_cap_evicts_idle_connection_of_other_host() {
        let pool = pool(1, 1);
        let conn = pool.acquire(&dest("a.com")).await.unwrap();
        pool.release(conn);

        let conn = pool.acquire(&dest("b.com")).await.unwrap();

        let stats = pool.stats();
        assert_eq!(stats.opened, 2);
        assert_eq!(stats.closed, 1);
        assert_eq!(pool.host_stats(&dest("a.com")).live, 0);
        assert_eq!(pool.host_stats(&dest("b.com")).live, 1);
        pool.release(conn);
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_cap_without_idle_connections_exhausts() {
        let pool = pool(1, 1);
        let held = pool.acquire(&dest("a.com")).await.unwrap();

        let result = pool.acquire(&dest("b.com")).await;

        assert!(matches!(result, Err(PoolError::Exhausted { .. })));
        pool.release(held);
    }

    #[tokio::test]
    async fn test_discard_frees_slot_and_closes() {
        let pool = pool(4, 1);
        let conn = pool.acquire(&dest("a.com")).await.unwrap();
        pool.discard(conn);

        let stats = pool.stats();
        assert_eq!(stats.live(), 0);
        assert_eq!(stats.closed, 1);

        let conn = pool.acquire(&dest("a.com")).await.unwrap();
        assert_eq!(pool.stats().opened, 2, "discarded connection must not be reused");
        pool.release(conn);
    }

    #[tokio::test]
    async fn test_connector_failure_releases_reservation() {
        let pool = ConnectionPool::new(
            CountingConnector {
                connects: AtomicUsize::new(0),
                fail: true,
            },
            PoolSettings::new(1, 1, Duration::from_millis(50), ["http"]),
        );

        let result = pool.acquire(&dest("a.com")).await;

        assert!(matches!(result, Err(PoolError::Connect { .. })));
        assert_eq!(pool.stats().live(), 0);
        assert_eq!(pool.host_stats(&dest("a.com")).live, 0);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_never_exceeds_host_cap() {
        let pool = Arc::new(ConnectionPool::new(
            CountingConnector::default(),
            PoolSettings::new(10, 3, Duration::from_secs(5), ["http"]),
        ));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let pool = Arc::clone(&pool);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let lease = pool.lease(&dest("a.com")).await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                assert!(pool.host_stats(&dest("a.com")).live <= 3);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                drop(lease);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(pool.stats().opened <= 3);
    }

    // ==================== Lease Tests ====================

    #[tokio::test]
    async fn test_lease_drop_releases_connection() {
        let pool = pool(4, 2);
        {
            let lease = pool.lease(&dest("a.com")).await.unwrap();
            assert_eq!(lease.host(), "a.com");
            assert_eq!(pool.stats().in_use, 1);
        }
        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.idle, 1);
    }

    #[tokio::test]
    async fn test_lease_marked_broken_is_discarded() {
        let pool = pool(4, 2);
        {
            let mut lease = pool.lease(&dest("a.com")).await.unwrap();
            lease.mark_broken();
            assert!(lease.is_broken());
        }
        let stats = pool.stats();
        assert_eq!(stats.live(), 0);
        assert_eq!(stats.closed, 1);
    }

    // ==================== Sweep / Shutdown Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_sweep_idle_closes_only_stale_connections() {
        let pool = pool(4, 2);
        let old = pool.acquire(&dest("a.com")).await.unwrap();
        pool.release(old);
        tokio::time::advance(Duration::from_secs(10)).await;
        let fresh = pool.acquire(&dest("b.com")).await.unwrap();
        pool.release(fresh);

        let closed = pool.sweep_idle(Duration::from_secs(5));

        assert_eq!(closed, 1);
        assert_eq!(pool.host_stats(&dest("a.com")).live, 0);
        assert_eq!(pool.host_stats(&dest("b.com")).live, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_after_sweep_opens_new_connection() {
        let pool = pool(4, 2);
        let conn = pool.acquire(&dest("a.com")).await.unwrap();
        let first_id = conn.id();
        pool.release(conn);
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(pool.sweep_idle(Duration::from_secs(30)), 1);

        let conn = pool.acquire(&dest("a.com")).await.unwrap();
        assert_ne!(conn.id(), first_id);
        assert_eq!(pool.stats().opened, 2);
        pool.release(conn);
    }

    #[tokio::test]
    async fn test_sweep_ignores_in_use_connections() {
        let pool = pool(4, 2);
        let conn = pool.acquire(&dest("a.com")).await.unwrap();

        assert_eq!(pool.sweep_idle(Duration::ZERO), 0);
        assert_eq!(pool.stats().in_use, 1);
        pool.release(conn);
        assert_eq!(pool.sweep_idle(Duration::ZERO), 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_rejects_acquire() {
        let pool = pool(4, 2);
        let idle = pool.acquire(&dest("a.com")).await.unwrap();
        pool.release(idle);
        let in_use = pool.acquire(&dest("b.com")).await.unwrap();

        assert_eq!(pool.shutdown(), 1);
        assert_eq!(pool.shutdown(), 0);
        assert!(pool.is_shut_down());
        assert!(matches!(
            pool.acquire(&dest("a.com")).await,
            Err(PoolError::Shutdown)
        ));

        pool.release(in_use);
        let stats = pool.stats();
        assert_eq!(stats.live(), 0);
        assert_eq!(stats.closed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_wakes_waiters() {
        let pool = Arc::new(ConnectionPool::new(
            CountingConnector::default(),
            PoolSettings::new(1, 1, Duration::from_secs(60), ["http"]),
        ));
        let held = pool.acquire(&dest("a.com")).await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire(&dest("a.com")).await.map(|c| c.id()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.shutdown();

        assert!(matches!(waiter.await.unwrap(), Err(PoolError::Shutdown)));
        pool.release(held);
    }
}
