//! Fetch orchestration.
//!
//! [`FetchClient::fetch`] runs one fetch end to end: it leases a pooled connection for
//! the URL's destination, sends the request, wraps the body in the content decoder,
//! classifies the response and, for accepted pages, streams the body under the size
//! cap. Redirects are followed here, one hop at a time, with a fresh lease per hop so
//! that every hop goes through the pool's scheme check and connection caps. Every failure is converted into a [`FetchResult`] before `fetch` returns, and
//! the connection lease is returned to the pool (or discarded when the connection
//! broke) on every path.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, HeaderMap, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Client, Proxy, Response};
use tokio::runtime::Handle;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::classifier::{Disposition, ResponseHead, classify_response, exceeds_limit};
use super::config::FetchConfig;
use super::constants::{ACCEPT_ENCODING_VALUE, MAX_REDIRECTS};
use super::decoder::{ByteStream, Entity, decode_entity};
use super::error::{BoxError, ClientError, FetchError};
use super::pool::{ConnectionPool, Connector, Destination, PoolSettings, PoolStats};
use super::reaper::{IdleReaper, IdleReaperSettings};
use super::result::{FetchRequest, FetchResult};
use crate::canonical::{Canonicalizer, UrlCanonicalizer};

/// Opens pooled connections backed by `reqwest`.
///
/// Each connection is a dedicated [`Client`] that keeps at most one idle socket, so a
/// pooled connection maps onto one reusable transport connection. Transport-level idle
/// expiry is disabled; the [`IdleReaper`] decides when connections are closed.
#[derive(Debug, Clone)]
pub struct ReqwestConnector {
    config: Arc<FetchConfig>,
}

impl ReqwestConnector {
    /// Creates a connector applying `config`'s timeouts and proxy.
    #[must_use]
    pub fn new(config: Arc<FetchConfig>) -> Self {
        Self { config }
    }
}

impl Connector for ReqwestConnector {
    type Connection = Client;

    fn connect(&self, _destination: &Destination) -> Result<Client, BoxError> {
        build_transport(&self.config).map_err(Into::into)
    }
}

/// Builds the transport behind one pooled connection.
///
/// The transport never follows redirects itself: a hop may leave the destination the
/// connection was leased for.
fn build_transport(config: &FetchConfig) -> Result<Client, reqwest::Error> {
    let builder = Client::builder()
        .user_agent(config.user_agent.as_str())
        .connect_timeout(config.connection_timeout)
        .read_timeout(config.socket_timeout)
        .pool_max_idle_per_host(1)
        .pool_idle_timeout(None::<Duration>)
        .no_gzip()
        .http1_only()
        .redirect(Policy::none());

    let builder = match &config.proxy {
        Some(proxy_config) => {
            let mut proxy = Proxy::all(proxy_config.url())?;
            if let Some(username) = &proxy_config.username {
                proxy = proxy.basic_auth(
                    username,
                    proxy_config.password.as_deref().unwrap_or_default(),
                );
            }
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };

    builder.build()
}

/// Pooled, policy-bounded HTTP fetcher.
///
/// The client owns its [`ConnectionPool`] and [`IdleReaper`]. It is `Send + Sync`;
/// share it between tasks with `Arc` and call [`shutdown`](Self::shutdown) once when
/// done.
///
/// # Example
///
/// ```no_run
/// use crawl_fetcher::fetch::{FetchClient, FetchConfig, FetchRequest, FetchResult};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = FetchClient::new(FetchConfig::default())?;
///
/// match client.fetch(&FetchRequest::new("http://example.com/")).await {
///     FetchResult::Ok { body, .. } => println!("{} bytes", body.len()),
///     other => println!("not fetched: {other}"),
/// }
///
/// client.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct FetchClient {
    config: Arc<FetchConfig>,
    pool: Arc<ConnectionPool<ReqwestConnector>>,
    reaper: IdleReaper,
    canonicalizer: Arc<dyn Canonicalizer>,
    shut_down: AtomicBool,
}

impl fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchClient")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("reaper", &self.reaper)
            .field("shut_down", &self.shut_down)
            .finish_non_exhaustive()
    }
}

impl FetchClient {
    /// Creates a client and starts its idle reaper with the default cadence.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Config`] when `config` fails validation
    /// - [`ClientError::NoRuntime`] outside a Tokio runtime
    pub fn new(config: FetchConfig) -> Result<Self, ClientError> {
        Self::with_reaper_settings(config, IdleReaperSettings::default())
    }

    /// Creates a client with an explicit idle reaper cadence.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    #[instrument(level = "debug", skip(config))]
    pub fn with_reaper_settings(
        config: FetchConfig,
        reaper_settings: IdleReaperSettings,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let config = Arc::new(config);
        let pool = Arc::new(ConnectionPool::new(
            ReqwestConnector::new(Arc::clone(&config)),
            PoolSettings::from_config(&config),
        ));
        let reaper = IdleReaper::start(&runtime, Arc::clone(&pool), reaper_settings);

        Ok(Self {
            config,
            pool,
            reaper,
            canonicalizer: Arc::new(UrlCanonicalizer),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Replaces the canonicalizer used for redirect targets and fetched URLs.
    #[must_use]
    pub fn with_canonicalizer(mut self, canonicalizer: impl Canonicalizer + 'static) -> Self {
        self.canonicalizer = Arc::new(canonicalizer);
        self
    }

    /// Returns the client's configuration.
    #[must_use]
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Returns the connection pool counters.
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Fetches one URL and classifies the outcome.
    ///
    /// Never fails: transport errors, unsupported schemes and pool exhaustion are
    /// returned as [`FetchResult`] cases.
    #[instrument(
        skip(self, request),
        fields(url = %request.url, parent_doc_id = request.parent_doc_id.map(|id| id.0))
    )]
    pub async fn fetch(&self, request: &FetchRequest) -> FetchResult {
        let result = self.fetch_inner(request).await;
        self.log_outcome(request, &result);
        result
    }

    async fn fetch_inner(&self, request: &FetchRequest) -> FetchResult {
        let (mut url, mut destination) = match parse_fetch_url(&request.url) {
            Ok(parsed) => parsed,
            Err(error) => return FetchResult::from_fetch_error(&error),
        };
        let mut hops_left = if self.config.follow_redirects {
            MAX_REDIRECTS
        } else {
            0
        };

        loop {
            let mut lease = match self.pool.lease(&destination).await {
                Ok(lease) => lease,
                Err(error) => return FetchResult::from_pool_error(&error),
            };

            let outcome = self
                .exchange(lease.transport(), &request.url, url, hops_left > 0)
                .await;
            match outcome {
                Ok(Exchange::Done(result)) => return result,
                Ok(Exchange::Follow {
                    url: next_url,
                    destination: next_destination,
                }) => {
                    // The next hop may need a slot for the same host.
                    drop(lease);
                    hops_left -= 1;
                    url = next_url;
                    destination = next_destination;
                }
                Err(error) => {
                    if error.breaks_connection() {
                        lease.mark_broken();
                    }
                    return FetchResult::from_fetch_error(&error);
                }
            }
        }
    }

    async fn exchange(
        &self,
        transport: &Client,
        request_url: &str,
        url: Url,
        follow_redirects: bool,
    ) -> Result<Exchange, FetchError> {
        let response = transport
            .get(url)
            .header(ACCEPT_ENCODING, ACCEPT_ENCODING_VALUE)
            .send()
            .await
            .map_err(|e| FetchError::transport(request_url, e))?;

        let status = response.status().as_u16();
        if follow_redirects {
            if let Some((next_url, destination)) = redirect_hop(status, &response) {
                debug!(from = %response.url(), to = %next_url, status, "following redirect");
                return Ok(Exchange::Follow {
                    url: next_url,
                    destination,
                });
            }
        }

        let final_url = response.url().to_string();
        let headers = response.headers().clone();
        let content_encoding = headers
            .get(CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok());
        let content_length = response.content_length();

        let stream: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(io::Error::other)),
        );
        let entity = decode_entity(Entity::new(stream, content_length), content_encoding);

        let head = ResponseHead {
            status,
            request_url,
            final_url: &final_url,
            headers: &headers,
            entity_length: entity.content_length(),
        };
        let disposition = classify_response(
            &head,
            self.config.max_download_size_bytes,
            self.canonicalizer.as_ref(),
        )?;

        // Dropping `entity` without reading it aborts the response body.
        let result = match disposition {
            Disposition::NotFound => FetchResult::NotFound,
            Disposition::Redirect {
                status_code,
                moved_to,
            } => FetchResult::Redirect {
                status_code,
                moved_to,
            },
            Disposition::HttpStatus { code } => FetchResult::HttpStatus { code },
            Disposition::TooBig { declared_size } => {
                debug!(declared_size, "declared size exceeds limit");
                FetchResult::TooBig
            }
            Disposition::Accept {
                fetched_url,
                declared_size,
            } => {
                let limit = self.config.max_download_size_bytes;
                match read_capped(entity.into_stream(), limit, declared_size, request_url).await? {
                    Some(body) => FetchResult::Ok {
                        fetched_url,
                        headers: header_pairs(&headers),
                        body,
                    },
                    None => {
                        debug!(limit, "streamed body exceeds limit");
                        FetchResult::TooBig
                    }
                }
            }
        };
        Ok(Exchange::Done(result))
    }

    /// Stops the idle reaper, then closes every pooled connection.
    ///
    /// Fetches issued afterwards return [`FetchResult::Unknown`]. Returns `true` for
    /// the call that performed the shutdown and `false` for every later call.
    pub async fn shutdown(&self) -> bool {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.reaper.stop().await;
        let closed = self.pool.shutdown();
        info!(closed, "fetch client shut down");
        true
    }

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn log_outcome(&self, request: &FetchRequest, result: &FetchResult) {
        let url = request.url.as_str();
        let parent_doc_id = request.parent_doc_id.map(|id| id.0);
        match result {
            FetchResult::Ok { body, .. } => {
                debug!(url, parent_doc_id, bytes = body.len(), "fetched page");
            }
            FetchResult::Redirect {
                status_code,
                moved_to,
            } => debug!(
                url,
                parent_doc_id,
                status = status_code,
                moved_to = %moved_to,
                "redirected"
            ),
            FetchResult::NotFound => debug!(url, parent_doc_id, "page not found"),
            FetchResult::HttpStatus { code } => {
                info!(url, parent_doc_id, status = code, "fetch failed with HTTP status");
            }
            FetchResult::TooBig => info!(
                url,
                parent_doc_id,
                max_bytes = self.config.max_download_size_bytes,
                "page exceeds download size limit"
            ),
            FetchResult::SchemeUnsupported { scheme } => {
                warn!(url, parent_doc_id, scheme = %scheme, "scheme not registered, skipping URL");
            }
            FetchResult::PoolExhausted => {
                warn!(url, parent_doc_id, "no pooled connection available, skipping URL");
            }
            FetchResult::FatalTransportError { message } => {
                error!(url, parent_doc_id, error = %message, "fatal transport error");
            }
            FetchResult::Unknown { message } => {
                error!(
                    url,
                    parent_doc_id,
                    error = message.as_deref().unwrap_or("unknown"),
                    "error while fetching"
                );
            }
        }
    }
}

/// Outcome of one request/response exchange.
enum Exchange {
    /// The fetch is finished.
    Done(FetchResult),
    /// The response redirects to another URL that should be fetched next.
    Follow { url: Url, destination: Destination },
}

/// Returns the next hop for a followable redirect response.
///
/// The target is resolved against the URL that produced the response. Targets without
/// a host are not followed and get classified like any other response.
fn redirect_hop(status: u16, response: &Response) -> Option<(Url, Destination)> {
    if !matches!(status, 301 | 302 | 303 | 307 | 308) {
        return None;
    }
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    let next_url = response.url().join(location.trim()).ok()?;
    let destination = Destination::from_url(&next_url)?;
    Some((next_url, destination))
}

fn parse_fetch_url(raw: &str) -> Result<(Url, Destination), FetchError> {
    let url = Url::parse(raw.trim()).map_err(|e| FetchError::invalid_url(raw, e.to_string()))?;
    let destination =
        Destination::from_url(&url).ok_or_else(|| FetchError::invalid_url(raw, "URL has no host"))?;
    Ok((url, destination))
}

/// Reads the whole body unless it grows past `limit`, in which case `None` is returned.
async fn read_capped(
    mut stream: ByteStream,
    limit: u64,
    size_hint: Option<u64>,
    url: &str,
) -> Result<Option<Bytes>, FetchError> {
    let capacity = size_hint
        .and_then(|size| usize::try_from(size).ok())
        .unwrap_or(0);
    let mut body = BytesMut::with_capacity(capacity);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FetchError::body_stream(url, e))?;
        let read = u64::try_from(body.len() + chunk.len()).unwrap_or(u64::MAX);
        if exceeds_limit(read, limit) {
            return Ok(None);
        }
        body.extend_from_slice(&chunk);
    }

    Ok(Some(body.freeze()))
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}
