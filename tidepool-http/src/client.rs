//! The HTTP client: dispatcher, expiry sweeper, lifecycle controller.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use tidepool_core::{
    BoxedStream, DnsProvider, NetworkProvider, Providers, TaskProvider, TimeProvider, TlsProvider,
};

use crate::config::HttpClientConfig;
use crate::connection::{
    connection_task, CloseReason, CloseSignal, ConnectionHandle, ConnectionSeed,
};
use crate::error::HttpError;
use crate::inspector::Inspector;
use crate::pool::{ConnId, PoolRegistry};
use crate::request::HttpRequest;
use crate::response::HttpResponse;

/// Cadence of the expiry sweeper.
const EXPIRY_CHECK_INTERVAL: Duration = Duration::from_millis(1000);

/// Mask keeping the round-robin cursor non-negative across wrap.
const CURSOR_MASK: u32 = 0x7FFF_FFFF;

fn round_robin_index(cursor: u32, len: usize) -> usize {
    (cursor & CURSOR_MASK) as usize % len
}

/// Shared state behind an [`HttpClient`] and its background tasks.
pub(crate) struct ClientCore<P: Providers> {
    providers: P,
    config: HttpClientConfig,
    /// Keep-alive deadline currently in force; zeroed by `stop()` so no
    /// completing response re-enters the idle pool.
    effective_keep_alive: Cell<Duration>,
    pool: RefCell<PoolRegistry>,
    inspector: Option<Rc<dyn Inspector>>,
    addr_cursor: Cell<u32>,
    shutting_down: Cell<bool>,
    /// Connections whose task has not yet released its socket. Lags the
    /// pool lists by the final teardown of each task.
    live_connections: Cell<usize>,
    sweeper_armed: Cell<bool>,
    shutdown_waiters: RefCell<Vec<oneshot::Sender<()>>>,
}

impl<P: Providers> ClientCore<P> {
    pub(crate) fn monotonic_now(&self) -> Duration {
        self.providers.time().now()
    }

    pub(crate) fn max_body_size(&self) -> usize {
        self.config.effective_max_body_size()
    }

    fn inspect(&self, f: impl FnOnce(&dyn Inspector)) {
        if let Some(inspector) = &self.inspector {
            f(inspector.as_ref());
        }
    }

    pub(crate) fn observe_response(&self, response: &HttpResponse) {
        self.inspect(|i| i.on_http_response(response));
    }

    pub(crate) fn observe_error(&self, peer: SocketAddr, was_idle: bool, error: &HttpError) {
        self.inspect(|i| i.on_http_error(peer, was_idle, error));
    }

    /// Whether a connection that has been recycled `keep_alive_count`
    /// times may serve (and then outlive) one more request.
    pub(crate) fn keep_alive_possible(&self, keep_alive_count: usize) -> bool {
        // "Shutting down" is checked in its own right, never inferred
        // from the zeroed keep-alive timeout.
        if self.shutting_down.get() {
            return false;
        }
        if self.effective_keep_alive.get().is_zero() {
            return false;
        }
        let cap = self.config.max_keep_alive_requests;
        cap == 0 || keep_alive_count + 1 <= cap
    }

    /// Park a busy connection in the idle pool, unless keep-alive is
    /// no longer allowed. Returns whether the connection was parked.
    pub(crate) fn try_return_to_idle(this: &Rc<Self>, id: ConnId, keep_alive_count: usize) -> bool {
        if !this.keep_alive_possible(keep_alive_count) {
            return false;
        }
        this.pool
            .borrow_mut()
            .return_to_idle(id, this.monotonic_now());
        Self::ensure_sweeper(this);
        true
    }

    pub(crate) fn evict(&self, id: ConnId) {
        let _ = self.pool.borrow_mut().evict(id);
    }

    /// Final act of every connection task, after its socket is dropped.
    pub(crate) fn on_connection_closed(&self) {
        let live = self.live_connections.get().saturating_sub(1);
        self.live_connections.set(live);
        if live == 0 {
            for waiter in self.shutdown_waiters.borrow_mut().drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    async fn dial(
        &self,
        addr: SocketAddr,
    ) -> Result<<P::Network as NetworkProvider>::TcpStream, HttpError> {
        let connect = self
            .providers
            .network()
            .connect(addr, &self.config.socket_settings);
        let result = if self.config.connect_timeout.is_zero() {
            connect.await
        } else {
            match self
                .providers
                .time()
                .timeout(self.config.connect_timeout, connect)
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    return Err(HttpError::Connect {
                        addr,
                        message: "connect timed out".to_string(),
                    })
                }
            }
        };
        result.map_err(|e| HttpError::Connect {
            addr,
            message: e.to_string(),
        })
    }

    /// Arm the expiry sweeper if it is not already running.
    ///
    /// The sweeper is a single self-rescheduling task; it disarms when
    /// the pool drains so the next registration re-arms it.
    fn ensure_sweeper(this: &Rc<Self>) {
        if this.sweeper_armed.get() {
            return;
        }
        this.sweeper_armed.set(true);
        let core = Rc::clone(this);
        this.providers
            .task()
            .spawn_task("expired_connections_check", async move {
                loop {
                    if core
                        .providers
                        .time()
                        .sleep(EXPIRY_CHECK_INTERVAL)
                        .await
                        .is_err()
                    {
                        break;
                    }
                    if !core.sweep_tick() {
                        break;
                    }
                }
                core.sweeper_armed.set(false);
            });
    }

    /// One sweep over both lists. Returns whether any connection
    /// remains pooled (i.e. whether to keep ticking).
    fn sweep_tick(&self) -> bool {
        let now = self.monotonic_now();
        let shutting_down = self.shutting_down.get();

        let (expired_idle, expired_busy, remaining) = {
            let mut pool = self.pool.borrow_mut();
            let expired_idle = pool.close_expired_idle(now, self.effective_keep_alive.get());

            let read_write = self.config.read_write_timeout;
            let expired_busy = if !read_write.is_zero() || shutting_down {
                let deadline = if shutting_down {
                    self.config.shutdown_rw_timeout
                } else {
                    read_write
                };
                pool.close_expired_busy(now, deadline)
            } else {
                // Unbounded active requests: skip the busy walk.
                Vec::new()
            };
            (expired_idle, expired_busy, pool.total_count() > 0)
        };

        for entry in &expired_idle {
            entry.handle.close(CloseReason::IdleExpired);
        }
        for entry in &expired_busy {
            entry.handle.close(CloseReason::DeadlineExpired);
        }
        if !expired_idle.is_empty() || !expired_busy.is_empty() {
            tracing::debug!(
                idle_expired = expired_idle.len(),
                busy_expired = expired_busy.len(),
                "sweeper closed expired connections"
            );
        }
        if shutting_down && remaining {
            tracing::info!(
                busy = self.pool.borrow().busy_count(),
                "...waiting for in-flight connections to drain"
            );
        }
        remaining
    }
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder<P: Providers> {
    providers: P,
    config: HttpClientConfig,
    inspector: Option<Rc<dyn Inspector>>,
}

impl<P: Providers> HttpClientBuilder<P> {
    /// Start a builder over the given providers bundle.
    pub fn new(providers: P) -> Self {
        Self {
            providers,
            config: HttpClientConfig::default(),
            inspector: None,
        }
    }

    /// Use the given configuration.
    pub fn with_config(mut self, config: HttpClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach a lifecycle inspector (chain one for multiple observers).
    pub fn with_inspector(mut self, inspector: Rc<dyn Inspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    /// Finish building the client.
    pub fn build(self) -> HttpClient<P> {
        let effective_keep_alive = Cell::new(self.config.keep_alive_timeout);
        HttpClient {
            core: Rc::new(ClientCore {
                providers: self.providers,
                config: self.config,
                effective_keep_alive,
                pool: RefCell::new(PoolRegistry::new()),
                inspector: self.inspector,
                addr_cursor: Cell::new(0),
                shutting_down: Cell::new(false),
                live_connections: Cell::new(0),
                sweeper_armed: Cell::new(false),
                shutdown_waiters: RefCell::new(Vec::new()),
            }),
        }
    }
}

/// Asynchronous HTTP/1.1 client with a per-origin keep-alive pool.
///
/// The client is single-threaded by construction (`!Send`): create one
/// per reactor thread. Background work (connection serve loops and the
/// expiry sweeper) is spawned through the bundle's task provider, so a
/// `LocalSet` (or equivalent) must be driving the thread.
///
/// Call [`stop`](Self::stop) to drain: idle connections close
/// immediately, in-flight requests get a shortened deadline, and the
/// returned future completes once every socket is released.
pub struct HttpClient<P: Providers> {
    core: Rc<ClientCore<P>>,
}

impl<P: Providers> Clone for HttpClient<P> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<P: Providers> HttpClient<P> {
    /// Start building a client over the given providers bundle.
    pub fn builder(providers: P) -> HttpClientBuilder<P> {
        HttpClientBuilder::new(providers)
    }

    /// Create a client with the default configuration.
    pub fn new(providers: P) -> Self {
        Self::builder(providers).build()
    }

    /// Start the client. No I/O prelude is required, so this resolves
    /// immediately.
    pub async fn start(&self) -> Result<(), HttpError> {
        Ok(())
    }

    /// Dispatch one request and await its response.
    ///
    /// Resolves the host, picks an address round-robin, leases a pooled
    /// connection or dials a new one, and completes with the response
    /// or the first error on that path. Errors are never retried.
    ///
    /// Dropping the returned future does not abort the exchange: the
    /// response completes in the background and the connection is still
    /// recycled when eligible.
    pub async fn request(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let core = &self.core;
        if core.shutting_down.get() {
            return Err(HttpError::ShuttingDown);
        }
        core.inspect(|i| i.on_request(&request));

        let host = request.host().to_string();
        let dns_response = match core.providers.dns().resolve_a(&host).await {
            Ok(response) => response,
            Err(source) => {
                let error = HttpError::Resolve { host, source };
                core.inspect(|i| i.on_resolve_error(&request, &error));
                return Err(error);
            }
        };
        core.inspect(|i| i.on_resolve(&request, &dns_response));
        if !dns_response.successful() || dns_response.ips().is_empty() {
            return Err(HttpError::DnsQuery {
                host,
                code: dns_response.code(),
            });
        }

        self.dispatch(request, dns_response.ips()).await
    }

    async fn dispatch(
        &self,
        request: HttpRequest,
        ips: &[Ipv4Addr],
    ) -> Result<HttpResponse, HttpError> {
        let core = &self.core;

        let cursor = core.addr_cursor.get();
        core.addr_cursor.set(cursor.wrapping_add(1));
        let ip = ips[round_robin_index(cursor, ips.len())];
        let peer = SocketAddr::new(IpAddr::V4(ip), request.port());

        let leased = core
            .pool
            .borrow_mut()
            .try_take_idle(peer, core.monotonic_now());
        if let Some(handle) = leased {
            tracing::trace!(%peer, "reusing keep-alive connection");
            return send_leased(handle, request).await;
        }

        // HTTPS without a TLS context fails before any network I/O.
        if request.is_https() && core.providers.tls().is_none() {
            return Err(HttpError::MissingTlsContext);
        }

        let stream = match core.dial(peer).await {
            Ok(stream) => stream,
            Err(error) => {
                core.inspect(|i| i.on_connect_error(&request, peer, &error));
                return Err(error);
            }
        };

        let stream: BoxedStream = Box::new(stream);
        let stream = if request.is_https() {
            let Some(tls) = core.providers.tls() else {
                return Err(HttpError::MissingTlsContext);
            };
            match tls.wrap_client(stream, request.host()).await {
                Ok(stream) => stream,
                Err(source) => {
                    let error = HttpError::Tls {
                        host: request.host().to_string(),
                        source,
                    };
                    core.inspect(|i| i.on_connect_error(&request, peer, &error));
                    return Err(error);
                }
            }
        } else {
            stream
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let (lease_tx, lease_rx) = mpsc::unbounded_channel();
        let closer = CloseSignal::new();
        let handle = ConnectionHandle::new(lease_tx, closer.clone());

        let id = core
            .pool
            .borrow_mut()
            .insert_busy(peer, core.monotonic_now(), handle);
        core.live_connections.set(core.live_connections.get() + 1);
        core.inspect(|i| i.on_connect(&request, peer));
        ClientCore::ensure_sweeper(core);
        tracing::debug!(%peer, "dialed new connection");

        let seed = ConnectionSeed {
            id,
            peer,
            stream,
            lease_rx,
            closer,
            initial: (request, reply_tx),
        };
        let task_core = Rc::clone(&self.core);
        core.providers.task().spawn_task("http_connection", async move {
            connection_task(task_core, seed).await;
        });

        await_reply(reply_rx).await
    }

    /// Drain and stop the client.
    ///
    /// Idle connections close immediately and later completions are
    /// refused re-entry to the pool; the future resolves once every
    /// connection task has released its socket. With no live
    /// connections it resolves without suspending. In-flight requests
    /// fall under [`HttpClientConfig::shutdown_rw_timeout`] so the
    /// drain terminates even against a silent peer.
    pub async fn stop(&self) {
        let core = &self.core;
        let first_stop = !core.shutting_down.replace(true);
        if first_stop {
            core.effective_keep_alive.set(Duration::ZERO);
            let drained = core.pool.borrow_mut().drain_idle();
            for entry in &drained {
                entry.handle.close(CloseReason::ShuttingDown);
            }
            debug_assert_eq!(core.pool.borrow().idle_count(), 0);
            tracing::debug!(closed = drained.len(), "drained idle pool for shutdown");
        }

        if core.live_connections.get() == 0 {
            return;
        }
        tracing::info!(live = core.live_connections.get(), "waiting for {}", self);
        let (tx, rx) = oneshot::channel();
        core.shutdown_waiters.borrow_mut().push(tx);
        let _ = rx.await;
    }

    /// Total pooled connections (idle plus busy).
    pub fn connection_count(&self) -> usize {
        self.core.pool.borrow().total_count()
    }

    /// Connections parked in the keep-alive cache.
    pub fn idle_connection_count(&self) -> usize {
        self.core.pool.borrow().idle_count()
    }

    /// Connections currently serving a request.
    pub fn busy_connection_count(&self) -> usize {
        self.core.pool.borrow().busy_count()
    }

    /// Idle connections closed by the sweeper so far.
    pub fn idle_expired_count(&self) -> u64 {
        self.core.pool.borrow().idle_expired_total()
    }

    /// Busy connections closed by the sweeper so far.
    pub fn busy_expired_count(&self) -> u64 {
        self.core.pool.borrow().busy_expired_total()
    }

    /// Idle connection count per peer address.
    pub fn address_connections(&self) -> Vec<(SocketAddr, usize)> {
        self.core.pool.borrow().address_connections()
    }
}

impl<P: Providers> fmt::Display for HttpClient<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pool = self.core.pool.borrow();
        write!(
            f,
            "HttpClient{{busy: {}, idle: {}}}",
            pool.busy_count(),
            pool.idle_count()
        )
    }
}

async fn send_leased(
    handle: ConnectionHandle,
    request: HttpRequest,
) -> Result<HttpResponse, HttpError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    if handle.lease((request, reply_tx)).is_err() {
        return Err(HttpError::Io {
            message: "pooled connection terminated before lease".to_string(),
        });
    }
    await_reply(reply_rx).await
}

async fn await_reply(
    reply_rx: oneshot::Receiver<Result<HttpResponse, HttpError>>,
) -> Result<HttpResponse, HttpError> {
    match reply_rx.await {
        Ok(result) => result,
        Err(_) => Err(HttpError::Io {
            message: "connection closed before response".to_string(),
        }),
    }
}
