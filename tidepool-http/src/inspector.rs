//! Observer hooks for connection lifecycle events.
//!
//! An [`Inspector`] receives synchronous, side-effect-only notifications
//! at every lifecycle transition. Inspectors chain: an
//! [`InspectorChain`] forwards each event to its members in insertion
//! order, and `lookup` finds a concrete inspector inside the chain.

use std::any::Any;
use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::Rc;

use tidepool_core::DnsResponse;

use crate::error::HttpError;
use crate::request::HttpRequest;
use crate::response::HttpResponse;

/// Observer of client lifecycle events.
///
/// All hooks default to no-ops; implement only what you care about.
/// Hooks must not block or re-enter the client.
pub trait Inspector: 'static {
    /// A request entered the dispatcher.
    fn on_request(&self, _request: &HttpRequest) {}

    /// DNS resolution completed (successfully or with a negative code).
    fn on_resolve(&self, _request: &HttpRequest, _response: &DnsResponse) {}

    /// DNS resolution failed at the transport level.
    fn on_resolve_error(&self, _request: &HttpRequest, _error: &HttpError) {}

    /// A new connection was dialed and registered.
    fn on_connect(&self, _request: &HttpRequest, _peer: SocketAddr) {}

    /// Dialing (or TLS setup) failed.
    fn on_connect_error(&self, _request: &HttpRequest, _peer: SocketAddr, _error: &HttpError) {}

    /// A response was fully received.
    fn on_http_response(&self, _response: &HttpResponse) {}

    /// A connection failed. `was_idle` is true when no request was
    /// pending on it (a pooled socket died); such errors are not
    /// response failures.
    fn on_http_error(&self, _peer: SocketAddr, _was_idle: bool, _error: &HttpError) {}

    /// Downcast support for [`InspectorChain::lookup`].
    fn as_any(&self) -> &dyn Any;
}

/// An ordered chain of inspectors.
///
/// Events are forwarded to every member in insertion order. A chain
/// holding a single inspector observes exactly what that inspector
/// would observe standalone.
#[derive(Default)]
pub struct InspectorChain {
    inspectors: Vec<Rc<dyn Inspector>>,
}

impl InspectorChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an inspector to the chain.
    pub fn push(&mut self, inspector: Rc<dyn Inspector>) {
        self.inspectors.push(inspector);
    }

    /// Find the first inspector of concrete type `T` in the chain.
    pub fn lookup<T: Inspector>(&self) -> Option<&T> {
        self.inspectors
            .iter()
            .find_map(|inspector| inspector.as_any().downcast_ref::<T>())
    }

    /// Number of chained inspectors.
    pub fn len(&self) -> usize {
        self.inspectors.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.inspectors.is_empty()
    }
}

impl Inspector for InspectorChain {
    fn on_request(&self, request: &HttpRequest) {
        for inspector in &self.inspectors {
            inspector.on_request(request);
        }
    }

    fn on_resolve(&self, request: &HttpRequest, response: &DnsResponse) {
        for inspector in &self.inspectors {
            inspector.on_resolve(request, response);
        }
    }

    fn on_resolve_error(&self, request: &HttpRequest, error: &HttpError) {
        for inspector in &self.inspectors {
            inspector.on_resolve_error(request, error);
        }
    }

    fn on_connect(&self, request: &HttpRequest, peer: SocketAddr) {
        for inspector in &self.inspectors {
            inspector.on_connect(request, peer);
        }
    }

    fn on_connect_error(&self, request: &HttpRequest, peer: SocketAddr, error: &HttpError) {
        for inspector in &self.inspectors {
            inspector.on_connect_error(request, peer, error);
        }
    }

    fn on_http_response(&self, response: &HttpResponse) {
        for inspector in &self.inspectors {
            inspector.on_http_response(response);
        }
    }

    fn on_http_error(&self, peer: SocketAddr, was_idle: bool, error: &HttpError) {
        for inspector in &self.inspectors {
            inspector.on_http_error(peer, was_idle, error);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Counting inspector: aggregate statistics over the client's lifetime.
///
/// Keep an `Rc` to it (or `lookup` it out of a chain) to read the
/// counters while the client runs.
#[derive(Default)]
pub struct StatsInspector {
    total_requests: Cell<u64>,
    resolve_errors: Cell<u64>,
    connects: Cell<u64>,
    connect_errors: Cell<u64>,
    tls_errors: Cell<u64>,
    responses: Cell<u64>,
    http_timeouts: Cell<u64>,
    http_errors: Cell<u64>,
    response_errors: Cell<u64>,
}

impl StatsInspector {
    /// Create a zeroed stats inspector.
    pub fn new() -> Self {
        Self::default()
    }

    /// All requests that entered the dispatcher.
    pub fn total_requests(&self) -> u64 {
        self.total_requests.get()
    }

    /// DNS transport failures.
    pub fn resolve_errors(&self) -> u64 {
        self.resolve_errors.get()
    }

    /// Successful dials ("open connection" events).
    pub fn connects(&self) -> u64 {
        self.connects.get()
    }

    /// Dial and TLS-setup failures.
    pub fn connect_errors(&self) -> u64 {
        self.connect_errors.get()
    }

    /// TLS-specific setup failures (also counted in `connect_errors`).
    pub fn tls_errors(&self) -> u64 {
        self.tls_errors.get()
    }

    /// Fully received responses.
    pub fn responses(&self) -> u64 {
        self.responses.get()
    }

    /// Sweeper-synthesized read/write timeouts.
    pub fn http_timeouts(&self) -> u64 {
        self.http_timeouts.get()
    }

    /// Connection errors that were not timeouts.
    pub fn http_errors(&self) -> u64 {
        self.http_errors.get()
    }

    /// Errors that failed a pending response (excludes idle-socket
    /// errors, which have no awaiting request).
    pub fn response_errors(&self) -> u64 {
        self.response_errors.get()
    }

    /// Requests currently in flight, derived from the other counters.
    pub fn active_requests(&self) -> u64 {
        self.total_requests.get().saturating_sub(
            self.http_timeouts.get()
                + self.resolve_errors.get()
                + self.connect_errors.get()
                + self.response_errors.get()
                + self.responses.get(),
        )
    }
}

impl Inspector for StatsInspector {
    fn on_request(&self, _request: &HttpRequest) {
        self.total_requests.set(self.total_requests.get() + 1);
    }

    fn on_resolve_error(&self, _request: &HttpRequest, _error: &HttpError) {
        self.resolve_errors.set(self.resolve_errors.get() + 1);
    }

    fn on_connect(&self, _request: &HttpRequest, _peer: SocketAddr) {
        self.connects.set(self.connects.get() + 1);
    }

    fn on_connect_error(&self, _request: &HttpRequest, _peer: SocketAddr, error: &HttpError) {
        self.connect_errors.set(self.connect_errors.get() + 1);
        if matches!(error, HttpError::Tls { .. }) {
            self.tls_errors.set(self.tls_errors.get() + 1);
        }
    }

    fn on_http_response(&self, _response: &HttpResponse) {
        self.responses.set(self.responses.get() + 1);
    }

    fn on_http_error(&self, _peer: SocketAddr, was_idle: bool, error: &HttpError) {
        if error.is_timeout() {
            self.http_timeouts.set(self.http_timeouts.get() + 1);
            return;
        }
        self.http_errors.set(self.http_errors.get() + 1);
        // An idle connection has no pending response, so its death is
        // not a response failure.
        if !was_idle {
            self.response_errors.set(self.response_errors.get() + 1);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
