//! Client configuration.

use std::time::Duration;
use tidepool_core::SocketSettings;

/// Configuration for the client engine's deadlines and caps.
///
/// All four deadlines are measured in monotonic time against the
/// configured time provider. A zero duration disables the keep-alive
/// and read/write deadlines entirely (and means "no limit" for the
/// connect deadline); the shutdown deadline is always finite so a
/// drain terminates even if peers stop sending.
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    /// Deadline for establishing a TCP connection. Zero means no limit.
    pub connect_timeout: Duration,

    /// Deadline for an active request/response exchange, enforced by
    /// the sweeper. Zero disables it (unbounded active requests).
    pub read_write_timeout: Duration,

    /// Active deadline applied instead of `read_write_timeout` while
    /// the client drains during shutdown.
    pub shutdown_rw_timeout: Duration,

    /// How long an idle connection may sit in the pool before the
    /// sweeper closes it. Zero disables keep-alive: every connection
    /// closes after one response.
    pub keep_alive_timeout: Duration,

    /// Maximum number of requests served by one connection before it is
    /// forcibly closed. Zero means unlimited.
    pub max_keep_alive_requests: usize,

    /// Maximum response body size in bytes. Zero means unlimited.
    pub max_body_size: usize,

    /// TCP parameters applied to every dialed socket.
    pub socket_settings: SocketSettings,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::ZERO,
            read_write_timeout: Duration::ZERO,
            shutdown_rw_timeout: Duration::from_secs(3),
            keep_alive_timeout: Duration::ZERO,
            max_keep_alive_requests: 0,
            max_body_size: 0,
            socket_settings: SocketSettings::default(),
        }
    }
}

impl HttpClientConfig {
    /// Create a configuration with the default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the active read/write deadline.
    pub fn with_read_write_timeout(mut self, timeout: Duration) -> Self {
        self.read_write_timeout = timeout;
        self
    }

    /// Set the keep-alive deadline for idle pooled connections.
    pub fn with_keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = timeout;
        self
    }

    /// Disable keep-alive entirely.
    pub fn with_no_keep_alive(self) -> Self {
        self.with_keep_alive_timeout(Duration::ZERO)
    }

    /// Set the per-connection request cap. Zero means unlimited.
    pub fn with_max_keep_alive_requests(mut self, max: usize) -> Self {
        self.max_keep_alive_requests = max;
        self
    }

    /// Set the response body size cap. Zero means unlimited.
    pub fn with_max_body_size(mut self, max: usize) -> Self {
        self.max_body_size = max;
        self
    }

    /// Set the shutdown-drain deadline.
    pub fn with_shutdown_rw_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_rw_timeout = timeout;
        self
    }

    /// Set the TCP parameters for dialed sockets.
    pub fn with_socket_settings(mut self, settings: SocketSettings) -> Self {
        self.socket_settings = settings;
        self
    }

    /// The body cap as an enforceable byte count (zero maps to "no cap").
    pub(crate) fn effective_max_body_size(&self) -> usize {
        if self.max_body_size == 0 {
            usize::MAX
        } else {
            self.max_body_size
        }
    }
}
