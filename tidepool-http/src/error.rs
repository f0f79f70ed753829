//! Error types for the client engine.

use std::net::SocketAddr;
use thiserror::Error;
use tidepool_core::{DnsError, DnsResponseCode, TlsError};

/// Errors surfaced through the request future.
///
/// The engine never retries: each failure closes the offending
/// connection (if any) and completes the single awaiting future.
#[derive(Debug, Clone, Error)]
pub enum HttpError {
    /// The request URL could not be used to build a request.
    #[error("request url {url:?} is invalid: {reason}")]
    InvalidUrl {
        /// The offending URL text.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A header name or value was rejected by the builder.
    #[error("invalid header: {reason}")]
    InvalidHeader {
        /// Why it was rejected.
        reason: String,
    },

    /// DNS resolution failed at the transport level.
    #[error("dns resolution for {host} failed")]
    Resolve {
        /// Hostname that was being resolved.
        host: String,
        /// The resolver failure.
        #[source]
        source: DnsError,
    },

    /// The resolver answered with a negative response code.
    #[error("dns query for {host} answered {code:?}")]
    DnsQuery {
        /// Hostname that was being resolved.
        host: String,
        /// The negative response code.
        code: DnsResponseCode,
    },

    /// The transport-level dial failed.
    #[error("connect to {addr} failed: {message}")]
    Connect {
        /// Peer address that was being dialed.
        addr: SocketAddr,
        /// Details about the failure.
        message: String,
    },

    /// The TLS handshake failed.
    ///
    /// Routed like a connect error (the dial never produced a usable
    /// connection) but kept distinct so observers can track it.
    #[error("tls setup for {host} failed")]
    Tls {
        /// SNI host of the attempted handshake.
        host: String,
        /// The handshake failure.
        #[source]
        source: TlsError,
    },

    /// An HTTPS request was issued without a configured TLS context.
    ///
    /// Raised before any network I/O takes place.
    #[error("https request without a configured tls context")]
    MissingTlsContext,

    /// The active read deadline expired while awaiting the response.
    #[error("read timed out")]
    ReadTimeout,

    /// The active write deadline expired while sending the request.
    #[error("write timed out")]
    WriteTimeout,

    /// The response could not be parsed.
    #[error("malformed response: {reason}")]
    Protocol {
        /// What was wrong with the response.
        reason: String,
    },

    /// The response body exceeded the configured size cap.
    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge {
        /// The configured cap in bytes.
        limit: usize,
    },

    /// The request arrived after `stop()` began.
    #[error("client is shutting down")]
    ShuttingDown,

    /// An I/O error occurred mid-exchange.
    #[error("i/o error: {message}")]
    Io {
        /// Details about the failure.
        message: String,
    },
}

impl From<std::io::Error> for HttpError {
    fn from(error: std::io::Error) -> Self {
        HttpError::Io {
            message: error.to_string(),
        }
    }
}

impl HttpError {
    /// Whether this error is a sweeper-synthesized timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, HttpError::ReadTimeout | HttpError::WriteTimeout)
    }
}
