//! TLS provider abstraction: client-side stream wrapping.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;

use crate::net::BoxedStream;

/// Errors produced while establishing a TLS session.
#[derive(Debug, Clone, Error)]
pub enum TlsError {
    /// The handshake failed.
    #[error("tls handshake with {host} failed: {message}")]
    Handshake {
        /// SNI host the handshake was attempted against.
        host: String,
        /// Details about the failure.
        message: String,
    },

    /// The hostname is not a valid SNI server name.
    #[error("invalid tls server name {host:?}: {message}")]
    InvalidServerName {
        /// The rejected hostname.
        host: String,
        /// Details about the rejection.
        message: String,
    },
}

/// Provider trait for wrapping an established stream with client TLS.
///
/// The request's hostname is used as SNI; the engine hands the plain
/// stream over and gets an erased encrypted stream back.
#[async_trait(?Send)]
pub trait TlsProvider: Clone {
    /// Perform a client handshake over `stream` using `host` as SNI.
    async fn wrap_client(&self, stream: BoxedStream, host: &str) -> Result<BoxedStream, TlsError>;
}

/// TLS provider backed by rustls.
#[derive(Clone)]
pub struct RustlsProvider {
    config: Arc<ClientConfig>,
}

impl RustlsProvider {
    /// Create a provider from a rustls client configuration.
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self { config }
    }
}

#[async_trait(?Send)]
impl TlsProvider for RustlsProvider {
    async fn wrap_client(&self, stream: BoxedStream, host: &str) -> Result<BoxedStream, TlsError> {
        let server_name =
            ServerName::try_from(host.to_string()).map_err(|e| TlsError::InvalidServerName {
                host: host.to_string(),
                message: e.to_string(),
            })?;

        let connector = TlsConnector::from(self.config.clone());
        let tls_stream =
            connector
                .connect(server_name, stream)
                .await
                .map_err(|e| TlsError::Handshake {
                    host: host.to_string(),
                    message: e.to_string(),
                })?;

        Ok(Box::new(tls_stream))
    }
}
