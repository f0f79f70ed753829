//! Network provider abstraction: the client-side socket factory.
//!
//! The engine never opens sockets itself; it asks a [`NetworkProvider`]
//! to dial a resolved peer address. Swapping the provider swaps the
//! transport: real TCP in production, scripted in-memory streams in
//! tests.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};

/// Opaque TCP parameters applied to every dialed socket.
///
/// Only knobs the engine actually forwards are modeled; everything else
/// stays with the provider implementation.
#[derive(Debug, Clone)]
pub struct SocketSettings {
    /// Disable Nagle's algorithm on the socket.
    pub tcp_nodelay: bool,

    /// Override the socket's IP TTL, when set.
    pub ttl: Option<u32>,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            ttl: None,
        }
    }
}

/// Provider trait for dialing outbound connections.
///
/// Single-core design - no Send bounds needed.
/// Clone allows sharing providers across the client cheaply.
#[async_trait(?Send)]
pub trait NetworkProvider: Clone {
    /// The TCP stream type for this provider.
    type TcpStream: AsyncRead + AsyncWrite + Unpin + 'static;

    /// Connect to a resolved peer address with the given socket settings.
    async fn connect(
        &self,
        addr: SocketAddr,
        settings: &SocketSettings,
    ) -> io::Result<Self::TcpStream>;
}

/// Object-safe alias for anything readable and writable.
///
/// Plain and TLS-wrapped sockets are erased to this one type so a
/// connection owns a single stream regardless of transport.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin {}

impl<T: AsyncRead + AsyncWrite + Unpin> AsyncStream for T {}

/// A boxed, type-erased stream.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Real Tokio networking implementation.
#[derive(Debug, Clone)]
pub struct TokioNetworkProvider;

impl TokioNetworkProvider {
    /// Create a new Tokio network provider.
    pub fn new() -> Self {
        Self
    }
}

impl Default for TokioNetworkProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl NetworkProvider for TokioNetworkProvider {
    type TcpStream = tokio::net::TcpStream;

    async fn connect(
        &self,
        addr: SocketAddr,
        settings: &SocketSettings,
    ) -> io::Result<Self::TcpStream> {
        let stream = tokio::net::TcpStream::connect(addr).await?;
        stream.set_nodelay(settings.tcp_nodelay)?;
        if let Some(ttl) = settings.ttl {
            stream.set_ttl(ttl)?;
        }
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_enable_nodelay() {
        let settings = SocketSettings::default();
        assert!(settings.tcp_nodelay);
        assert_eq!(settings.ttl, None);
    }

    #[tokio::test]
    async fn boxed_stream_erases_duplex() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (client, server) = tokio::io::duplex(64);
        let mut boxed: BoxedStream = Box::new(client);
        let mut server = server;

        boxed.write_all(b"ping").await.expect("write");
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"ping");
    }
}
