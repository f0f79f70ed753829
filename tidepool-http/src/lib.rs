//! # tidepool-http
//!
//! Asynchronous HTTP/1.1 client engine built around a per-origin
//! keep-alive connection pool.
//!
//! The engine is optimized for high-throughput outbound traffic to many
//! distinct origins: connections are cached per resolved peer address,
//! a single amortized sweeper enforces idle and active deadlines over
//! thousands of sockets, and the dispatch path resolves, leases or
//! dials, sends, receives, and recycles without locks on one reactor
//! thread.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              Application Code                   │
//! │          client.request(request).await          │
//! ├─────────────────────────────────────────────────┤
//! │     HttpClient (dispatch + lifecycle)           │
//! │     • DNS resolve, round-robin peer selection   │
//! │     • Pool lease or dial, shutdown drain        │
//! ├─────────────────────────────────────────────────┤
//! │     PoolRegistry (keep-alive cache)             │
//! │     • Arena-backed intrusive idle/busy lists    │
//! │     • Single expiry sweeper, two deadlines      │
//! ├─────────────────────────────────────────────────┤
//! │     Connection (serve loop per socket)          │
//! │     • HTTP/1.1 wire codec                       │
//! │     • Keep-alive accounting, quiet idle close   │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`HttpClient`] | Request dispatch, sweeper, start/stop drain |
//! | [`HttpRequest`]/[`HttpResponse`] | Message model over `http` types |
//! | [`Inspector`] | Synchronous lifecycle observation hooks |
//! | [`HttpClientConfig`] | Deadlines, caps, socket settings |
//!
//! ## Quick Start
//!
//! ```ignore
//! use tidepool_core::TokioProviders;
//! use tidepool_http::{HttpClient, HttpClientConfig, HttpRequest};
//!
//! let config = HttpClientConfig::new()
//!     .with_keep_alive_timeout(Duration::from_secs(30));
//! let client = HttpClient::builder(TokioProviders::new())
//!     .with_config(config)
//!     .build();
//!
//! let response = client
//!     .request(HttpRequest::get("http://example.com/")?.build())
//!     .await?;
//! assert_eq!(response.status(), 200);
//!
//! client.stop().await;
//! ```
//!
//! The client is `!Send` by construction: run one instance per reactor
//! thread, inside a `LocalSet`. Cross-thread use is a compile error,
//! which is the thread-confinement check of this engine.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// Re-export core types for convenience
pub use tidepool_core::{
    AsyncStream, BoxedStream, DnsError, DnsProvider, DnsResponse, DnsResponseCode,
    NetworkProvider, Providers, RustlsProvider, SocketSettings, TaskProvider, TimeError,
    TimeProvider, TlsError, TlsProvider, TokioDnsProvider, TokioNetworkProvider, TokioProviders,
    TokioTaskProvider, TokioTimeProvider,
};

// =============================================================================
// Modules
// =============================================================================

/// Client configuration: deadlines, caps, socket settings.
pub mod config;

/// Error taxonomy surfaced through request futures.
pub mod error;

/// Lifecycle observation hooks.
pub mod inspector;

/// Request model and builder.
pub mod request;

/// Response model.
pub mod response;

mod client;
mod connection;
mod pool;
mod wire;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use client::{HttpClient, HttpClientBuilder};
pub use config::HttpClientConfig;
pub use error::HttpError;
pub use inspector::{Inspector, InspectorChain, StatsInspector};
pub use request::{HttpRequest, HttpRequestBuilder};
pub use response::HttpResponse;
