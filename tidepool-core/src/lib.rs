//! # tidepool-core
//!
//! Core abstractions for the tidepool HTTP client engine.
//!
//! This crate provides the foundational traits that let the engine talk
//! to its environment (time, task spawning, sockets, DNS, and TLS)
//! without depending on concrete implementations. Application code and
//! tests swap implementations freely; the engine itself never calls
//! tokio directly.
//!
//! ## The Provider Pattern
//!
//! A connection pool interacts with the outside world through a small
//! set of operations: reading the clock, sleeping, spawning background
//! tasks, dialing sockets, resolving names, and wrapping sockets with
//! TLS. Each one is a trait, so deterministic test doubles can stand in
//! for the real thing.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 Client Engine                        │
//! │   Uses: TimeProvider, NetworkProvider, DnsProvider…  │
//! └───────────────────────┬──────────────────────────────┘
//!                         │ depends on traits
//!          ┌──────────────┴──────────────┐
//!          ▼                             ▼
//!   ┌─────────────────┐         ┌─────────────────┐
//!   │     Testing     │         │   Production    │
//!   │  scripted nets  │         │ TokioNetworkProv │
//!   │  canned DNS     │         │ TokioDnsProvider │
//!   └─────────────────┘         └─────────────────┘
//! ```
//!
//! ## Provider Traits
//!
//! | Trait | Production | Purpose |
//! |-------|------------|---------|
//! | [`TimeProvider`] | Wall clock | Sleep, timeout, now() |
//! | [`TaskProvider`] | Tokio spawn_local | Task spawning |
//! | [`NetworkProvider`] | Real TCP | Client socket factory |
//! | [`DnsProvider`] | System resolver | IPv4 A-record lookup |
//! | [`TlsProvider`] | rustls | Client-side TLS wrapping |
//!
//! **Important**: Never call tokio directly in engine code.
//! - ❌ `tokio::time::sleep()`
//! - ✅ `time_provider.sleep()`
//!
//! All traits are single-threaded by design (`#[async_trait(?Send)]`,
//! no `Send` bounds): the engine runs one instance per reactor thread.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod dns;
mod net;
mod providers;
mod task;
mod time;
mod tls;

// Provider trait exports
pub use dns::{DnsError, DnsProvider, DnsResponse, DnsResponseCode, TokioDnsProvider};
pub use net::{
    AsyncStream, BoxedStream, NetworkProvider, SocketSettings, TokioNetworkProvider,
};
pub use providers::{Providers, TokioProviders};
pub use task::{TaskProvider, TokioTaskProvider};
pub use time::{TimeError, TimeProvider, TokioTimeProvider};
pub use tls::{RustlsProvider, TlsError, TlsProvider};
