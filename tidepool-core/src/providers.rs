//! Provider bundle trait for simplified type parameters.
//!
//! This module provides a unified [`Providers`] trait that bundles the
//! environment providers into a single type parameter, eliminating type
//! parameter explosion in downstream code.
//!
//! ## Motivation
//!
//! Without bundling, engine code must carry five separate type
//! parameters:
//!
//! ```text
//! struct HttpClient<N, D, T, TP, S>
//! where
//!     N: NetworkProvider + 'static,
//!     D: DnsProvider + 'static,
//!     T: TimeProvider + 'static,
//!     TP: TaskProvider + 'static,
//!     S: TlsProvider + 'static,
//! ```
//!
//! With bundling, this simplifies to:
//!
//! ```text
//! struct HttpClient<P: Providers>
//! ```

use crate::{
    DnsProvider, NetworkProvider, RustlsProvider, TaskProvider, TimeProvider, TlsProvider,
    TokioDnsProvider, TokioNetworkProvider, TokioTaskProvider, TokioTimeProvider,
};

/// Bundle of environment providers for a runtime environment.
///
/// The trait uses associated types to preserve type information at
/// compile time without runtime dispatch. The TLS accessor returns an
/// `Option` because an absent TLS context is a first-class state: HTTPS
/// requests against a bundle without TLS fail before any network I/O.
pub trait Providers: Clone + 'static {
    /// Network provider type: the client-side socket factory.
    type Network: NetworkProvider + 'static;

    /// DNS provider type for A-record resolution.
    type Dns: DnsProvider + 'static;

    /// Time provider type for sleep, timeout, and time queries.
    type Time: TimeProvider + 'static;

    /// Task provider type for spawning local tasks.
    type Task: TaskProvider + 'static;

    /// TLS provider type for wrapping client sockets.
    type Tls: TlsProvider + 'static;

    /// Get the network provider instance.
    fn network(&self) -> &Self::Network;

    /// Get the DNS provider instance.
    fn dns(&self) -> &Self::Dns;

    /// Get the time provider instance.
    fn time(&self) -> &Self::Time;

    /// Get the task provider instance.
    fn task(&self) -> &Self::Task;

    /// Get the TLS provider, if one is configured.
    fn tls(&self) -> Option<&Self::Tls>;
}

/// Production providers using the Tokio runtime and system resolver.
///
/// TLS is off by default; enable it with
/// [`with_tls`](TokioProviders::with_tls).
#[derive(Clone)]
pub struct TokioProviders {
    network: TokioNetworkProvider,
    dns: TokioDnsProvider,
    time: TokioTimeProvider,
    task: TokioTaskProvider,
    tls: Option<RustlsProvider>,
}

impl TokioProviders {
    /// Create a new production providers bundle without TLS.
    pub fn new() -> Self {
        Self {
            network: TokioNetworkProvider::new(),
            dns: TokioDnsProvider::new(),
            time: TokioTimeProvider::new(),
            task: TokioTaskProvider,
            tls: None,
        }
    }

    /// Enable TLS with the given rustls-backed provider.
    pub fn with_tls(mut self, tls: RustlsProvider) -> Self {
        self.tls = Some(tls);
        self
    }
}

impl Default for TokioProviders {
    fn default() -> Self {
        Self::new()
    }
}

impl Providers for TokioProviders {
    type Network = TokioNetworkProvider;
    type Dns = TokioDnsProvider;
    type Time = TokioTimeProvider;
    type Task = TokioTaskProvider;
    type Tls = RustlsProvider;

    fn network(&self) -> &Self::Network {
        &self.network
    }

    fn dns(&self) -> &Self::Dns {
        &self.dns
    }

    fn time(&self) -> &Self::Time {
        &self.time
    }

    fn task(&self) -> &Self::Task {
        &self.task
    }

    fn tls(&self) -> Option<&Self::Tls> {
        self.tls.as_ref()
    }
}
