//! DNS provider abstraction: IPv4 A-record resolution.
//!
//! The engine only ever needs "all IPv4 addresses for this hostname";
//! resolver internals (caching, retries, upstream transport) belong to
//! the provider implementation.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Errors that can occur while talking to the resolver.
///
/// This is the transport-failure side of resolution; a resolver that
/// *answered* with a negative code produces a successful
/// [`DnsResponse`] carrying that code instead.
#[derive(Debug, Clone, Error)]
pub enum DnsError {
    /// The lookup itself failed (I/O, malformed reply, resolver down).
    #[error("dns lookup for {host} failed: {message}")]
    Lookup {
        /// Hostname that was being resolved.
        host: String,
        /// Details about the failure.
        message: String,
    },
}

/// Response code of a completed DNS query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsResponseCode {
    /// The query succeeded.
    NoError,
    /// The query was malformed.
    FormErr,
    /// The server failed to complete the request.
    ServFail,
    /// The domain does not exist.
    NxDomain,
    /// The server does not support the requested operation.
    NotImp,
    /// The server refused to answer.
    Refused,
}

/// A completed A-record query: response code plus resolved addresses.
#[derive(Debug, Clone)]
pub struct DnsResponse {
    code: DnsResponseCode,
    ips: Vec<Ipv4Addr>,
}

impl DnsResponse {
    /// Build a successful response from a non-empty address list.
    pub fn answer(ips: Vec<Ipv4Addr>) -> Self {
        debug_assert!(!ips.is_empty(), "successful answer must carry addresses");
        Self {
            code: DnsResponseCode::NoError,
            ips,
        }
    }

    /// Build an unsuccessful response carrying only a code.
    pub fn of_code(code: DnsResponseCode) -> Self {
        Self {
            code,
            ips: Vec::new(),
        }
    }

    /// Whether the query succeeded.
    pub fn successful(&self) -> bool {
        self.code == DnsResponseCode::NoError
    }

    /// The response code.
    pub fn code(&self) -> DnsResponseCode {
        self.code
    }

    /// Resolved IPv4 addresses. Non-empty when [`successful`](Self::successful).
    pub fn ips(&self) -> &[Ipv4Addr] {
        &self.ips
    }
}

/// Provider trait for resolving hostnames to IPv4 addresses.
#[async_trait(?Send)]
pub trait DnsProvider: Clone {
    /// Resolve the IPv4 A records of `host`.
    ///
    /// Returns `Err` for resolver I/O failures and `Ok` with an
    /// unsuccessful [`DnsResponse`] for negative answers (NXDOMAIN and
    /// friends).
    async fn resolve_a(&self, host: &str) -> Result<DnsResponse, DnsError>;
}

/// DNS provider backed by the system resolver via tokio.
///
/// The system resolver cannot distinguish negative answer codes, so an
/// empty result maps to [`DnsResponseCode::NxDomain`].
#[derive(Debug, Clone)]
pub struct TokioDnsProvider;

impl TokioDnsProvider {
    /// Create a new system-resolver provider.
    pub fn new() -> Self {
        Self
    }
}

impl Default for TokioDnsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl DnsProvider for TokioDnsProvider {
    async fn resolve_a(&self, host: &str) -> Result<DnsResponse, DnsError> {
        let addrs = tokio::net::lookup_host((host, 0u16))
            .await
            .map_err(|e| DnsError::Lookup {
                host: host.to_string(),
                message: e.to_string(),
            })?;

        let ips: Vec<Ipv4Addr> = addrs
            .filter_map(|addr| match addr {
                std::net::SocketAddr::V4(v4) => Some(*v4.ip()),
                std::net::SocketAddr::V6(_) => None,
            })
            .collect();

        if ips.is_empty() {
            Ok(DnsResponse::of_code(DnsResponseCode::NxDomain))
        } else {
            Ok(DnsResponse::answer(ips))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_is_successful() {
        let response = DnsResponse::answer(vec![Ipv4Addr::LOCALHOST]);
        assert!(response.successful());
        assert_eq!(response.ips(), &[Ipv4Addr::LOCALHOST]);
    }

    #[test]
    fn negative_code_is_unsuccessful() {
        let response = DnsResponse::of_code(DnsResponseCode::NxDomain);
        assert!(!response.successful());
        assert!(response.ips().is_empty());
    }

    #[tokio::test]
    async fn localhost_resolves_via_system() {
        let dns = TokioDnsProvider::new();
        let response = dns.resolve_a("localhost").await.expect("lookup");
        // Some environments are v6-only; either outcome is well-formed.
        if response.successful() {
            assert!(!response.ips().is_empty());
        } else {
            assert_eq!(response.code(), DnsResponseCode::NxDomain);
        }
    }
}
