//! Test doubles for driving the client without real sockets.
//!
//! The same provider-bundle seam the production client uses carries a
//! scripted in-memory network and canned DNS here; time stays the real
//! tokio provider so paused-clock tests control every deadline.

use async_trait::async_trait;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::rc::Rc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use tidepool_http::{
    DnsError, DnsProvider, DnsResponse, DnsResponseCode, NetworkProvider, Providers,
    RustlsProvider, SocketSettings, TokioTaskProvider, TokioTimeProvider,
};

/// What the scripted peer does with a dialed connection.
#[derive(Clone)]
pub enum ServerBehavior {
    /// Answer each request with a canned 200.
    Respond {
        /// Response body text.
        body: &'static str,
        /// Whether the response advertises keep-alive.
        keep_alive: bool,
        /// Artificial delay before each response.
        delay: Duration,
        /// Close the socket after this many responses (0 = never).
        max_requests: usize,
    },
    /// Accept the request and never answer.
    Stall,
    /// Fail the dial itself.
    Refuse,
}

impl ServerBehavior {
    pub fn keep_alive(body: &'static str) -> Self {
        Self::Respond {
            body,
            keep_alive: true,
            delay: Duration::ZERO,
            max_requests: 0,
        }
    }

    pub fn close_after_each(body: &'static str) -> Self {
        Self::Respond {
            body,
            keep_alive: false,
            delay: Duration::ZERO,
            max_requests: 0,
        }
    }

    /// Advertise keep-alive but drop the socket after one response.
    pub fn keep_alive_then_drop(body: &'static str) -> Self {
        Self::Respond {
            body,
            keep_alive: true,
            delay: Duration::ZERO,
            max_requests: 1,
        }
    }

    pub fn with_delay(mut self, new_delay: Duration) -> Self {
        if let Self::Respond { delay, .. } = &mut self {
            *delay = new_delay;
        }
        self
    }
}

struct MockNetworkState {
    dials: Vec<SocketAddr>,
    default_behavior: ServerBehavior,
    per_addr: HashMap<SocketAddr, ServerBehavior>,
}

/// Scripted socket factory over in-memory duplex streams.
///
/// Every dial spawns a local peer task driving the server half
/// according to the configured behavior, and is recorded for
/// assertions.
#[derive(Clone)]
pub struct MockNetwork {
    state: Rc<RefCell<MockNetworkState>>,
}

impl MockNetwork {
    pub fn new(default_behavior: ServerBehavior) -> Self {
        Self {
            state: Rc::new(RefCell::new(MockNetworkState {
                dials: Vec::new(),
                default_behavior,
                per_addr: HashMap::new(),
            })),
        }
    }

    pub fn set_behavior(&self, addr: SocketAddr, behavior: ServerBehavior) {
        self.state.borrow_mut().per_addr.insert(addr, behavior);
    }

    pub fn dials(&self) -> Vec<SocketAddr> {
        self.state.borrow().dials.clone()
    }

    pub fn dial_count(&self) -> usize {
        self.state.borrow().dials.len()
    }
}

#[async_trait(?Send)]
impl NetworkProvider for MockNetwork {
    type TcpStream = DuplexStream;

    async fn connect(
        &self,
        addr: SocketAddr,
        _settings: &SocketSettings,
    ) -> io::Result<DuplexStream> {
        let behavior = {
            let mut state = self.state.borrow_mut();
            state.dials.push(addr);
            state
                .per_addr
                .get(&addr)
                .unwrap_or(&state.default_behavior)
                .clone()
        };

        if matches!(behavior, ServerBehavior::Refuse) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            ));
        }

        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::task::spawn_local(run_server(server, behavior));
        Ok(client)
    }
}

async fn read_request_head(stream: &mut DuplexStream) -> bool {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        if buf.windows(4).any(|window| window == b"\r\n\r\n") {
            return true;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return false,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

async fn run_server(mut stream: DuplexStream, behavior: ServerBehavior) {
    match behavior {
        ServerBehavior::Respond {
            body,
            keep_alive,
            delay,
            max_requests,
        } => {
            let mut served = 0usize;
            loop {
                if !read_request_head(&mut stream).await {
                    return;
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let connection = if keep_alive {
                    "Connection: keep-alive\r\n"
                } else {
                    "Connection: close\r\n"
                };
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}\r\n{}",
                    body.len(),
                    connection,
                    body
                );
                if stream.write_all(response.as_bytes()).await.is_err() {
                    return;
                }
                served += 1;
                if !keep_alive || (max_requests != 0 && served >= max_requests) {
                    return;
                }
            }
        }
        ServerBehavior::Stall => {
            let _ = read_request_head(&mut stream).await;
            // Keep the socket open without ever answering.
            let mut sink = [0u8; 1024];
            loop {
                match stream.read(&mut sink).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
            }
        }
        ServerBehavior::Refuse => {}
    }
}

/// One canned resolver outcome.
#[derive(Clone)]
pub enum DnsOutcome {
    Answer(Vec<Ipv4Addr>),
    Negative(DnsResponseCode),
    Fail(&'static str),
}

/// Canned DNS provider.
///
/// Unconfigured hosts answer NXDOMAIN.
#[derive(Clone)]
pub struct MockDns {
    records: Rc<RefCell<HashMap<String, DnsOutcome>>>,
}

impl MockDns {
    pub fn new() -> Self {
        Self {
            records: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    pub fn insert(&self, host: &str, ips: Vec<Ipv4Addr>) {
        self.records
            .borrow_mut()
            .insert(host.to_string(), DnsOutcome::Answer(ips));
    }

    pub fn insert_outcome(&self, host: &str, outcome: DnsOutcome) {
        self.records.borrow_mut().insert(host.to_string(), outcome);
    }
}

#[async_trait(?Send)]
impl DnsProvider for MockDns {
    async fn resolve_a(&self, host: &str) -> Result<DnsResponse, DnsError> {
        let outcome = self.records.borrow().get(host).cloned();
        match outcome {
            Some(DnsOutcome::Answer(ips)) => Ok(DnsResponse::answer(ips)),
            Some(DnsOutcome::Negative(code)) => Ok(DnsResponse::of_code(code)),
            Some(DnsOutcome::Fail(message)) => Err(DnsError::Lookup {
                host: host.to_string(),
                message: message.to_string(),
            }),
            None => Ok(DnsResponse::of_code(DnsResponseCode::NxDomain)),
        }
    }
}

/// Provider bundle wiring the mocks to a real (pausable) clock.
#[derive(Clone)]
pub struct TestProviders {
    pub network: MockNetwork,
    pub dns: MockDns,
    pub time: TokioTimeProvider,
    pub task: TokioTaskProvider,
}

impl TestProviders {
    pub fn new(default_behavior: ServerBehavior) -> Self {
        Self {
            network: MockNetwork::new(default_behavior),
            dns: MockDns::new(),
            time: TokioTimeProvider::new(),
            task: TokioTaskProvider,
        }
    }
}

impl Providers for TestProviders {
    type Network = MockNetwork;
    type Dns = MockDns;
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
        None
    }
}
