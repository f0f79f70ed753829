//! Connection state machine: one background task per live socket.
//!
//! A connection is split between the registry (pool membership, close
//! trigger) and a spawned serve task owning the socket. The task writes
//! the request, reads the response, and either parks itself in the
//! keep-alive cache or tears down. While parked it waits on three
//! signals at once: the next lease, a registry close, or activity on
//! the socket (the peer closing it).

use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::Rc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Notify};

use tidepool_core::{BoxedStream, Providers};

use crate::client::ClientCore;
use crate::error::HttpError;
use crate::pool::ConnId;
use crate::request::HttpRequest;
use crate::response::HttpResponse;
use crate::wire;

/// Completion side of one dispatched request.
pub(crate) type ReplySender = oneshot::Sender<Result<HttpResponse, HttpError>>;

/// A leased request: what to send plus where to deliver the outcome.
pub(crate) type Lease = (HttpRequest, ReplySender);

/// Why the registry closed a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CloseReason {
    /// Idle keep-alive deadline expired. Quiet close.
    IdleExpired,
    /// Active read/write (or shutdown-drain) deadline expired.
    DeadlineExpired,
    /// The client is shutting down and drained its idle pool. Quiet close.
    ShuttingDown,
}

/// Shared close trigger between the registry and a connection task.
///
/// The first reason wins; repeated closes are no-ops. Whether a reason
/// is present also discriminates who tore the entry down: the registry
/// evicts before signaling, a task-detected failure evicts afterwards.
#[derive(Clone)]
pub(crate) struct CloseSignal {
    reason: Rc<Cell<Option<CloseReason>>>,
    notify: Rc<Notify>,
}

impl CloseSignal {
    pub(crate) fn new() -> Self {
        Self {
            reason: Rc::new(Cell::new(None)),
            notify: Rc::new(Notify::new()),
        }
    }

    /// Request the connection to close. Idempotent.
    pub(crate) fn close(&self, reason: CloseReason) {
        if self.reason.get().is_none() {
            self.reason.set(Some(reason));
        }
        self.notify.notify_one();
    }

    pub(crate) fn reason(&self) -> Option<CloseReason> {
        self.reason.get()
    }

    async fn closed(&self) {
        if self.reason.get().is_some() {
            return;
        }
        self.notify.notified().await;
    }
}

/// The registry's grip on a connection: lease channel plus close trigger.
#[derive(Clone)]
pub(crate) struct ConnectionHandle {
    lease_tx: mpsc::UnboundedSender<Lease>,
    closer: CloseSignal,
}

impl ConnectionHandle {
    pub(crate) fn new(lease_tx: mpsc::UnboundedSender<Lease>, closer: CloseSignal) -> Self {
        Self { lease_tx, closer }
    }

    /// Hand a request to the connection task.
    pub(crate) fn lease(&self, lease: Lease) -> Result<(), Lease> {
        self.lease_tx.send(lease).map_err(|err| err.0)
    }

    /// Fire the close trigger.
    pub(crate) fn close(&self, reason: CloseReason) {
        self.closer.close(reason);
    }
}

/// Everything a freshly dialed connection needs to start serving.
pub(crate) struct ConnectionSeed {
    pub(crate) id: ConnId,
    pub(crate) peer: SocketAddr,
    pub(crate) stream: BoxedStream,
    pub(crate) lease_rx: mpsc::UnboundedReceiver<Lease>,
    pub(crate) closer: CloseSignal,
    pub(crate) initial: Lease,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Writing,
    Reading,
}

enum IdleOutcome {
    /// The dispatcher leased this connection for another request.
    Leased(Lease),
    /// The registry evicted and closed this connection.
    RegistryClosed,
    /// The peer closed the socket (or sent unsolicited data) while idle.
    PeerActivity(Option<HttpError>),
}

/// Serve loop for one connection. Runs until the socket is retired.
pub(crate) async fn connection_task<P: Providers>(core: Rc<ClientCore<P>>, seed: ConnectionSeed) {
    let ConnectionSeed {
        id,
        peer,
        mut stream,
        mut lease_rx,
        closer,
        initial,
    } = seed;

    let mut keep_alive_count: usize = 0;
    let mut next = Some(initial);

    while let Some((request, reply)) = next.take() {
        let phase = Cell::new(Phase::Writing);
        let keep_alive_requested = core.keep_alive_possible(keep_alive_count);

        let outcome = {
            let serve = serve_one(
                &core,
                &mut stream,
                &request,
                &phase,
                keep_alive_requested,
            );
            tokio::pin!(serve);
            tokio::select! {
                biased;
                _ = closer.closed() => Err(deadline_error(&closer, phase.get())),
                result = &mut serve => result,
            }
        };

        match outcome {
            Ok((response, wire_keep_alive)) => {
                core.observe_response(&response);
                let _ = reply.send(Ok(response));

                if wire_keep_alive && ClientCore::try_return_to_idle(&core, id, keep_alive_count) {
                    keep_alive_count += 1;
                    tracing::trace!(%peer, keep_alive_count, "connection parked for reuse");
                    match idle_wait(&mut stream, &mut lease_rx, &closer).await {
                        IdleOutcome::Leased(lease) => {
                            next = Some(lease);
                            continue;
                        }
                        IdleOutcome::RegistryClosed => {}
                        IdleOutcome::PeerActivity(error) => {
                            core.evict(id);
                            if let Some(error) = error {
                                core.observe_error(peer, true, &error);
                            }
                        }
                    }
                } else {
                    core.evict(id);
                }
                break;
            }
            Err(error) => {
                if closer.reason().is_none() {
                    // Task-detected failure: the registry still holds us.
                    core.evict(id);
                }
                core.observe_error(peer, false, &error);
                let _ = reply.send(Err(error));
                break;
            }
        }
    }

    // Fail any lease that raced with the close.
    lease_rx.close();
    while let Ok((_request, reply)) = lease_rx.try_recv() {
        let _ = reply.send(Err(raced_lease_error(&closer)));
    }

    drop(stream);
    tracing::debug!(%peer, "connection closed");
    core.on_connection_closed();
}

fn deadline_error(closer: &CloseSignal, phase: Phase) -> HttpError {
    match closer.reason() {
        Some(CloseReason::ShuttingDown) => HttpError::ShuttingDown,
        _ => match phase {
            Phase::Writing => HttpError::WriteTimeout,
            Phase::Reading => HttpError::ReadTimeout,
        },
    }
}

fn raced_lease_error(closer: &CloseSignal) -> HttpError {
    match closer.reason() {
        Some(CloseReason::ShuttingDown) => HttpError::ShuttingDown,
        _ => HttpError::Io {
            message: "connection closed before the request was written".to_string(),
        },
    }
}

async fn serve_one<P: Providers>(
    core: &Rc<ClientCore<P>>,
    stream: &mut BoxedStream,
    request: &HttpRequest,
    phase: &Cell<Phase>,
    keep_alive_requested: bool,
) -> Result<(HttpResponse, bool), HttpError> {
    let encoded = wire::encode_request(request, keep_alive_requested);
    stream.write_all(&encoded).await?;
    stream.flush().await?;
    phase.set(Phase::Reading);

    let head_request = request.method() == http::Method::HEAD;
    wire::read_response(stream, head_request, core.max_body_size()).await
}

async fn idle_wait(
    stream: &mut BoxedStream,
    lease_rx: &mut mpsc::UnboundedReceiver<Lease>,
    closer: &CloseSignal,
) -> IdleOutcome {
    let mut probe = [0u8; 1];
    tokio::select! {
        biased;
        lease = lease_rx.recv() => match lease {
            Some(lease) => IdleOutcome::Leased(lease),
            None => IdleOutcome::RegistryClosed,
        },
        _ = closer.closed() => IdleOutcome::RegistryClosed,
        result = stream.read(&mut probe) => IdleOutcome::PeerActivity(match result {
            // EOF or unsolicited bytes: the socket is unusable either way.
            Ok(_) => None,
            Err(error) => Some(HttpError::from(error)),
        }),
    }
}
