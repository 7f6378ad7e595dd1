//! UDP forwarding over stream-only remote channels.
//!
//! One local socket, one demultiplexing loop. Datagrams are keyed by the
//! textual source address; the first datagram from a new address opens a
//! remote stream and registers a client session, later ones are queued to
//! that session. Each session task pumps remote bytes back to its client
//! as datagrams and removes its own table entry when it ends.
//!
//! There is no peer-side close for UDP, so a session lives as long as its
//! remote stream, or until the optional idle timeout fires.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use vmfwd_core::{BoxedStream, Protocol, StreamProvider, StreamRequest, TunnelError, TunnelResult};

use crate::config::ForwardConfig;
use crate::session::{SessionOutcome, SessionState, SessionTracker};
use crate::stats::{PortStats, SessionGuard};

/// Sizing and lifetime knobs taken from [`ForwardConfig`].
#[derive(Debug, Clone, Copy)]
struct UdpSettings {
    buffer_size: usize,
    idle_timeout: Option<Duration>,
    queue_depth: usize,
}

impl From<&ForwardConfig> for UdpSettings {
    fn from(config: &ForwardConfig) -> Self {
        Self {
            buffer_size: config.udp_buffer_size.max(1),
            idle_timeout: config.udp_idle_timeout,
            queue_depth: config.udp_queue_depth.max(1),
        }
    }
}

/// Live client sessions keyed by source address. The only state shared
/// between the demultiplexing loop and session tasks; no I/O happens while
/// the lock is held.
#[derive(Default)]
struct ClientTable {
    entries: Mutex<HashMap<String, ClientEntry>>,
}

struct ClientEntry {
    session_id: u64,
    tx: mpsc::Sender<Vec<u8>>,
}

impl ClientTable {
    async fn sender(&self, key: &str) -> Option<mpsc::Sender<Vec<u8>>> {
        self.entries.lock().await.get(key).map(|e| e.tx.clone())
    }

    async fn insert(&self, key: String, entry: ClientEntry) {
        self.entries.lock().await.insert(key, entry);
    }

    /// Remove `key` only if it still belongs to `session_id`.
    async fn remove(&self, key: &str, session_id: u64) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.session_id == session_id => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }
}

/// A bound UDP socket fanning datagrams into per-client remote streams.
pub struct UdpProxy {
    socket: Arc<UdpSocket>,
    request: StreamRequest,
    provider: Arc<dyn StreamProvider>,
    stats: Arc<PortStats>,
    settings: UdpSettings,
    clients: Arc<ClientTable>,
}

impl UdpProxy {
    /// Bind the local socket. Bind failures are returned to the caller.
    pub async fn bind(
        addr: SocketAddr,
        request: StreamRequest,
        provider: Arc<dyn StreamProvider>,
        stats: Arc<PortStats>,
        config: &ForwardConfig,
    ) -> TunnelResult<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TunnelError::Bind {
                addr,
                protocol: Protocol::Udp,
                source,
            })?;

        Ok(Self {
            socket: Arc::new(socket),
            request,
            provider,
            stats,
            settings: UdpSettings::from(config),
            clients: Arc::new(ClientTable::default()),
        })
    }

    pub fn local_addr(&self) -> TunnelResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Read datagrams until the socket fails.
    pub async fn run(self) {
        let local_addr = self.socket.local_addr().ok();
        info!(
            local = ?local_addr,
            target = %self.request.target,
            remote_port = self.request.port,
            "forwarding udp"
        );

        // One spare byte tells a datagram that fit from one that was cut.
        let mut buf = vec![0u8; self.settings.buffer_size + 1];
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((n, client)) => {
                            let payload = self.take_payload(&buf, n, client);
                            self.dispatch(payload, client, &mut sessions).await;
                        }
                        Err(e) if is_transient(&e) => {
                            debug!(error = %e, "transient udp receive error");
                        }
                        Err(e) => {
                            error!(local = ?local_addr, error = %e, "udp receive failed, closing socket");
                            break;
                        }
                    }
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "udp session task failed");
                    }
                }
            }
        }

        sessions.shutdown().await;
        debug!(local = ?local_addr, "udp proxy stopped");
    }

    /// Copy the datagram out of the read buffer, truncating oversize ones.
    fn take_payload(&self, buf: &[u8], n: usize, client: SocketAddr) -> Vec<u8> {
        let limit = self.settings.buffer_size;
        if n > limit {
            self.stats.record_truncated();
            warn!(client = %client, limit, "datagram exceeds buffer, forwarding truncated payload");
            buf[..limit].to_vec()
        } else {
            buf[..n].to_vec()
        }
    }

    async fn dispatch(&self, payload: Vec<u8>, client: SocketAddr, sessions: &mut JoinSet<()>) {
        let key = client.to_string();

        if let Some(tx) = self.clients.sender(&key).await {
            match tx.try_send(payload) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!(client = %client, "session queue full, dropping datagram");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(client = %client, "session closing, dropping datagram");
                }
            }
            return;
        }

        let guard = self.stats.sessions().acquire();
        let mut tracker = SessionTracker::new(client, Protocol::Udp, self.request.port);

        let stream = match self.provider.open_stream(&self.request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracker.finish(&SessionOutcome::OpenFailed(e.to_string()), 0, 0);
                return;
            }
        };

        let (tx, rx) = mpsc::channel(self.settings.queue_depth);
        // Fresh channel with capacity >= 1: cannot fail.
        let _ = tx.try_send(payload);
        self.clients
            .insert(
                key.clone(),
                ClientEntry {
                    session_id: tracker.id(),
                    tx,
                },
            )
            .await;
        tracker.advance(SessionState::Streaming);

        sessions.spawn(run_session(ClientSession {
            key,
            client,
            stream,
            rx,
            socket: self.socket.clone(),
            clients: self.clients.clone(),
            settings: self.settings,
            tracker,
            _guard: guard,
        }));
    }
}

struct ClientSession {
    key: String,
    client: SocketAddr,
    stream: BoxedStream,
    rx: mpsc::Receiver<Vec<u8>>,
    socket: Arc<UdpSocket>,
    clients: Arc<ClientTable>,
    settings: UdpSettings,
    tracker: SessionTracker,
    _guard: SessionGuard,
}

/// Last time traffic moved in either direction.
struct Activity {
    epoch: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let ms = self.epoch.elapsed().as_millis() as u64;
        self.last_ms.store(ms, Ordering::Relaxed);
    }

    fn last(&self) -> Instant {
        self.epoch + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }
}

async fn run_session(session: ClientSession) {
    let ClientSession {
        key,
        client,
        stream,
        mut rx,
        socket,
        clients,
        settings,
        mut tracker,
        _guard,
    } = session;

    let (mut remote_read, mut remote_write) = tokio::io::split(stream);
    let activity = Activity::new();
    let mut sent = 0u64;
    let mut received = 0u64;

    let outcome = tokio::select! {
        outcome = remote_to_client(&mut remote_read, &socket, client, settings.buffer_size, &activity, &mut received) => outcome,
        outcome = client_to_remote(&mut rx, &mut remote_write, &activity, &mut sent) => outcome,
        _ = idle_expired(&activity, settings.idle_timeout) => SessionOutcome::IdleTimeout,
    };

    tracker.advance(SessionState::Closing);
    clients.remove(&key, tracker.id()).await;
    drop(rx);
    drop(remote_read);
    drop(remote_write);
    tracker.finish(&outcome, sent, received);
}

/// Each chunk read from the remote stream goes back to the client as one datagram.
async fn remote_to_client(
    remote: &mut ReadHalf<BoxedStream>,
    socket: &UdpSocket,
    client: SocketAddr,
    buffer_size: usize,
    activity: &Activity,
    received: &mut u64,
) -> SessionOutcome {
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = match remote.read(&mut buf).await {
            Ok(0) => return SessionOutcome::RemoteClosed,
            Ok(n) => n,
            Err(e) => return SessionOutcome::RemoteError(e),
        };
        activity.touch();
        match socket.send_to(&buf[..n], client).await {
            Ok(_) => *received += n as u64,
            Err(e) => debug!(client = %client, error = %e, "udp send to client failed"),
        }
    }
}

async fn client_to_remote(
    rx: &mut mpsc::Receiver<Vec<u8>>,
    remote: &mut WriteHalf<BoxedStream>,
    activity: &Activity,
    sent: &mut u64,
) -> SessionOutcome {
    while let Some(datagram) = rx.recv().await {
        activity.touch();
        if let Err(e) = remote.write_all(&datagram).await {
            return SessionOutcome::RemoteError(e);
        }
        if let Err(e) = remote.flush().await {
            return SessionOutcome::RemoteError(e);
        }
        *sent += datagram.len() as u64;
    }
    SessionOutcome::LocalClosed
}

async fn idle_expired(activity: &Activity, idle_timeout: Option<Duration>) {
    let Some(idle) = idle_timeout else {
        return std::future::pending().await;
    };
    loop {
        let deadline = activity.last() + idle;
        if Instant::now() >= deadline {
            return;
        }
        tokio::time::sleep_until(deadline.into()).await;
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
