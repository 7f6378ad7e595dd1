//! TCP forwarding: one local listener, one remote stream per accepted
//! connection.
//!
//! The accept loop owns a `JoinSet` of connection tasks. A failed connection
//! (remote open error, mid-session I/O error) only ends its own task; the
//! loop keeps accepting. Dropping the loop aborts every connection task and
//! with it every socket and stream.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use vmfwd_core::{Protocol, StreamProvider, StreamRequest, TunnelError, TunnelResult};

use crate::relay::splice;
use crate::session::{SessionOutcome, SessionState, SessionTracker};
use crate::stats::{PortStats, SessionGuard};

/// A bound TCP listener relaying each connection to its own remote stream.
pub struct TcpForwarder {
    listener: TcpListener,
    request: StreamRequest,
    provider: Arc<dyn StreamProvider>,
    stats: Arc<PortStats>,
}

impl TcpForwarder {
    /// Bind the local listener. Bind failures are returned to the caller.
    pub async fn bind(
        addr: SocketAddr,
        request: StreamRequest,
        provider: Arc<dyn StreamProvider>,
        stats: Arc<PortStats>,
    ) -> TunnelResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TunnelError::Bind {
                addr,
                protocol: Protocol::Tcp,
                source,
            })?;

        Ok(Self {
            listener,
            request,
            provider,
            stats,
        })
    }

    /// The address actually bound (differs from the request when port 0 was used).
    pub fn local_addr(&self) -> TunnelResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) {
        let local_addr = self.listener.local_addr().ok();
        info!(
            local = ?local_addr,
            target = %self.request.target,
            remote_port = self.request.port,
            "forwarding tcp"
        );

        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            debug!(peer = %peer, "tcp connection accepted");
                            let guard = self.stats.sessions().acquire();
                            sessions.spawn(handle_connection(
                                stream,
                                peer,
                                self.request.clone(),
                                self.provider.clone(),
                                guard,
                            ));
                        }
                        Err(e) => {
                            error!(local = ?local_addr, error = %e, "accept failed, closing listener");
                            break;
                        }
                    }
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "tcp session task failed");
                    }
                }
            }
        }

        drop(self.listener);
        while sessions.join_next().await.is_some() {}
        debug!(local = ?local_addr, "tcp forwarder stopped");
    }
}

async fn handle_connection(
    local: TcpStream,
    peer: SocketAddr,
    request: StreamRequest,
    provider: Arc<dyn StreamProvider>,
    _guard: SessionGuard,
) {
    let mut tracker = SessionTracker::new(peer, Protocol::Tcp, request.port);

    let remote = match provider.open_stream(&request).await {
        Ok(remote) => remote,
        Err(e) => {
            drop(local);
            tracker.finish(&SessionOutcome::OpenFailed(e.to_string()), 0, 0);
            return;
        }
    };

    tracker.advance(SessionState::Streaming);
    let _ = local.set_nodelay(true);

    let report = splice(local, remote).await;
    tracker.advance(SessionState::Closing);
    tracker.finish(&report.outcome, report.sent, report.received);
}
