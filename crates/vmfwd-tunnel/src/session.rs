//! Per-session lifecycle: `Opening -> Streaming -> Closing -> Closed`.
//!
//! Every TCP connection and UDP client session is driven through the same
//! small state machine and finishes with exactly one [`SessionOutcome`],
//! which says which side ended the session and whether that was an error.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::{debug, info, warn, Level};
use vmfwd_core::Protocol;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the remote stream to open.
    Opening,
    /// Bytes are flowing in both directions.
    Streaming,
    /// One side finished; both endpoints are being closed.
    Closing,
    Closed,
}

impl SessionState {
    /// Transitions only move forward; `Opening -> Closing` covers open failures.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Opening, Streaming) | (Opening, Closing) | (Streaming, Closing) | (Closing, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Opening => "opening",
            SessionState::Streaming => "streaming",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// The stream provider could not open a remote stream.
    OpenFailed(String),
    /// The local peer closed its side.
    LocalClosed,
    /// The remote stream reached end-of-stream.
    RemoteClosed,
    LocalError(io::Error),
    RemoteError(io::Error),
    /// No traffic in either direction for the configured idle period.
    IdleTimeout,
}

impl SessionOutcome {
    /// Whether this outcome should be reported as a failure.
    ///
    /// Errors that only mean "the other side already went away" are normal
    /// teardown and do not count.
    pub fn is_failure(&self) -> bool {
        match self {
            SessionOutcome::OpenFailed(_) => true,
            SessionOutcome::LocalError(e) | SessionOutcome::RemoteError(e) => !is_closed_connection(e),
            SessionOutcome::LocalClosed | SessionOutcome::RemoteClosed | SessionOutcome::IdleTimeout => {
                false
            }
        }
    }

    /// Level of the session's summary line. Failures warn; idle timeouts and
    /// errors that only mean the peer already went away are informational;
    /// plain end-of-stream is debug.
    pub fn log_level(&self) -> Level {
        match self {
            _ if self.is_failure() => Level::WARN,
            SessionOutcome::IdleTimeout
            | SessionOutcome::LocalError(_)
            | SessionOutcome::RemoteError(_) => Level::INFO,
            _ => Level::DEBUG,
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::OpenFailed(reason) => write!(f, "remote open failed: {reason}"),
            SessionOutcome::LocalClosed => f.write_str("local side closed"),
            SessionOutcome::RemoteClosed => f.write_str("remote side closed"),
            SessionOutcome::LocalError(e) => write!(f, "local error: {e}"),
            SessionOutcome::RemoteError(e) => write!(f, "remote error: {e}"),
            SessionOutcome::IdleTimeout => f.write_str("idle timeout"),
        }
    }
}

/// True for errors that are expected when a peer or the stream has already
/// been torn down.
pub fn is_closed_connection(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// Tracks one session's state and emits its summary log line.
#[derive(Debug)]
pub struct SessionTracker {
    id: u64,
    peer: SocketAddr,
    protocol: Protocol,
    remote_port: u16,
    state: SessionState,
    started: Instant,
}

impl SessionTracker {
    pub fn new(peer: SocketAddr, protocol: Protocol, remote_port: u16) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        debug!(session = id, peer = %peer, %protocol, remote_port, "session opening");
        Self {
            id,
            peer,
            protocol,
            remote_port,
            state: SessionState::Opening,
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Move to `next`. Illegal transitions are ignored.
    pub fn advance(&mut self, next: SessionState) {
        if self.state.can_advance_to(next) {
            self.state = next;
        } else {
            debug!(session = self.id, from = %self.state, to = %next, "ignored session transition");
        }
    }

    /// Close the session and log how it ended.
    pub fn finish(&mut self, outcome: &SessionOutcome, sent: u64, received: u64) {
        if self.state != SessionState::Closing {
            self.advance(SessionState::Closing);
        }
        self.advance(SessionState::Closed);

        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        let level = outcome.log_level();
        if level == Level::WARN {
            warn!(
                session = self.id,
                peer = %self.peer,
                protocol = %self.protocol,
                remote_port = self.remote_port,
                sent,
                received,
                elapsed_ms,
                "session failed: {outcome}"
            );
        } else if level == Level::INFO {
            info!(
                session = self.id,
                peer = %self.peer,
                protocol = %self.protocol,
                sent,
                received,
                elapsed_ms,
                "session closed: {outcome}"
            );
        } else {
            debug!(
                session = self.id,
                peer = %self.peer,
                protocol = %self.protocol,
                sent,
                received,
                elapsed_ms,
                "session ended: {outcome}"
            );
        }
    }
}
