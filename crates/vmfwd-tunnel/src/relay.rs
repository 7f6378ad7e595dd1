//! Bidirectional splice between a local endpoint and a remote stream.
//!
//! Two copy tasks run concurrently, one per direction, inside a `JoinSet`
//! that doubles as the session's single outcome channel. The first task to
//! finish decides the outcome; the other is aborted, which drops its halves
//! and closes both endpoints. The splice returns only after both tasks are
//! gone.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use vmfwd_core::BoxedStream;

use crate::session::SessionOutcome;

const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// Result of one splice: who ended it, and bytes moved each way.
#[derive(Debug)]
pub struct SpliceReport {
    pub outcome: SessionOutcome,
    /// Local -> remote.
    pub sent: u64,
    /// Remote -> local.
    pub received: u64,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    LocalToRemote,
    RemoteToLocal,
}

/// Relay bytes between `local` and `remote` until either side ends.
pub async fn splice<L>(local: L, remote: BoxedStream) -> SpliceReport
where
    L: AsyncRead + AsyncWrite + Send + 'static,
{
    let (local_read, local_write) = tokio::io::split(local);
    let (remote_read, remote_write) = tokio::io::split(remote);

    let sent = Arc::new(AtomicU64::new(0));
    let received = Arc::new(AtomicU64::new(0));

    let mut copies = JoinSet::new();
    copies.spawn(copy_direction(
        local_read,
        remote_write,
        Direction::LocalToRemote,
        sent.clone(),
    ));
    copies.spawn(copy_direction(
        remote_read,
        local_write,
        Direction::RemoteToLocal,
        received.clone(),
    ));

    let outcome = match copies.join_next().await {
        Some(Ok(outcome)) => outcome,
        Some(Err(join_err)) => SessionOutcome::LocalError(std::io::Error::other(join_err.to_string())),
        None => SessionOutcome::LocalClosed,
    };

    copies.abort_all();
    while copies.join_next().await.is_some() {}

    SpliceReport {
        outcome,
        sent: sent.load(Ordering::Relaxed),
        received: received.load(Ordering::Relaxed),
    }
}

/// Copy one direction until EOF or error, then half-close the writer.
async fn copy_direction<R, W>(
    mut reader: R,
    mut writer: W,
    direction: Direction,
    counter: Arc<AtomicU64>,
) -> SessionOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                let _ = writer.shutdown().await;
                return match direction {
                    Direction::LocalToRemote => SessionOutcome::LocalClosed,
                    Direction::RemoteToLocal => SessionOutcome::RemoteClosed,
                };
            }
            Ok(n) => n,
            Err(e) => {
                return match direction {
                    Direction::LocalToRemote => SessionOutcome::LocalError(e),
                    Direction::RemoteToLocal => SessionOutcome::RemoteError(e),
                };
            }
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            return match direction {
                Direction::LocalToRemote => SessionOutcome::RemoteError(e),
                Direction::RemoteToLocal => SessionOutcome::LocalError(e),
            };
        }
        if let Err(e) = writer.flush().await {
            return match direction {
                Direction::LocalToRemote => SessionOutcome::RemoteError(e),
                Direction::RemoteToLocal => SessionOutcome::LocalError(e),
            };
        }
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn moves_bytes_both_ways() {
        let (local, mut local_peer) = tokio::io::duplex(1024);
        let (remote, mut remote_peer) = tokio::io::duplex(1024);

        let task = tokio::spawn(splice(local, Box::new(remote)));

        local_peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        remote_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        remote_peer.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        local_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        drop(local_peer);
        let report = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(matches!(report.outcome, SessionOutcome::LocalClosed));
        assert_eq!(report.sent, 4);
        assert_eq!(report.received, 5);
    }

    #[tokio::test]
    async fn remote_close_closes_local() {
        let (local, mut local_peer) = tokio::io::duplex(1024);
        let (remote, remote_peer) = tokio::io::duplex(1024);

        let task = tokio::spawn(splice(local, Box::new(remote)));
        drop(remote_peer);

        let report = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(matches!(report.outcome, SessionOutcome::RemoteClosed));

        // Both local halves were dropped, so the local peer sees EOF.
        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(5), local_peer.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }
}
