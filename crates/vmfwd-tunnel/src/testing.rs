//! In-memory stream providers for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use vmfwd_core::{
    BoxFuture, BoxedStream, ForwardTarget, ResourceKind, StreamProvider, StreamRequest,
    TunnelError, TunnelResult,
};

pub fn target() -> ForwardTarget {
    ForwardTarget::new(ResourceKind::Vmi, "default", "testvmi")
}

/// Poll `cond` until it holds or `limit` elapses.
pub async fn eventually(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Echoes every byte back and records when the remote end sees close.
#[derive(Default)]
pub struct EchoProvider {
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
    requests: Mutex<Vec<StreamRequest>>,
}

impl EchoProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Streams whose far end has observed EOF or an error.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl StreamProvider for EchoProvider {
    fn open_stream<'a>(&'a self, request: &'a StreamRequest) -> BoxFuture<'a, TunnelResult<BoxedStream>> {
        Box::pin(async move {
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());

            let (near, mut far) = tokio::io::duplex(64 * 1024);
            let closed = self.closed.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    match far.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if far.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                closed.fetch_add(1, Ordering::SeqCst);
            });
            Ok(Box::new(near) as BoxedStream)
        })
    }
}

/// Hands the far end of every opened stream to the test.
pub struct ScriptedProvider {
    opened: AtomicUsize,
    far_ends: mpsc::UnboundedSender<(StreamRequest, DuplexStream)>,
}

impl ScriptedProvider {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(StreamRequest, DuplexStream)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let provider = Arc::new(Self {
            opened: AtomicUsize::new(0),
            far_ends: tx,
        });
        (provider, rx)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl StreamProvider for ScriptedProvider {
    fn open_stream<'a>(&'a self, request: &'a StreamRequest) -> BoxFuture<'a, TunnelResult<BoxedStream>> {
        Box::pin(async move {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let (near, far) = tokio::io::duplex(64 * 1024);
            self.far_ends
                .send((request.clone(), far))
                .map_err(|_| TunnelError::Other("test dropped the receiver".into()))?;
            Ok(Box::new(near) as BoxedStream)
        })
    }
}

/// Fails every open, like a missing VM or a forbidden subresource.
#[derive(Default)]
pub struct FailingProvider {
    attempts: AtomicUsize,
}

impl FailingProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl StreamProvider for FailingProvider {
    fn open_stream<'a>(&'a self, request: &'a StreamRequest) -> BoxFuture<'a, TunnelResult<BoxedStream>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(TunnelError::StreamOpen {
                request: request.to_string(),
                reason: "virtualmachineinstance not found".into(),
            })
        })
    }
}
