//! The remote stream contract.
//!
//! The forwarding engine never talks to the control plane itself. It asks a
//! [`StreamProvider`] for one fresh [`RemoteStream`] per TCP connection or
//! UDP client session and treats it as an opaque duplex byte pipe.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TunnelResult;
use crate::port::Protocol;
use crate::target::ForwardTarget;

/// A bidirectional byte stream to the remote resource.
///
/// Dropping the stream closes it.
pub trait RemoteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> RemoteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedStream = Box<dyn RemoteStream>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Everything a provider needs to open one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub target: Arc<ForwardTarget>,
    pub port: u16,
    pub protocol: Protocol,
}

impl StreamRequest {
    pub fn new(target: Arc<ForwardTarget>, port: u16, protocol: Protocol) -> Self {
        Self {
            target,
            port,
            protocol,
        }
    }

    /// Subresource path for this request, e.g. `portforward/22/tcp`.
    pub fn resource_path(&self) -> String {
        format!("portforward/{}/{}", self.port, self.protocol)
    }
}

impl fmt::Display for StreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.target, self.protocol, self.port)
    }
}

/// Opens remote streams. Each call is independent; no pooling or multiplexing.
pub trait StreamProvider: Send + Sync {
    fn open_stream<'a>(&'a self, request: &'a StreamRequest) -> BoxFuture<'a, TunnelResult<BoxedStream>>;
}

impl<P: StreamProvider + ?Sized> StreamProvider for Arc<P> {
    fn open_stream<'a>(&'a self, request: &'a StreamRequest) -> BoxFuture<'a, TunnelResult<BoxedStream>> {
        (**self).open_stream(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::ResourceKind;

    #[test]
    fn resource_path_includes_protocol() {
        let target = Arc::new(ForwardTarget::new(ResourceKind::Vmi, "ns", "vm1"));
        let req = StreamRequest::new(target.clone(), 22, Protocol::Tcp);
        assert_eq!(req.resource_path(), "portforward/22/tcp");
        let req = StreamRequest::new(target, 53, Protocol::Udp);
        assert_eq!(req.resource_path(), "portforward/53/udp");
        assert_eq!(req.to_string(), "vmi/vm1/ns udp/53");
    }
}
