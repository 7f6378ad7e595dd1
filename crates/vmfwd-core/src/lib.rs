//! vmfwd-core: shared types for forwarding local ports to a virtual machine.
//!
//! Provides port-spec parsing, target resolution, the error taxonomy, and the
//! abstract stream provider the forwarding engine opens remote streams through.

pub mod error;
pub mod port;
pub mod stream;
pub mod target;

// Re-export commonly used items at crate root.
pub use error::{TargetError, TunnelError, TunnelResult};
pub use port::{parse_port, parse_ports, PortDescriptor, Protocol};
pub use stream::{BoxFuture, BoxedStream, RemoteStream, StreamProvider, StreamRequest};
pub use target::{parse_target, ForwardTarget, ResourceKind};
