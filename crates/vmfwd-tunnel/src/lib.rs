//! vmfwd-tunnel: the forwarding engine.
//!
//! Binds local TCP listeners and UDP sockets and relays every connection or
//! UDP client onto its own remote stream, opened through a
//! [`StreamProvider`](vmfwd_core::StreamProvider). The engine never touches
//! the network on the remote side itself.

pub mod config;
pub mod orchestrator;
pub mod relay;
pub mod session;
pub mod stats;
pub mod stdio;
pub mod tcp;
pub mod udp;

#[cfg(test)]
mod testing;

pub use config::{ForwardConfig, DEFAULT_UDP_BUFFER_SIZE, DEFAULT_UDP_QUEUE_DEPTH};
pub use orchestrator::{ForwardHandle, ForwardSet, PortForwarder, StartFailure, StartReport};
pub use relay::{splice, SpliceReport};
pub use session::{is_closed_connection, SessionOutcome, SessionState, SessionTracker};
pub use stats::{PortStats, SessionCounter, SessionGuard};
pub use stdio::{StdioStream, ThreadReader};
pub use tcp::TcpForwarder;
pub use udp::UdpProxy;
