//! Engine configuration, passed explicitly into [`PortForwarder`](crate::PortForwarder).

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Default UDP read buffer, one Ethernet MTU.
pub const DEFAULT_UDP_BUFFER_SIZE: usize = 1500;

/// Default number of datagrams queued per UDP client session.
pub const DEFAULT_UDP_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardConfig {
    /// Local address every listener binds to.
    pub address: IpAddr,
    /// Largest datagram read from the local UDP socket. Longer datagrams are
    /// forwarded truncated to this size.
    pub udp_buffer_size: usize,
    /// Close a UDP client session after this long without traffic.
    /// `None` ties session lifetime to the remote stream only.
    pub udp_idle_timeout: Option<Duration>,
    /// Datagrams queued for a slow remote stream before new ones are dropped.
    pub udp_queue_depth: usize,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            udp_buffer_size: DEFAULT_UDP_BUFFER_SIZE,
            udp_idle_timeout: None,
            udp_queue_depth: DEFAULT_UDP_QUEUE_DEPTH,
        }
    }
}

impl ForwardConfig {
    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    pub fn with_udp_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.udp_idle_timeout = timeout;
        self
    }

    pub fn with_udp_buffer_size(mut self, size: usize) -> Self {
        self.udp_buffer_size = size.max(1);
        self
    }
}
