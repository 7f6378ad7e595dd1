//! Starts one forwarder per port descriptor and owns the running set.
//!
//! Every descriptor is attempted even when an earlier one fails to bind, so
//! one busy port does not hide problems with the others. Each port runs in
//! its own task; dropping a [`ForwardHandle`] aborts that task and with it
//! every session it spawned.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{error, info};
use vmfwd_core::{ForwardTarget, PortDescriptor, Protocol, StreamProvider, StreamRequest, TunnelError, TunnelResult};

use crate::config::ForwardConfig;
use crate::relay::{splice, SpliceReport};
use crate::stats::PortStats;
use crate::stdio::StdioStream;
use crate::tcp::TcpForwarder;
use crate::udp::UdpProxy;

/// Forwards local ports of one target through one stream provider.
pub struct PortForwarder {
    config: ForwardConfig,
    target: Arc<ForwardTarget>,
    provider: Arc<dyn StreamProvider>,
}

impl PortForwarder {
    pub fn new(config: ForwardConfig, target: ForwardTarget, provider: Arc<dyn StreamProvider>) -> Self {
        Self {
            config,
            target: Arc::new(target),
            provider,
        }
    }

    /// Bind and start every descriptor, in order.
    ///
    /// Returns once each port is either running or has failed to bind.
    pub async fn start(&self, ports: &[PortDescriptor]) -> StartReport {
        let mut running = Vec::with_capacity(ports.len());
        let mut failures = Vec::new();

        for port in ports {
            match self.start_port(*port).await {
                Ok(handle) => running.push(handle),
                Err(e) => {
                    error!(port = %port, error = %e, "failed to start forwarding");
                    failures.push(StartFailure { port: *port, error: e });
                }
            }
        }

        StartReport {
            running: ForwardSet { handles: running },
            failures,
        }
    }

    async fn start_port(&self, port: PortDescriptor) -> TunnelResult<ForwardHandle> {
        let addr = SocketAddr::new(self.config.address, port.local_port);
        let request = StreamRequest::new(self.target.clone(), port.remote_port, port.protocol);
        let stats = PortStats::new();

        let (local_addr, task) = match port.protocol {
            Protocol::Tcp => {
                let forwarder = TcpForwarder::bind(addr, request, self.provider.clone(), stats.clone()).await?;
                let local_addr = forwarder.local_addr()?;
                (local_addr, tokio::spawn(forwarder.run()))
            }
            Protocol::Udp => {
                let proxy =
                    UdpProxy::bind(addr, request, self.provider.clone(), stats.clone(), &self.config).await?;
                let local_addr = proxy.local_addr()?;
                (local_addr, tokio::spawn(proxy.run()))
            }
        };

        info!(
            local = %local_addr,
            target = %self.target,
            remote_port = port.remote_port,
            protocol = %port.protocol,
            "forwarding started"
        );

        Ok(ForwardHandle {
            port,
            local_addr,
            stats,
            task,
        })
    }

    /// Relay the single descriptor's remote stream to this process's stdin
    /// and stdout. No listener is bound.
    pub async fn forward_stdio(&self, ports: &[PortDescriptor]) -> TunnelResult<SpliceReport> {
        let port = match ports {
            [port] => *port,
            _ => return Err(TunnelError::StdioRequiresSinglePort(ports.len())),
        };
        self.forward_io(port, StdioStream::new()).await
    }

    /// Open one remote stream for `port` and splice it with `local`.
    pub async fn forward_io<L>(&self, port: PortDescriptor, local: L) -> TunnelResult<SpliceReport>
    where
        L: AsyncRead + AsyncWrite + Send + 'static,
    {
        let request = StreamRequest::new(self.target.clone(), port.remote_port, port.protocol);
        let remote = self.provider.open_stream(&request).await?;
        info!(request = %request, "forwarding stdio");

        let report = splice(local, remote).await;
        info!(
            outcome = %report.outcome,
            sent = report.sent,
            received = report.received,
            "stdio forwarding finished"
        );
        Ok(report)
    }
}

/// One descriptor that could not be started.
#[derive(Debug)]
pub struct StartFailure {
    pub port: PortDescriptor,
    pub error: TunnelError,
}

/// Result of [`PortForwarder::start`]: the ports that are running and the
/// ones that failed.
#[derive(Debug)]
pub struct StartReport {
    pub running: ForwardSet,
    pub failures: Vec<StartFailure>,
}

impl StartReport {
    /// The running set if every descriptor started, otherwise the first
    /// failure. On failure the running ports are stopped.
    pub fn into_result(mut self) -> TunnelResult<ForwardSet> {
        if self.failures.is_empty() {
            Ok(self.running)
        } else {
            Err(self.failures.remove(0).error)
        }
    }
}

/// A running forwarded port. Dropping it stops the port.
#[derive(Debug)]
pub struct ForwardHandle {
    port: PortDescriptor,
    local_addr: SocketAddr,
    stats: Arc<PortStats>,
    task: JoinHandle<()>,
}

impl ForwardHandle {
    pub fn port(&self) -> PortDescriptor {
        self.port
    }

    /// The bound address; the real port when `local_port` was 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn active_sessions(&self) -> usize {
        self.stats.sessions().active()
    }

    pub fn total_sessions(&self) -> u64 {
        self.stats.sessions().total()
    }

    /// Oversize datagrams forwarded truncated. Always 0 for TCP.
    pub fn truncated_datagrams(&self) -> u64 {
        self.stats.truncated_datagrams()
    }
}

impl Drop for ForwardHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// All ports started by one invocation.
#[derive(Debug, Default)]
pub struct ForwardSet {
    handles: Vec<ForwardHandle>,
}

impl ForwardSet {
    pub fn handles(&self) -> &[ForwardHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait until every port has stopped on its own. Ports only stop when
    /// their socket fails, so this normally runs until the future is
    /// dropped, which stops all ports.
    pub async fn wait(mut self) {
        for handle in &mut self.handles {
            let _ = (&mut handle.task).await;
        }
    }

    /// Stop every port and wait for the tasks to unwind.
    pub async fn shutdown(mut self) {
        for handle in &self.handles {
            handle.task.abort();
        }
        for handle in &mut self.handles {
            let _ = (&mut handle.task).await;
        }
    }
}
