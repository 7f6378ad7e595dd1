//! `vmfwd port-forward <kind>/<name>[/<namespace>] [proto/]local[:remote]...`
//!
//! Parses everything up front so bad input fails before any socket is
//! opened, then either binds one listener per port and runs until a
//! shutdown signal, or relays a single port over stdin/stdout.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::{info, warn};
use vmfwd_client::KubevirtStreamProvider;
use vmfwd_core::{parse_ports, parse_target, TunnelError};
use vmfwd_tunnel::{ForwardConfig, PortForwarder};

use crate::config::Config;

#[derive(Debug, Args)]
pub struct PortForwardArgs {
    /// Target as <kind>/<name>[/<namespace>] (kind: vm or vmi)
    pub target: String,

    /// Ports as [tcp|udp/]localPort[:remotePort]
    #[arg(required = true)]
    pub ports: Vec<String>,

    /// Local address to bind (IP address or hostname)
    #[arg(long)]
    pub address: Option<String>,

    /// Relay the single port over stdin/stdout instead of a local socket
    #[arg(long)]
    pub stdio: bool,

    /// API server base URL
    #[arg(long)]
    pub server: Option<String>,

    /// Namespace for targets that do not name one
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Close idle UDP client sessions after this many seconds (0 disables)
    #[arg(long = "udp-idle-timeout", value_name = "SECS")]
    pub udp_idle_timeout: Option<u64>,
}

/// Effective settings once flags and the config file are merged.
#[derive(Debug, PartialEq)]
struct Settings {
    server: String,
    namespace: String,
    /// Bind address as given; resolved by [`resolve_address`] before use.
    address: String,
    forward: ForwardConfig,
}

fn resolve(args: &PortForwardArgs, cfg: &Config) -> Settings {
    let idle_secs = args
        .udp_idle_timeout
        .unwrap_or(cfg.forward.udp_idle_timeout);
    let idle = (idle_secs > 0).then(|| Duration::from_secs(idle_secs));

    let forward = ForwardConfig::default()
        .with_udp_buffer_size(cfg.forward.udp_buffer_size)
        .with_udp_idle_timeout(idle);

    Settings {
        server: args.server.clone().unwrap_or_else(|| cfg.cluster.server.clone()),
        namespace: args
            .namespace
            .clone()
            .unwrap_or_else(|| cfg.cluster.namespace.clone()),
        address: args
            .address
            .clone()
            .unwrap_or_else(|| cfg.forward.address.clone()),
        forward,
    }
}

/// An IP literal is used as is. Anything else is looked up and the first
/// address returned wins.
async fn resolve_address(host: &str) -> Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = tokio::net::lookup_host((host, 0))
        .await
        .with_context(|| format!("cannot resolve address '{host}'"))?;
    match addrs.next() {
        Some(addr) => Ok(addr.ip()),
        None => bail!("cannot resolve address '{host}': no addresses found"),
    }
}

pub async fn run(args: PortForwardArgs, cfg: &Config) -> Result<()> {
    let target = parse_target(&args.target)
        .with_context(|| format!("invalid target '{}'", args.target))?;
    let ports = parse_ports(&args.ports)?;
    if args.stdio && ports.len() != 1 {
        return Err(TunnelError::StdioRequiresSinglePort(ports.len()).into());
    }

    let mut settings = resolve(&args, cfg);
    let bind = resolve_address(&settings.address).await?;
    settings.forward = settings.forward.with_address(bind);
    let target = target.with_default_namespace(&settings.namespace);
    let provider = KubevirtStreamProvider::new(&settings.server)
        .with_context(|| format!("invalid API server '{}'", settings.server))?;
    let forwarder = PortForwarder::new(settings.forward, target, Arc::new(provider));

    if args.stdio {
        let report = forwarder.forward_stdio(&ports).await?;
        if report.outcome.is_failure() {
            bail!("stdio forwarding failed: {}", report.outcome);
        }
        return Ok(());
    }

    let set = forwarder.start(&ports).await.into_result()?;
    for handle in set.handles() {
        info!(
            "Forwarding from {} -> {}/{}",
            handle.local_addr(),
            handle.port().protocol,
            handle.port().remote_port
        );
    }

    tokio::select! {
        _ = set.wait() => bail!("all forwarded ports stopped"),
        _ = shutdown_signal() => {
            info!("received shutdown signal, closing all ports");
        }
    }
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
