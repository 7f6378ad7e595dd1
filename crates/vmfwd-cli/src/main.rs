//! vmfwd: forward local TCP/UDP ports to a KubeVirt virtual machine.
//!
//! Each local connection or UDP client gets its own stream through the
//! cluster's `portforward` subresource.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// vmfwd: VM port forwarding
#[derive(Parser)]
#[command(name = "vmfwd", version, about = "Forward local TCP/UDP ports to a KubeVirt virtual machine")]
struct Cli {
    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long = "log-level", global = true)]
    log_level: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Forward one or more local ports to a VM or VMI
    PortForward(commands::port_forward::PortForwardArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(config::Config::default_path);
    let cfg = config::Config::load(&config_path);

    let level = cli.log_level.clone().unwrap_or_else(|| {
        cfg.as_ref()
            .map(|c| c.forward.log_level.clone())
            .unwrap_or_else(|_| "info".to_string())
    });
    init_tracing(cli.verbose, &level);

    let result = match cfg {
        Ok(cfg) => match cli.command {
            Command::PortForward(args) => commands::port_forward::run(args, &cfg).await,
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("vmfwd: {e:#}");
        std::process::exit(1);
    }
}

/// Logs go to stderr so `--stdio` keeps stdout for payload.
fn init_tracing(verbose: bool, level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("vmfwd=debug,vmfwd_cli=debug,vmfwd_tunnel=debug,vmfwd_client=debug,vmfwd_core=debug")
        } else {
            EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .init();
}
