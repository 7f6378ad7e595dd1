use std::net::SocketAddr;

use thiserror::Error;

use crate::port::Protocol;

/// Errors produced by target-string resolution.
///
/// Each malformed-input condition has its own variant so callers can assert
/// on the cause rather than on the message text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("expected name after '/'")]
    MissingName,

    #[error("namespace cannot be empty")]
    EmptyNamespace,

    #[error("unsupported resource kind '{0}'")]
    UnsupportedKind(String),

    #[error("target '{0}' has too many separators")]
    TooManySeparators(String),
}

/// Errors produced by the vmfwd forwarding engine.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("invalid port '{spec}': {reason}")]
    InvalidPort { spec: String, reason: String },

    #[error("invalid target: {0}")]
    InvalidTarget(#[from] TargetError),

    #[error("cannot bind {protocol} {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        protocol: Protocol,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open stream to {request}: {reason}")]
    StreamOpen { request: String, reason: String },

    #[error("--stdio requires exactly one port, got {0}")]
    StdioRequiresSinglePort(usize),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl TunnelError {
    /// Shorthand for a port-spec parse failure.
    pub fn invalid_port(spec: &str, reason: impl Into<String>) -> Self {
        TunnelError::InvalidPort {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }
}

pub type TunnelResult<T> = Result<T, TunnelError>;
