//! Port specification parsing.
//!
//! A port token has the form `[protocol/]localPort[:remotePort]`:
//!
//! ```text
//! 8080            tcp, 8080 -> 8080
//! 8080:80         tcp, 8080 -> 80
//! udp/5353        udp, 5353 -> 5353
//! UDP/5353:53     udp, 5353 -> 53
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{TunnelError, TunnelResult};

/// Transport protocol of a forwarded port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    /// Lowercase wire name, as used in resource paths.
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = TunnelError;

    fn from_str(s: &str) -> TunnelResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(TunnelError::invalid_port(
                s,
                format!("unknown protocol '{other}', expected tcp or udp"),
            )),
        }
    }
}

/// One forwarded port: where to listen locally and which remote port to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortDescriptor {
    pub local_port: u16,
    pub remote_port: u16,
    pub protocol: Protocol,
}

impl PortDescriptor {
    pub fn new(local_port: u16, remote_port: u16, protocol: Protocol) -> Self {
        Self {
            local_port,
            remote_port,
            protocol,
        }
    }

    pub fn tcp(local_port: u16, remote_port: u16) -> Self {
        Self::new(local_port, remote_port, Protocol::Tcp)
    }

    pub fn udp(local_port: u16, remote_port: u16) -> Self {
        Self::new(local_port, remote_port, Protocol::Udp)
    }
}

impl fmt::Display for PortDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.protocol, self.local_port, self.remote_port)
    }
}

impl FromStr for PortDescriptor {
    type Err = TunnelError;

    fn from_str(s: &str) -> TunnelResult<Self> {
        parse_port(s)
    }
}

/// Parse a single `[protocol/]localPort[:remotePort]` token.
pub fn parse_port(spec: &str) -> TunnelResult<PortDescriptor> {
    let (protocol, ports) = match spec.split_once('/') {
        Some((proto, rest)) => {
            // Report the whole token, not just the protocol segment.
            let protocol = proto.parse::<Protocol>().map_err(|e| match e {
                TunnelError::InvalidPort { reason, .. } => TunnelError::invalid_port(spec, reason),
                e => e,
            })?;
            (protocol, rest)
        }
        None => (Protocol::Tcp, spec),
    };

    if ports.contains('/') {
        return Err(TunnelError::invalid_port(spec, "too many '/' separators"));
    }

    let (local, remote) = match ports.split_once(':') {
        Some((local, remote)) => (local, Some(remote)),
        None => (ports, None),
    };

    if local.is_empty() {
        return Err(TunnelError::invalid_port(spec, "missing local port"));
    }
    let local_port = parse_number(spec, local, "local")?;

    let remote_port = match remote {
        Some(remote) => {
            if remote.contains(':') {
                return Err(TunnelError::invalid_port(spec, "too many ':' separators"));
            }
            parse_number(spec, remote, "remote")?
        }
        None => local_port,
    };

    Ok(PortDescriptor {
        local_port,
        remote_port,
        protocol,
    })
}

/// Parse every token, preserving order. Fails on the first bad token.
pub fn parse_ports<S: AsRef<str>>(specs: &[S]) -> TunnelResult<Vec<PortDescriptor>> {
    specs.iter().map(|s| parse_port(s.as_ref())).collect()
}

fn parse_number(spec: &str, segment: &str, which: &str) -> TunnelResult<u16> {
    segment
        .parse::<u16>()
        .map_err(|_| TunnelError::invalid_port(spec, format!("{which} port '{segment}' is not a number in 0-65535")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_port_defaults_to_tcp_and_same_remote() {
        let port = parse_port("8080").unwrap();
        assert_eq!(port, PortDescriptor::tcp(8080, 8080));
    }

    #[test]
    fn udp_with_remote() {
        let port = parse_port("udp/8080:9090").unwrap();
        assert_eq!(port, PortDescriptor::udp(8080, 9090));
    }

    #[test]
    fn protocol_is_case_insensitive() {
        assert_eq!(parse_port("UDP/53").unwrap().protocol, Protocol::Udp);
        assert_eq!(parse_port("Tcp/22:2222").unwrap(), PortDescriptor::tcp(22, 2222));
    }

    #[test]
    fn protocol_without_port_fails() {
        assert!(matches!(parse_port("udp/"), Err(TunnelError::InvalidPort { .. })));
    }

    #[test]
    fn non_numeric_ports_fail() {
        assert!(parse_port("80C0:8X90").is_err());
        assert!(parse_port("8080:http").is_err());
        assert!(parse_port("70000").is_err());
    }

    #[test]
    fn unknown_protocol_fails() {
        let err = parse_port("sctp/80").unwrap_err();
        match err {
            TunnelError::InvalidPort { spec, reason } => {
                assert_eq!(spec, "sctp/80");
                assert_eq!(reason, "unknown protocol 'sctp', expected tcp or udp");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn extra_separators_fail() {
        assert!(parse_port("tcp/udp/80").is_err());
        assert!(parse_port("80:90:100").is_err());
        assert!(parse_port(":80").is_err());
        assert!(parse_port("").is_err());
    }

    #[test]
    fn rendering_round_trips() {
        for spec in ["22", "tcp/8080:80", "udp/5353:53", "UDP/1", "65535:1"] {
            let parsed = parse_port(spec).unwrap();
            let reparsed: PortDescriptor = parsed.to_string().parse().unwrap();
            assert_eq!(parsed, reparsed, "round trip of {spec}");
        }
    }

    #[test]
    fn parse_ports_preserves_order() {
        let ports = parse_ports(&["udp/53", "80:8080", "443"]).unwrap();
        assert_eq!(
            ports,
            vec![
                PortDescriptor::udp(53, 53),
                PortDescriptor::tcp(80, 8080),
                PortDescriptor::tcp(443, 443),
            ]
        );
        assert!(parse_ports(&["80", "nope"]).is_err());
    }
}
