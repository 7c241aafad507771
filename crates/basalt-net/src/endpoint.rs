//! Endpoint strings.
//!
//! An endpoint is `host:port` where `host` is a DNS name, an IPv4 literal,
//! or a bracketed IPv6 literal. A bracketed host may contain anything but
//! `]`; an unbracketed host may not contain `:`. The port may not contain
//! `:` and must parse as a `u16`.

use crate::{NetError, NetResult};
use std::net::SocketAddr;

/// Split an endpoint string into host and port.
pub fn parse_endpoint(endpoint: &str) -> NetResult<(String, u16)> {
    let invalid = || NetError::InvalidEndpoint(endpoint.to_string());

    let (host, port) = if let Some(rest) = endpoint.strip_prefix('[') {
        let close = rest.find(']').ok_or_else(invalid)?;
        let host = &rest[..close];
        let port = rest[close + 1..].strip_prefix(':').ok_or_else(invalid)?;
        (host, port)
    } else {
        let colon = endpoint.find(':').ok_or_else(invalid)?;
        (&endpoint[..colon], &endpoint[colon + 1..])
    };

    if host.is_empty() || port.is_empty() || port.contains(':') {
        return Err(invalid());
    }

    let port: u16 = port.parse().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}

/// Render a socket address as an endpoint string, bracketing v6 hosts.
pub fn format_endpoint(addr: &SocketAddr) -> String {
    match addr {
        SocketAddr::V4(v4) => format!("{}:{}", v4.ip(), v4.port()),
        SocketAddr::V6(v6) => format!("[{}]:{}", v6.ip(), v6.port()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostname_endpoint() {
        let (host, port) = parse_endpoint("node.example.com:9876").unwrap();
        assert_eq!(host, "node.example.com");
        assert_eq!(port, 9876);
    }

    #[test]
    fn test_v4_endpoint() {
        let (host, port) = parse_endpoint("0.0.0.0:9876").unwrap();
        assert_eq!(host, "0.0.0.0");
        assert_eq!(port, 9876);
    }

    #[test]
    fn test_bracketed_v6_endpoint() {
        let (host, port) = parse_endpoint("[::1]:9876").unwrap();
        assert_eq!(host, "::1");
        assert_eq!(port, 9876);
    }

    #[test]
    fn test_unbracketed_v6_rejected() {
        assert!(parse_endpoint("::1:9876").is_err());
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(parse_endpoint("no-port").is_err());
        assert!(parse_endpoint(":9876").is_err());
        assert!(parse_endpoint("host:").is_err());
        assert!(parse_endpoint("[]:9876").is_err());
        assert!(parse_endpoint("[::1]9876").is_err());
        assert!(parse_endpoint("[::1]:98:76").is_err());
        assert!(parse_endpoint("host:http").is_err());
        assert!(parse_endpoint("host:65536").is_err());
    }

    #[test]
    fn test_format_brackets_v6() {
        let v4: SocketAddr = "127.0.0.1:9876".parse().unwrap();
        assert_eq!(format_endpoint(&v4), "127.0.0.1:9876");

        let v6: SocketAddr = "[::1]:9876".parse().unwrap();
        assert_eq!(format_endpoint(&v6), "[::1]:9876");
    }

    #[test]
    fn test_roundtrip_through_parse() {
        let v6: SocketAddr = "[::1]:9876".parse().unwrap();
        let (host, port) = parse_endpoint(&format_endpoint(&v6)).unwrap();
        assert_eq!(host, "::1");
        assert_eq!(port, 9876);
    }
}
