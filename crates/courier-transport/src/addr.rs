//! Transport address parsing.
//!
//! COURIER addresses are opaque strings of the form `tcp://host:port`.
//! The scheme prefix is optional; a bare `host:port` is accepted.

use std::net::SocketAddr;

use crate::transport::{TransportError, TransportResult};

const TCP_SCHEME: &str = "tcp://";

/// Parse a transport address string into a socket address.
///
/// # Errors
///
/// Returns `TransportError::InvalidAddress` for unknown schemes or
/// malformed host/port parts.
pub fn parse_addr(addr: &str) -> TransportResult<SocketAddr> {
    let rest = match addr.split_once("://") {
        Some(("tcp", rest)) => rest,
        Some((scheme, _)) => {
            return Err(TransportError::InvalidAddress(format!(
                "unsupported scheme {scheme:?} in {addr:?}"
            )));
        }
        None => addr,
    };
    rest.parse()
        .map_err(|_| TransportError::InvalidAddress(addr.to_string()))
}

/// Render a socket address in canonical `tcp://host:port` form.
#[must_use]
pub fn format_addr(addr: SocketAddr) -> String {
    format!("{TCP_SCHEME}{addr}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_scheme() {
        let addr = parse_addr("tcp://127.0.0.1:5678").unwrap();
        assert_eq!(addr.port(), 5678);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn test_parse_bare() {
        let addr = parse_addr("0.0.0.0:0").unwrap();
        assert_eq!(addr.port(), 0);
    }

    #[test]
    fn test_reject_unknown_scheme() {
        assert!(matches!(
            parse_addr("ipc:///tmp/sock"),
            Err(TransportError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_reject_garbage() {
        assert!(parse_addr("not an address").is_err());
        assert!(parse_addr("tcp://nohost").is_err());
    }

    #[test]
    fn test_format_roundtrip() {
        let addr: SocketAddr = "127.0.0.1:4100".parse().unwrap();
        assert_eq!(parse_addr(&format_addr(addr)).unwrap(), addr);
    }
}
