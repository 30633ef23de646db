//! SOCKS5 target addresses
//!
//! Bidirectional conversion between the wire address tuple
//! (ATYP + bytes + port) and `host:port` forms, for IPv4, IPv6 and
//! length-prefixed domain names.

use super::consts::*;
use crate::error::{CodecError, SocksError};
use bytes::BufMut;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Destination or bound address in a SOCKS5 frame.
///
/// IP addresses keep their native socket form; domain names are carried
/// verbatim together with the port and resolved only when a handler
/// actually dials.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetAddr {
    /// IP address with port
    Ip(SocketAddr),
    /// Domain name with port
    Domain(String, u16),
}

impl TargetAddr {
    /// Create a target from an IPv4 address and port
    pub fn ipv4(ip: Ipv4Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V4(ip), port))
    }

    /// Create a target from an IPv6 address and port
    pub fn ipv6(ip: Ipv6Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V6(ip), port))
    }

    /// Create a target from a domain name and port
    pub fn domain(domain: impl Into<String>, port: u16) -> Self {
        TargetAddr::Domain(domain.into(), port)
    }

    /// Build a target from separate host and port parts, tagging IP
    /// literals as such.
    pub fn from_parts(host: &str, port: u16) -> Result<Self, SocksError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(TargetAddr::Ip(SocketAddr::new(ip, port)));
        }
        if host.is_empty() || host.len() > MAX_DOMAIN_LEN {
            return Err(SocksError::InvalidAddress(host.to_string()));
        }
        Ok(TargetAddr::Domain(host.to_string(), port))
    }

    /// Parse a `host:port` string.
    ///
    /// A host that parses as an IP literal is tagged IPv4/IPv6; anything
    /// else becomes a domain. Fails when the port is missing or invalid,
    /// or when a domain exceeds 255 bytes.
    pub fn parse(text: &str) -> Result<Self, SocksError> {
        // Bracketed IPv6 literals come straight from SocketAddr parsing.
        if let Ok(addr) = text.parse::<SocketAddr>() {
            return Ok(TargetAddr::Ip(addr));
        }

        let (host, port_str) = text
            .rsplit_once(':')
            .ok_or_else(|| SocksError::InvalidAddress(text.to_string()))?;
        let port = port_str
            .parse::<u16>()
            .map_err(|_| SocksError::InvalidAddress(text.to_string()))?;

        if host.is_empty() || host.len() > MAX_DOMAIN_LEN {
            return Err(SocksError::InvalidAddress(text.to_string()));
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(TargetAddr::Ip(SocketAddr::new(ip, port)));
        }
        Ok(TargetAddr::Domain(host.to_string(), port))
    }

    /// Decode an address + port from the wire, given an already-read ATYP.
    ///
    /// Returns the decoded target and the exact number of bytes consumed
    /// from `buf` (the ATYP byte itself is not part of `buf`).
    pub fn decode(buf: &[u8], atyp: u8) -> Result<(Self, usize), CodecError> {
        match atyp {
            SOCKS5_ADDR_TYPE_IPV4 => {
                if buf.len() < 6 {
                    return Err(CodecError::ShortFrame);
                }
                let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
                let port = u16::from_be_bytes([buf[4], buf[5]]);
                Ok((TargetAddr::ipv4(ip, port), 6))
            }
            SOCKS5_ADDR_TYPE_DOMAIN => {
                if buf.is_empty() {
                    return Err(CodecError::ShortFrame);
                }
                let len = buf[0] as usize;
                if len == 0 {
                    return Err(CodecError::BadLength("empty domain"));
                }
                if buf.len() < 1 + len + 2 {
                    return Err(CodecError::ShortFrame);
                }
                let domain = std::str::from_utf8(&buf[1..1 + len])
                    .map_err(|_| CodecError::BadLength("domain is not valid UTF-8"))?;
                if domain.bytes().any(|b| b == 0) {
                    return Err(CodecError::BadLength("domain contains nul"));
                }
                let port = u16::from_be_bytes([buf[1 + len], buf[2 + len]]);
                Ok((TargetAddr::domain(domain, port), 1 + len + 2))
            }
            SOCKS5_ADDR_TYPE_IPV6 => {
                if buf.len() < 18 {
                    return Err(CodecError::ShortFrame);
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&buf[..16]);
                let port = u16::from_be_bytes([buf[16], buf[17]]);
                Ok((TargetAddr::ipv6(Ipv6Addr::from(octets), port), 18))
            }
            other => Err(CodecError::BadAddressType(other)),
        }
    }

    /// The host component without the port (used for blacklist matching
    /// and logging).
    pub fn host(&self) -> String {
        match self {
            TargetAddr::Ip(addr) => addr.ip().to_string(),
            TargetAddr::Domain(domain, _) => domain.clone(),
        }
    }

    /// The port number
    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }

    /// The ATYP byte for this address
    pub fn addr_type(&self) -> u8 {
        match self {
            TargetAddr::Ip(SocketAddr::V4(_)) => SOCKS5_ADDR_TYPE_IPV4,
            TargetAddr::Ip(SocketAddr::V6(_)) => SOCKS5_ADDR_TYPE_IPV6,
            TargetAddr::Domain(_, _) => SOCKS5_ADDR_TYPE_DOMAIN,
        }
    }

    /// Encoded size of ATYP + address + port
    pub fn wire_len(&self) -> usize {
        match self {
            TargetAddr::Ip(SocketAddr::V4(_)) => 1 + 4 + 2,
            TargetAddr::Ip(SocketAddr::V6(_)) => 1 + 16 + 2,
            TargetAddr::Domain(domain, _) => 1 + 1 + domain.len() + 2,
        }
    }

    /// Append ATYP + address + port to a wire buffer
    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        match self {
            TargetAddr::Ip(SocketAddr::V4(addr)) => {
                buf.put_u8(SOCKS5_ADDR_TYPE_IPV4);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            TargetAddr::Ip(SocketAddr::V6(addr)) => {
                buf.put_u8(SOCKS5_ADDR_TYPE_IPV6);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            TargetAddr::Domain(domain, port) => {
                buf.put_u8(SOCKS5_ADDR_TYPE_DOMAIN);
                buf.put_u8(domain.len() as u8);
                buf.put_slice(domain.as_bytes());
                buf.put_u16(*port);
            }
        }
    }

    /// Resolve to a socket address.
    ///
    /// IP targets return immediately; domains go through the system
    /// resolver and take its first answer.
    pub async fn resolve(&self) -> io::Result<SocketAddr> {
        match self {
            TargetAddr::Ip(addr) => Ok(*addr),
            TargetAddr::Domain(domain, port) => {
                let mut answers = tokio::net::lookup_host((domain.as_str(), *port)).await?;
                answers.next().ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::AddrNotAvailable,
                        format!("no addresses for {}", domain),
                    )
                })
            }
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl From<SocketAddr> for TargetAddr {
    fn from(addr: SocketAddr) -> Self {
        TargetAddr::Ip(addr)
    }
}

impl Default for TargetAddr {
    fn default() -> Self {
        TargetAddr::ipv4(Ipv4Addr::UNSPECIFIED, 0)
    }
}
