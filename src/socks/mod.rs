//! SOCKS5 protocol layer
//!
//! Pure protocol pieces shared by the server and the client library:
//! wire constants, the address type, and the frame codec. Nothing in
//! this module performs I/O.

pub mod addr;
pub mod codec;
pub mod consts;

pub use addr::TargetAddr;
pub use codec::{MethodReply, MethodRequest, Reply, Request, UdpHeader, UserPassReply, UserPassRequest};

use std::fmt;

/// The three SOCKS5 commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksCommand {
    /// Establish a TCP connection to the target
    Connect,
    /// Listen for one inbound TCP connection
    Bind,
    /// Establish a UDP relay
    UdpAssociate,
}

impl SocksCommand {
    /// Parse a command byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            consts::SOCKS5_CMD_TCP_CONNECT => Some(SocksCommand::Connect),
            consts::SOCKS5_CMD_TCP_BIND => Some(SocksCommand::Bind),
            consts::SOCKS5_CMD_UDP_ASSOCIATE => Some(SocksCommand::UdpAssociate),
            _ => None,
        }
    }

    /// The wire value of this command
    pub fn to_byte(self) -> u8 {
        match self {
            SocksCommand::Connect => consts::SOCKS5_CMD_TCP_CONNECT,
            SocksCommand::Bind => consts::SOCKS5_CMD_TCP_BIND,
            SocksCommand::UdpAssociate => consts::SOCKS5_CMD_UDP_ASSOCIATE,
        }
    }
}

impl fmt::Display for SocksCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksCommand::Connect => write!(f, "CONNECT"),
            SocksCommand::Bind => write!(f, "BIND"),
            SocksCommand::UdpAssociate => write!(f, "UDP ASSOCIATE"),
        }
    }
}
