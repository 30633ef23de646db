//! SOCKS5 frame codec
//!
//! Pure encode/decode over byte slices, no I/O. Every decoder is bounded
//! by the buffer length on each field and returns the frame together with
//! the exact number of bytes consumed. Encoders reserve exact capacity
//! for the frame they produce.

use super::addr::TargetAddr;
use super::consts::*;
use crate::error::CodecError;
use bytes::{BufMut, Bytes, BytesMut};

/// Method-selection request: `[5][NMETHODS][METHODS...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRequest {
    /// Authentication methods offered by the client
    pub methods: Vec<u8>,
}

impl MethodRequest {
    /// Encoded size of the frame
    pub fn wire_len(&self) -> usize {
        2 + self.methods.len()
    }

    /// Encode into a fresh buffer
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        buf.put_u8(SOCKS5_VERSION);
        buf.put_u8(self.methods.len() as u8);
        buf.put_slice(&self.methods);
        buf.freeze()
    }

    /// Decode from a byte slice, returning the frame and bytes consumed
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), CodecError> {
        if buf.len() < 2 {
            return Err(CodecError::ShortFrame);
        }
        if buf[0] != SOCKS5_VERSION {
            return Err(CodecError::BadVersion(buf[0]));
        }
        let count = buf[1] as usize;
        if count == 0 {
            return Err(CodecError::BadLength("zero methods"));
        }
        if buf.len() < 2 + count {
            return Err(CodecError::ShortFrame);
        }
        Ok((
            MethodRequest {
                methods: buf[2..2 + count].to_vec(),
            },
            2 + count,
        ))
    }
}

/// Method-selection reply: `[5][METHOD]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodReply {
    /// Chosen method, or 0xFF for "no acceptable method"
    pub method: u8,
}

impl MethodReply {
    /// Encode into a fresh buffer
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2);
        buf.put_u8(SOCKS5_VERSION);
        buf.put_u8(self.method);
        buf.freeze()
    }

    /// Decode from a byte slice, returning the frame and bytes consumed
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), CodecError> {
        if buf.len() < 2 {
            return Err(CodecError::ShortFrame);
        }
        if buf[0] != SOCKS5_VERSION {
            return Err(CodecError::BadVersion(buf[0]));
        }
        Ok((MethodReply { method: buf[1] }, 2))
    }
}

/// Username/password request: `[1][ULEN][UNAME][PLEN][PASSWD]` (RFC 1929)
///
/// Credentials are kept as raw octets; empty values are legal on the wire
/// and rejected by the auth engine, not the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPassRequest {
    /// Username octets (0..=255 bytes)
    pub username: Vec<u8>,
    /// Password octets (0..=255 bytes)
    pub password: Vec<u8>,
}

impl UserPassRequest {
    /// Encoded size of the frame
    pub fn wire_len(&self) -> usize {
        3 + self.username.len() + self.password.len()
    }

    /// Encode into a fresh buffer
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        buf.put_u8(SOCKS5_AUTH_VERSION);
        buf.put_u8(self.username.len() as u8);
        buf.put_slice(&self.username);
        buf.put_u8(self.password.len() as u8);
        buf.put_slice(&self.password);
        buf.freeze()
    }

    /// Decode from a byte slice, returning the frame and bytes consumed
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), CodecError> {
        if buf.len() < 2 {
            return Err(CodecError::ShortFrame);
        }
        if buf[0] != SOCKS5_AUTH_VERSION {
            return Err(CodecError::BadVersion(buf[0]));
        }
        let ulen = buf[1] as usize;
        if buf.len() < 2 + ulen + 1 {
            return Err(CodecError::ShortFrame);
        }
        let username = buf[2..2 + ulen].to_vec();
        let plen = buf[2 + ulen] as usize;
        if buf.len() < 3 + ulen + plen {
            return Err(CodecError::ShortFrame);
        }
        let password = buf[3 + ulen..3 + ulen + plen].to_vec();
        Ok((UserPassRequest { username, password }, 3 + ulen + plen))
    }
}

/// Username/password reply: `[1][STATUS]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserPassReply {
    /// 0 on success, non-zero on failure
    pub status: u8,
}

impl UserPassReply {
    /// Encode into a fresh buffer
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2);
        buf.put_u8(SOCKS5_AUTH_VERSION);
        buf.put_u8(self.status);
        buf.freeze()
    }

    /// Decode from a byte slice, returning the frame and bytes consumed
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), CodecError> {
        if buf.len() < 2 {
            return Err(CodecError::ShortFrame);
        }
        if buf[0] != SOCKS5_AUTH_VERSION {
            return Err(CodecError::BadVersion(buf[0]));
        }
        Ok((UserPassReply { status: buf[1] }, 2))
    }
}

/// Command request: `[5][CMD][0][ATYP][DST.ADDR][DST.PORT]`
///
/// The command byte is carried raw; the session decides how to treat
/// values outside the three defined commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Command byte (0x01 CONNECT, 0x02 BIND, 0x03 UDP ASSOCIATE)
    pub command: u8,
    /// Destination address
    pub addr: TargetAddr,
}

impl Request {
    /// Encoded size of the frame
    pub fn wire_len(&self) -> usize {
        3 + self.addr.wire_len()
    }

    /// Encode into a fresh buffer
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        buf.put_u8(SOCKS5_VERSION);
        buf.put_u8(self.command);
        buf.put_u8(SOCKS5_RESERVED);
        self.addr.write_to(&mut buf);
        buf.freeze()
    }

    /// Decode from a byte slice, returning the frame and bytes consumed
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), CodecError> {
        if buf.len() < 4 {
            return Err(CodecError::ShortFrame);
        }
        if buf[0] != SOCKS5_VERSION {
            return Err(CodecError::BadVersion(buf[0]));
        }
        let command = buf[1];
        let (addr, used) = TargetAddr::decode(&buf[4..], buf[3])?;
        Ok((Request { command, addr }, 4 + used))
    }
}

/// Command reply: `[5][REP][0][ATYP][BND.ADDR][BND.PORT]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply status byte (RFC 1928 §6)
    pub status: u8,
    /// Bound address
    pub addr: TargetAddr,
}

impl Reply {
    /// Build a reply from a status and an optional bound address.
    ///
    /// Error replies conventionally carry `0.0.0.0:0`.
    pub fn new(status: u8, addr: Option<TargetAddr>) -> Self {
        Reply {
            status,
            addr: addr.unwrap_or_default(),
        }
    }

    /// Encoded size of the frame
    pub fn wire_len(&self) -> usize {
        3 + self.addr.wire_len()
    }

    /// Encode into a fresh buffer
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        buf.put_u8(SOCKS5_VERSION);
        buf.put_u8(self.status);
        buf.put_u8(SOCKS5_RESERVED);
        self.addr.write_to(&mut buf);
        buf.freeze()
    }

    /// Decode from a byte slice, returning the frame and bytes consumed
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), CodecError> {
        if buf.len() < 4 {
            return Err(CodecError::ShortFrame);
        }
        if buf[0] != SOCKS5_VERSION {
            return Err(CodecError::BadVersion(buf[0]));
        }
        let status = buf[1];
        let (addr, used) = TargetAddr::decode(&buf[4..], buf[3])?;
        Ok((Reply { status, addr }, 4 + used))
    }
}

/// UDP datagram header: `[0][0][FRAG][ATYP][DST.ADDR][DST.PORT]`
///
/// The consumed count returned by [`UdpHeader::decode`] is the header
/// length; the datagram payload is everything after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpHeader {
    /// Fragment number; anything non-zero is dropped by the relay
    pub frag: u8,
    /// Destination (client to relay) or source (relay to client) address
    pub addr: TargetAddr,
}

impl UdpHeader {
    /// Header for an unfragmented datagram
    pub fn new(addr: TargetAddr) -> Self {
        UdpHeader { frag: 0, addr }
    }

    /// Encoded size of the header
    pub fn wire_len(&self) -> usize {
        3 + self.addr.wire_len()
    }

    /// Encode the header followed by the datagram payload
    pub fn encode_datagram(&self, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len() + payload.len());
        buf.put_u16(0);
        buf.put_u8(self.frag);
        self.addr.write_to(&mut buf);
        buf.put_slice(payload);
        buf.freeze()
    }

    /// Decode the header from the start of a datagram, returning it and
    /// the header length
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), CodecError> {
        if buf.len() < 4 {
            return Err(CodecError::ShortFrame);
        }
        if buf[0] != 0 || buf[1] != 0 {
            return Err(CodecError::BadLength("non-zero reserved field"));
        }
        let frag = buf[2];
        let (addr, used) = TargetAddr::decode(&buf[4..], buf[3])?;
        Ok((UdpHeader { frag, addr }, 4 + used))
    }
}
