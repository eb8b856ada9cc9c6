//! Wire-format definitions for protocol datagrams.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for malformed or truncated input.
//!
//! No I/O happens here; this is pure data transformation.  The address a
//! datagram came from is not part of the encoding; [`crate::socket::Socket`]
//! hands it back next to the decoded packet.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Flags     |        Payload Length         |   Checksum    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Checksum    |              Payload ...                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 13 bytes.
//! seq(4) + ack(4) + flags(1) + payload_len(2) + checksum(2)
//!
//! The [`flags::DATA`] bit gates the payload field: with it clear the packet
//! has no payload at all, with it set the payload may still be empty.

use std::fmt;

use thiserror::Error;

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// Synchronise sequence numbers (handshake).
    pub const SYN: u8 = 0b0000_0001;
    /// Acknowledgement.
    pub const ACK: u8 = 0b0000_0010;
    /// Finish: the sender has no more data to send.
    pub const FIN: u8 = 0b0000_0100;
    /// A payload field follows the header.
    pub const DATA: u8 = 0b0000_1000;

    /// Every bit this protocol version understands.
    pub const KNOWN: u8 = SYN | ACK | FIN | DATA;
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 13;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 4;
const OFF_FLAGS: usize = 8;
const OFF_PAYLOAD_LEN: usize = 9;
const OFF_CHECKSUM: usize = 11;

/// A complete protocol datagram.
///
/// Immutable once built: construct with [`Packet::control`] or
/// [`Packet::data`] and read the fields back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Position of this packet in the sender's outgoing stream.
    pub seq: u32,
    /// Number of packets the sender has accepted from its peer so far.
    pub ack: u32,
    /// Bitmask of [`flags`] constants, excluding [`flags::DATA`].
    pub flags: u8,
    /// Application bytes; `Some` only on data packets.
    pub payload: Option<Vec<u8>>,
}

impl Packet {
    /// Build a packet carrying only control flags (SYN / ACK / FIN).
    pub fn control(seq: u32, ack: u32, flags: u8) -> Self {
        Self {
            seq,
            ack,
            flags: flags & !flags::DATA,
            payload: None,
        }
    }

    /// Build a data packet.  Data packets carry no control flags.
    pub fn data(seq: u32, ack: u32, payload: Vec<u8>) -> Self {
        Self {
            seq,
            ack,
            flags: 0,
            payload: Some(payload),
        }
    }

    pub fn is_syn(&self) -> bool {
        self.flags & flags::SYN != 0
    }

    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }

    pub fn is_fin(&self) -> bool {
        self.flags & flags::FIN != 0
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// `true` for an acknowledgment that carries nothing for the application
    /// and no protocol event: ACK set, SYN/FIN clear, no payload.
    pub fn is_pure_ack(&self) -> bool {
        self.is_ack() && !self.is_syn() && !self.is_fin() && !self.has_payload()
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// Fails only when the payload does not fit the 16-bit length field.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let payload = self.payload.as_deref().unwrap_or_default();
        if payload.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge(payload.len()));
        }

        let mut wire_flags = self.flags & !flags::DATA;
        if self.payload.is_some() {
            wire_flags |= flags::DATA;
        }

        let mut buf = vec![0u8; HEADER_LEN + payload.len()];
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.ack.to_be_bytes());
        buf[OFF_FLAGS] = wire_flags;
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 2]
            .copy_from_slice(&(payload.len() as u16).to_be_bytes());
        // Checksum field stays zero while computing the checksum.
        buf[HEADER_LEN..].copy_from_slice(payload);

        let csum = internet_checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());

        Ok(buf)
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - an unknown flag bit is set,
    /// - the `payload_len` field disagrees with `buf.len()` (or is nonzero
    ///   on a packet without the [`flags::DATA`] bit), or
    /// - the checksum does not verify.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort);
        }

        let seq = read_u32(buf, OFF_SEQ);
        let ack = read_u32(buf, OFF_ACK);
        let wire_flags = buf[OFF_FLAGS];
        let payload_len = read_u16(buf, OFF_PAYLOAD_LEN) as usize;
        let checksum = read_u16(buf, OFF_CHECKSUM);

        if wire_flags & !flags::KNOWN != 0 {
            return Err(PacketError::UnknownFlags(wire_flags));
        }
        if buf.len() != HEADER_LEN + payload_len {
            return Err(PacketError::LengthMismatch);
        }
        let has_payload = wire_flags & flags::DATA != 0;
        if !has_payload && payload_len != 0 {
            return Err(PacketError::LengthMismatch);
        }

        let mut scratch = buf.to_vec();
        scratch[OFF_CHECKSUM..OFF_CHECKSUM + 2].fill(0);
        if internet_checksum(&scratch) != checksum {
            return Err(PacketError::ChecksumFailed);
        }

        Ok(Packet {
            seq,
            ack,
            flags: wire_flags & !flags::DATA,
            payload: has_payload.then(|| buf[HEADER_LEN..].to_vec()),
        })
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::with_capacity(3);
        if self.is_syn() {
            names.push("SYN");
        }
        if self.is_fin() {
            names.push("FIN");
        }
        if self.is_ack() {
            names.push("ACK");
        }
        if let Some(payload) = &self.payload {
            names.push("DATA");
            return write!(
                f,
                "{} seq={} ack={} len={}",
                names.join("+"),
                self.seq,
                self.ack,
                payload.len()
            );
        }
        write!(f, "{} seq={} ack={}", names.join("+"), self.seq, self.ack)
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("buffer too short to contain a header")]
    BufferTooShort,
    /// `payload_len` field does not match the actual remaining bytes.
    #[error("payload_len field does not match remaining bytes")]
    LengthMismatch,
    /// Checksum did not match recomputed value.
    #[error("checksum verification failed")]
    ChecksumFailed,
    #[error("unknown flag bits in {0:#010b}")]
    UnknownFlags(u8),
    #[error("payload of {0} bytes exceeds the 16-bit length field")]
    PayloadTooLarge(usize),
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

/// Compute the Internet checksum (RFC 1071) over `data`.
///
/// The caller must zero any checksum field within `data` before calling.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);
    for w in words.by_ref() {
        sum += u32::from(u16::from_be_bytes([w[0], w[1]]));
    }
    // Odd trailing byte is padded with a zero on the right.
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}
