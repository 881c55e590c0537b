//! Datagram framing: all outer packet parsing is done here.
//!
//! Layout on the wire: one byte packet type, four bytes payload length
//! (big-endian), then the payload. Anything that does not parse exactly is
//! rejected with a typed error so the receive loop can count and drop it.

use crate::CodecError;

/// Maximum datagram size, chosen to stay under common path MTU after
/// IP/UDP headers.
pub const MAX_DATAGRAM: usize = 1400;

/// Outer header size: type byte + u32 payload length
pub const WIRE_HEADER_LEN: usize = 5;

/// Packet type discriminants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Client connection announcement, empty payload
    ControlHello = 0,
    /// ADPCM-compressed microphone audio, client to server
    CompressionAdpcm = 1,
    /// Whole TTS MP3 chunk, server to client (small chunks only)
    CompressionTtsMp3 = 2,
    /// One fragment of a TTS MP3 chunk with an inner sequencing header
    CompressionTtsMp3Fragment = 3,
    /// Session reset request, empty payload
    ControlReset = 4,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PacketType::ControlHello),
            1 => Some(PacketType::CompressionAdpcm),
            2 => Some(PacketType::CompressionTtsMp3),
            3 => Some(PacketType::CompressionTtsMp3Fragment),
            4 => Some(PacketType::ControlReset),
            _ => None,
        }
    }
}

/// Frame a payload into a datagram
pub fn encode_packet(packet_type: PacketType, payload: &[u8]) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(WIRE_HEADER_LEN + payload.len());
    datagram.push(packet_type as u8);
    datagram.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    datagram.extend_from_slice(payload);
    datagram
}

/// Parse a datagram into its type and payload slice
///
/// The declared length must match the remaining bytes exactly; trailing
/// garbage is as suspect as truncation on an unauthenticated socket.
pub fn decode_packet(datagram: &[u8]) -> Result<(PacketType, &[u8]), CodecError> {
    if datagram.len() < WIRE_HEADER_LEN {
        return Err(CodecError::Truncated(datagram.len()));
    }

    let declared = u32::from_be_bytes([datagram[1], datagram[2], datagram[3], datagram[4]]) as usize;
    let payload = &datagram[WIRE_HEADER_LEN..];

    if declared != payload.len() {
        return Err(CodecError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }

    let packet_type =
        PacketType::from_u8(datagram[0]).ok_or(CodecError::UnknownType(datagram[0]))?;

    Ok((packet_type, payload))
}
