//! Wire and audio codecs for the voice gateway
//!
//! Three layers, all allocation-bounded and panic-free on hostile input:
//! - `wire`: the outer `[type][len][payload]` datagram framing
//! - `adpcm`: streaming IMA-ADPCM with per-direction predictor state
//! - `fragment`: MP3 chunk fragmentation and client-side reassembly

pub mod adpcm;
pub mod fragment;
pub mod wire;

pub use adpcm::{AdpcmDecoder, AdpcmEncoder};
pub use fragment::{
    fragment_chunk, AssemblerStats, FragmentAssembler, FragmentHeader, FRAGMENT_HEADER_LEN,
};
pub use wire::{decode_packet, encode_packet, PacketType, MAX_DATAGRAM, WIRE_HEADER_LEN};

use thiserror::Error;

/// Codec errors
///
/// Every variant maps to "count and drop" at the call site; none of them
/// mutate codec state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("datagram truncated: {0} bytes")]
    Truncated(usize),

    #[error("declared payload length {declared} does not match remaining {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("unknown packet type {0}")]
    UnknownType(u8),

    #[error("ADPCM payload must be non-empty and even-length, got {0} bytes")]
    BadAdpcmPayload(usize),

    #[error("fragment header truncated: {0} bytes")]
    FragmentTruncated(usize),

    #[error("fragment index {index} out of range for count {count}")]
    FragmentIndex { index: u16, count: u16 },
}
