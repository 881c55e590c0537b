//! MP3 chunk fragmentation and client-side reassembly
//!
//! One TTS reply chunk can exceed the datagram budget, so it is split into
//! fragments carrying an inner sequencing header. The assembler on the
//! client side reconstructs a chunk exactly or drops it; a partially
//! received chunk never surfaces.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;

use voice_gateway_core::SessionId;

use crate::wire::{encode_packet, PacketType, WIRE_HEADER_LEN};
use crate::CodecError;

/// Inner header size: 16-byte session id + u32 chunk + u16 index + u16 count
pub const FRAGMENT_HEADER_LEN: usize = 24;

/// Sequencing metadata carried ahead of the MP3 bytes in every fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub session_id: SessionId,
    pub chunk_index: u32,
    pub fragment_index: u16,
    pub fragment_count: u16,
}

impl FragmentHeader {
    /// Parse the header off the front of a fragment payload
    pub fn decode(payload: &[u8]) -> Result<(Self, &[u8]), CodecError> {
        if payload.len() < FRAGMENT_HEADER_LEN {
            return Err(CodecError::FragmentTruncated(payload.len()));
        }

        let mut session_bytes = [0u8; 16];
        session_bytes.copy_from_slice(&payload[..16]);

        let chunk_index = u32::from_be_bytes([payload[16], payload[17], payload[18], payload[19]]);
        let fragment_index = u16::from_be_bytes([payload[20], payload[21]]);
        let fragment_count = u16::from_be_bytes([payload[22], payload[23]]);

        if fragment_count == 0 || fragment_index >= fragment_count {
            return Err(CodecError::FragmentIndex {
                index: fragment_index,
                count: fragment_count,
            });
        }

        Ok((
            Self {
                session_id: SessionId::from_bytes(session_bytes),
                chunk_index,
                fragment_index,
                fragment_count,
            },
            &payload[FRAGMENT_HEADER_LEN..],
        ))
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.session_id.as_bytes());
        buf.extend_from_slice(&self.chunk_index.to_be_bytes());
        buf.extend_from_slice(&self.fragment_index.to_be_bytes());
        buf.extend_from_slice(&self.fragment_count.to_be_bytes());
    }
}

/// Split one MP3 chunk into ready-to-send datagrams
///
/// Fragments are numbered 0..count and every datagram stays within
/// `max_datagram` bytes. An empty chunk produces no fragments.
pub fn fragment_chunk(
    session_id: SessionId,
    chunk_index: u32,
    mp3: &[u8],
    max_datagram: usize,
) -> Vec<Bytes> {
    let budget = max_datagram.saturating_sub(WIRE_HEADER_LEN + FRAGMENT_HEADER_LEN);
    if budget == 0 || mp3.is_empty() {
        return Vec::new();
    }

    let count = mp3.len().div_ceil(budget);
    let mut datagrams = Vec::with_capacity(count);

    for (index, slice) in mp3.chunks(budget).enumerate() {
        let header = FragmentHeader {
            session_id,
            chunk_index,
            fragment_index: index as u16,
            fragment_count: count as u16,
        };

        let mut payload = Vec::with_capacity(FRAGMENT_HEADER_LEN + slice.len());
        header.encode_into(&mut payload);
        payload.extend_from_slice(slice);

        datagrams.push(Bytes::from(encode_packet(
            PacketType::CompressionTtsMp3Fragment,
            &payload,
        )));
    }

    datagrams
}

/// Counters surfaced for tuning the loss and supersession policies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    pub completed: u64,
    pub timed_out: u64,
    pub superseded: u64,
    pub late_fragments: u64,
}

struct PendingChunk {
    fragments: Vec<Option<Vec<u8>>>,
    received: usize,
    first_seen: Instant,
}

/// Client-side reassembler keyed by (session, chunk)
///
/// Policy: a newer chunk index supersedes older incomplete chunks of the
/// same session, and late fragments of superseded chunks are dropped.
/// Incomplete chunks expire after the timeout.
pub struct FragmentAssembler {
    timeout: Duration,
    pending: HashMap<(SessionId, u32), PendingChunk>,
    latest_chunk: HashMap<SessionId, u32>,
    stats: AssemblerStats,
}

impl FragmentAssembler {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: HashMap::new(),
            latest_chunk: HashMap::new(),
            stats: AssemblerStats::default(),
        }
    }

    /// Feed one fragment; returns the complete chunk when the last piece
    /// arrives. `now` drives timeout eviction so callers control time.
    pub fn accept(
        &mut self,
        header: FragmentHeader,
        payload: &[u8],
        now: Instant,
    ) -> Option<Vec<u8>> {
        self.expire(now);

        let session = header.session_id;
        let latest = self.latest_chunk.get(&session).copied();
        match latest {
            Some(latest) if header.chunk_index < latest => {
                self.stats.late_fragments += 1;
                return None;
            }
            Some(latest) if header.chunk_index > latest => {
                self.supersede(session, header.chunk_index);
            }
            None => {
                self.latest_chunk.insert(session, header.chunk_index);
            }
            _ => {}
        }

        let key = (session, header.chunk_index);
        let count = header.fragment_count as usize;

        let mut count_mismatch = false;
        let mut complete = false;
        {
            let entry = self.pending.entry(key).or_insert_with(|| PendingChunk {
                fragments: vec![None; count],
                received: 0,
                first_seen: now,
            });

            // A count that disagrees with the first fragment seen means
            // the chunk is unreconstructable either way.
            if entry.fragments.len() != count {
                count_mismatch = true;
            } else {
                let slot = &mut entry.fragments[header.fragment_index as usize];
                if slot.is_none() {
                    *slot = Some(payload.to_vec());
                    entry.received += 1;
                }
                complete = entry.received == count;
            }
        }

        if count_mismatch {
            self.pending.remove(&key);
            return None;
        }

        if complete {
            let entry = self.pending.remove(&key)?;
            self.stats.completed += 1;

            let mut chunk = Vec::new();
            for fragment in entry.fragments {
                chunk.extend_from_slice(&fragment?);
            }
            return Some(chunk);
        }

        None
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    pub fn pending_chunks(&self) -> usize {
        self.pending.len()
    }

    fn expire(&mut self, now: Instant) {
        let timeout = self.timeout;
        let before = self.pending.len();
        self.pending
            .retain(|_, chunk| now.duration_since(chunk.first_seen) <= timeout);
        self.stats.timed_out += (before - self.pending.len()) as u64;
    }

    fn supersede(&mut self, session: SessionId, new_chunk: u32) {
        let before = self.pending.len();
        self.pending
            .retain(|(sid, chunk), _| *sid != session || *chunk >= new_chunk);
        self.stats.superseded += (before - self.pending.len()) as u64;
        self.latest_chunk.insert(session, new_chunk);
    }
}
