//! Gateway-wide counters
//!
//! Plain atomics, incremented from the receive loop and workers and
//! logged as a periodic snapshot. The supersession and late-fragment
//! counters exist to tune the interruption and reassembly policies.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counter block
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    pub packets_received: AtomicU64,
    pub malformed_packets: AtomicU64,
    pub unknown_packets: AtomicU64,
    pub bad_audio_payloads: AtomicU64,
    pub rejected_clients: AtomicU64,
    pub clients_created: AtomicU64,
    pub clients_migrated: AtomicU64,
    pub clients_reaped: AtomicU64,
    pub utterances_detected: AtomicU64,
    pub superseded_utterances: AtomicU64,
    pub interruptions: AtomicU64,
    pub interrupted_chunks: AtomicU64,
    pub chunks_sent: AtomicU64,
    pub fragments_sent: AtomicU64,
    pub greetings_sent: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Emit the current counters as one structured log line
    pub fn log_snapshot(&self) {
        tracing::info!(
            packets_received = Self::get(&self.packets_received),
            malformed_packets = Self::get(&self.malformed_packets),
            unknown_packets = Self::get(&self.unknown_packets),
            bad_audio_payloads = Self::get(&self.bad_audio_payloads),
            rejected_clients = Self::get(&self.rejected_clients),
            clients_created = Self::get(&self.clients_created),
            clients_migrated = Self::get(&self.clients_migrated),
            clients_reaped = Self::get(&self.clients_reaped),
            utterances_detected = Self::get(&self.utterances_detected),
            superseded_utterances = Self::get(&self.superseded_utterances),
            interruptions = Self::get(&self.interruptions),
            interrupted_chunks = Self::get(&self.interrupted_chunks),
            chunks_sent = Self::get(&self.chunks_sent),
            fragments_sent = Self::get(&self.fragments_sent),
            greetings_sent = Self::get(&self.greetings_sent),
            "gateway metrics",
        );
    }
}
