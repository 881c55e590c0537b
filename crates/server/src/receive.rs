//! UDP receive loop
//!
//! A single task reads datagrams, resolves client identity, and runs the
//! cheap synchronous per-packet work: decode, VAD, trigger framing, and
//! job handoff. It never blocks on anything but the socket and is
//! hardened to never fault on any single datagram.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use voice_gateway_codec::{decode_packet, CodecError, PacketType};

use crate::client::{LogicalClient, WorkerJob, WorkerPhase};
use crate::metrics::GatewayMetrics;
use crate::observer::ObserverFrame;
use crate::registry::Observed;
use crate::state::AppState;
use crate::GatewayError;

/// Run the receive loop until the socket fails fatally
pub async fn run_receive_loop(state: Arc<AppState>) -> Result<(), GatewayError> {
    // Inbound datagrams are capped at 1400 by the protocol; headroom
    // lets oversized packets surface as length mismatches instead of
    // silent truncation.
    let mut buf = vec![0u8; 4096];

    tracing::info!(
        port = state.settings.server.listen_port,
        "receive loop started",
    );

    loop {
        let (len, addr) = match state.socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                // Transient per-peer errors (e.g. ICMP port unreachable
                // surfacing on some platforms) must not kill the loop
                tracing::warn!(error = %e, "recv_from failed");
                continue;
            }
        };

        GatewayMetrics::incr(&state.metrics.packets_received);
        handle_datagram(&state, addr, &buf[..len]);
    }
}

/// Parse and dispatch one datagram; all errors end in a counter
fn handle_datagram(state: &Arc<AppState>, addr: SocketAddr, datagram: &[u8]) {
    let (packet_type, payload) = match decode_packet(datagram) {
        Ok(decoded) => decoded,
        Err(CodecError::UnknownType(value)) => {
            GatewayMetrics::incr(&state.metrics.unknown_packets);
            tracing::debug!(client_addr = %addr, value, "unknown packet type");
            return;
        }
        Err(e) => {
            GatewayMetrics::incr(&state.metrics.malformed_packets);
            tracing::debug!(client_addr = %addr, error = %e, "malformed datagram");
            return;
        }
    };

    let client = match resolve_client(state, addr) {
        Some(client) => client,
        None => return,
    };

    client.touch();

    match packet_type {
        PacketType::ControlHello => {
            greet_if_needed(state, &client);
        }
        PacketType::CompressionAdpcm => {
            greet_if_needed(state, &client);
            handle_audio(state, &client, payload);
        }
        PacketType::ControlReset => {
            client.reset_session();
            state.observers.publish(ObserverFrame::reset(client.ip()));
            tracing::info!(client_ip = %client.ip(), "session reset");
        }
        // TTS packets are downstream-only; one arriving here is noise
        PacketType::CompressionTtsMp3 | PacketType::CompressionTtsMp3Fragment => {
            GatewayMetrics::incr(&state.metrics.unknown_packets);
        }
    }
}

/// Identity resolution: IP is authoritative, port is metadata
fn resolve_client(state: &Arc<AppState>, addr: SocketAddr) -> Option<Arc<LogicalClient>> {
    match state.registry.observe(addr) {
        Observed::Created(client) => {
            GatewayMetrics::incr(&state.metrics.clients_created);
            state.spawn_client_tasks(&client);
            state
                .observers
                .publish(ObserverFrame::connected(client.ip(), client.session_id()));
            tracing::info!(
                client_ip = %client.ip(),
                port = addr.port(),
                session_id = %client.session_id(),
                "new client",
            );
            Some(client)
        }
        Observed::Migrated { client, old_port } => {
            GatewayMetrics::incr(&state.metrics.clients_migrated);
            state.observers.publish(ObserverFrame::migrated(
                client.ip(),
                old_port,
                addr.port(),
            ));
            tracing::info!(
                client_ip = %client.ip(),
                old_port,
                new_port = addr.port(),
                "source port migrated",
            );
            Some(client)
        }
        Observed::Existing(client) => Some(client),
        Observed::Rejected => {
            GatewayMetrics::incr(&state.metrics.rejected_clients);
            tracing::warn!(client_addr = %addr, "registry full, dropping unknown IP");
            None
        }
    }
}

/// Queue the one-time greeting for a freshly welcomed client
fn greet_if_needed(state: &Arc<AppState>, client: &Arc<LogicalClient>) {
    if client.mark_welcomed() {
        GatewayMetrics::incr(&state.metrics.greetings_sent);
        client.jobs().offer(WorkerJob::Greet);
        tracing::info!(client_ip = %client.ip(), "greeting queued");
    }
}

/// Decode, frame, and hand off audio; raise the interruption flag when
/// fresh speech lands while a reply is being spoken
fn handle_audio(state: &Arc<AppState>, client: &Arc<LogicalClient>, payload: &[u8]) {
    let samples = match client.decode_audio(payload) {
        Ok(samples) => samples,
        Err(e) => {
            GatewayMetrics::incr(&state.metrics.bad_audio_payloads);
            tracing::debug!(client_ip = %client.ip(), error = %e, "undecodable audio payload");
            return;
        }
    };

    let Some(utterance) = client.feed_samples(&samples) else {
        return;
    };

    GatewayMetrics::incr(&state.metrics.utterances_detected);
    tracing::debug!(
        client_ip = %client.ip(),
        samples = utterance.len(),
        "utterance triggered",
    );

    // The user spoke over the reply: cancel it, debounced by cooldown
    if client.phase() > WorkerPhase::Generating && client.can_interrupt(Instant::now()) {
        client.raise_interrupt();
        GatewayMetrics::incr(&state.metrics.interruptions);
        tracing::info!(client_ip = %client.ip(), "interruption raised");
    }

    if client.jobs().offer(WorkerJob::Utterance(Arc::new(utterance))) {
        GatewayMetrics::incr(&state.metrics.superseded_utterances);
        tracing::debug!(client_ip = %client.ip(), "queued utterance superseded");
    }
}
