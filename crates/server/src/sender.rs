//! Per-client sender task
//!
//! Serializes outbound fragments for one client: in index order, chunk by
//! chunk, paced by a small inter-packet gap so a burst of fragments does
//! not overrun kernel buffers. Chunk K+1 never interleaves with chunk K.
//! When the interruption flag goes up the stream stops mid-chunk and the
//! queue is flushed; no fragment of an aborted chunk is sent afterwards.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::client::{LogicalClient, SendJob};
use crate::metrics::GatewayMetrics;
use crate::state::AppState;

/// Sender main loop; lives as long as the client
pub async fn run_sender(
    state: Arc<AppState>,
    client: Arc<LogicalClient>,
    mut jobs: mpsc::Receiver<SendJob>,
) {
    let gap = Duration::from_millis(state.settings.transport.fragment_gap_ms);

    while let Some(job) = jobs.recv().await {
        let mut aborted = false;

        for datagram in &job.datagrams {
            if client.is_interrupted() {
                aborted = true;
                break;
            }

            // Re-read the address per fragment: the port may migrate
            // while a long chunk is in flight
            let addr = client.current_addr();
            if let Err(e) = state.socket.send_to(datagram, addr).await {
                tracing::warn!(
                    client_ip = %client.ip(),
                    error = %e,
                    "fragment send failed, dropping rest of chunk",
                );
                break;
            }

            GatewayMetrics::incr(&state.metrics.fragments_sent);
            tokio::time::sleep(gap).await;
        }

        if aborted {
            GatewayMetrics::incr(&state.metrics.interrupted_chunks);
            // Flush the in-flight queue; dropping the jobs (and their
            // `done` acks) tells the worker the reply was cut off
            let mut flushed = 0usize;
            while let Ok(stale) = jobs.try_recv() {
                flushed += 1;
                drop(stale);
            }
            tracing::debug!(
                client_ip = %client.ip(),
                chunk_index = job.chunk_index,
                flushed,
                "outbound stream aborted",
            );
            drop(job.done);
        } else {
            let _ = job.done.send(());
        }
    }
}
