//! Voice Gateway Server
//!
//! The UDP endpoint of the duplex audio gateway: client registry with
//! IP-keyed identity, the receive loop, per-client pipeline workers and
//! senders, the idle-client reaper, and the WebSocket observer bridge.

pub mod client;
pub mod metrics;
pub mod observer;
pub mod receive;
pub mod registry;
pub mod sender;
pub mod state;
pub mod worker;

pub use client::{ClientBuilder, LogicalClient, SendJob, WorkerJob, WorkerPhase};
pub use metrics::GatewayMetrics;
pub use observer::{ObserverFrame, ObserverHub};
pub use receive::run_receive_loop;
pub use registry::{ClientRegistry, Observed};
pub use state::AppState;

use std::net::SocketAddr;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] voice_gateway_config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
