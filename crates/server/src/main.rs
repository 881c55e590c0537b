//! Voice Gateway entry point

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voice_gateway_config::{load_settings, Settings};
use voice_gateway_pipeline::{
    EnergyVadConfig, EnergyVadFactory, HttpRecognizer, HttpSynthesizer, StreamingChatModel,
};
use voice_gateway_server::{observer, run_receive_loop, AppState, GatewayError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
    let env = std::env::var("VOICE_GATEWAY_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing is not up yet
            eprintln!("Warning: failed to load config: {e}. Using defaults.");
            Settings::default()
        }
    };
    let settings = Arc::new(settings);

    init_tracing(&settings);
    tracing::info!("Starting Voice Gateway v{}", env!("CARGO_PKG_VERSION"));

    // Bind failure is fatal: exit nonzero instead of limping along
    let bind_addr = SocketAddr::from(([0, 0, 0, 0], settings.server.listen_port));
    let socket = UdpSocket::bind(bind_addr)
        .await
        .map_err(|source| GatewayError::Bind {
            addr: bind_addr,
            source,
        })?;
    let socket = Arc::new(socket);
    tracing::info!(port = settings.server.listen_port, "UDP socket bound");

    let recognizer = Arc::new(HttpRecognizer::new(&settings.collaborators)?);
    let llm = Arc::new(StreamingChatModel::new(&settings.collaborators)?);
    let synthesizer = Arc::new(HttpSynthesizer::new(&settings.collaborators)?);
    let vad_factory = Arc::new(EnergyVadFactory::new(EnergyVadConfig::from(&settings.audio)));

    tracing::info!(
        asr = %settings.collaborators.asr_endpoint,
        llm = %settings.collaborators.llm_endpoint,
        llm_model = %settings.collaborators.llm_model,
        tts = %settings.collaborators.tts_endpoint,
        "collaborators configured",
    );

    let state = Arc::new(AppState::new(
        settings.clone(),
        socket,
        recognizer,
        llm,
        synthesizer,
        vad_factory,
    ));

    let reaper_shutdown = state.start_reaper();
    state.start_metrics_logger();

    let observer_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = observer::run_observer(observer_state).await {
            tracing::error!(error = %e, "observer bridge failed");
        }
    });

    tokio::select! {
        result = run_receive_loop(state) => {
            result?;
        }
        _ = shutdown_signal() => {
            tracing::info!("shutting down");
        }
    }

    let _ = reaper_shutdown.send(true);
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, initiating shutdown");
        }
    }
}

/// Initialize tracing from settings, honoring RUST_LOG when set
fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("voice_gateway={}", settings.observability.log_level).into()
    });

    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
