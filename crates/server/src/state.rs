//! Shared application state
//!
//! One service object owns the registry and the injected collaborators;
//! there is no global mutable state. Tasks receive an `Arc<AppState>`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::watch;

use voice_gateway_config::Settings;
use voice_gateway_core::{LanguageModel, SpeechRecognizer, SpeechSynthesizer, VadFactory};
use voice_gateway_pipeline::{CannedUtteranceCache, TriggerConfig};

use crate::client::{ClientBuilder, LogicalClient};
use crate::metrics::GatewayMetrics;
use crate::observer::{ObserverFrame, ObserverHub};
use crate::registry::ClientRegistry;
use crate::{sender, worker};

/// Shared state for all gateway tasks
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: ClientRegistry,
    pub socket: Arc<UdpSocket>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub llm: Arc<dyn LanguageModel>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub canned: CannedUtteranceCache,
    pub observers: ObserverHub,
    pub metrics: GatewayMetrics,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        socket: Arc<UdpSocket>,
        recognizer: Arc<dyn SpeechRecognizer>,
        llm: Arc<dyn LanguageModel>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        vad_factory: Arc<dyn VadFactory>,
    ) -> Self {
        let builder = ClientBuilder {
            vad_factory,
            trigger_config: TriggerConfig::from_audio(&settings.audio),
            dialogue_limit: settings.pipeline.dialogue_history_limit,
            fragment_queue_depth: 8,
        };

        let registry = ClientRegistry::new(
            builder,
            settings.server.max_clients,
            Duration::from_millis(settings.server.reap_idle_ms),
        );

        Self {
            settings,
            registry,
            socket,
            recognizer,
            llm,
            synthesizer,
            canned: CannedUtteranceCache::new(),
            observers: ObserverHub::new(),
            metrics: GatewayMetrics::new(),
        }
    }

    /// Start the worker and sender for a freshly created client
    pub fn spawn_client_tasks(self: &Arc<Self>, client: &Arc<LogicalClient>) {
        let worker_handle = tokio::spawn(worker::run_worker(self.clone(), client.clone()));
        client.register_task(worker_handle);

        if let Some(frag_rx) = client.take_fragment_receiver() {
            let sender_handle =
                tokio::spawn(sender::run_sender(self.clone(), client.clone(), frag_rx));
            client.register_task(sender_handle);
        }
    }

    /// One reaper sweep: abort and announce every idle client
    pub fn reap_now(&self, now: Instant) {
        for client in self.registry.reap(now) {
            client.abort_tasks();
            GatewayMetrics::incr(&self.metrics.clients_reaped);
            self.observers.publish(ObserverFrame::reaped(client.ip()));
            tracing::info!(
                client_ip = %client.ip(),
                session_id = %client.session_id(),
                "reaped idle client",
            );
        }
    }

    /// Start the background reaper; returns a shutdown sender
    pub fn start_reaper(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let state = self.clone();
        let interval = Duration::from_millis(state.settings.server.reap_interval_ms);

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        state.reap_now(Instant::now());
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("reaper shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// Start the periodic metrics snapshot logger
    pub fn start_metrics_logger(self: &Arc<Self>) {
        let interval_ms = self.settings.observability.metrics_interval_ms;
        if interval_ms == 0 {
            return;
        }

        let state = self.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(Duration::from_millis(interval_ms));
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                timer.tick().await;
                state.metrics.log_snapshot();
            }
        });
    }
}
