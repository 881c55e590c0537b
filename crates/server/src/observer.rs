//! WebSocket observer bridge
//!
//! An observer subscribes to one logical client by IP and receives
//! lifecycle events and transcripts as JSON frames; never audio. The
//! binding is weak: events are routed by an IP lookup at publish time, so
//! reaping a client needs no observer bookkeeping and address migration
//! needs no rebinding at all.

use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::mpsc;

use voice_gateway_core::SessionId;

use crate::state::AppState;
use crate::GatewayError;

/// Event kinds mirrored to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserverEventKind {
    Connected,
    Migrated,
    Utterance,
    ReplyText,
    Reset,
    Reaped,
}

/// One observer frame: `{event, client_ip, payload}`
#[derive(Debug, Clone, Serialize)]
pub struct ObserverFrame {
    pub event: ObserverEventKind,
    pub client_ip: IpAddr,
    pub payload: serde_json::Value,
}

impl ObserverFrame {
    pub fn connected(client_ip: IpAddr, session_id: SessionId) -> Self {
        Self {
            event: ObserverEventKind::Connected,
            client_ip,
            payload: json!({ "session_id": session_id.to_string() }),
        }
    }

    pub fn migrated(client_ip: IpAddr, old_port: u16, new_port: u16) -> Self {
        Self {
            event: ObserverEventKind::Migrated,
            client_ip,
            payload: json!({ "old_port": old_port, "new_port": new_port }),
        }
    }

    pub fn utterance(client_ip: IpAddr, text: &str) -> Self {
        Self {
            event: ObserverEventKind::Utterance,
            client_ip,
            payload: json!({ "text": text }),
        }
    }

    pub fn reply_text(client_ip: IpAddr, text: &str) -> Self {
        Self {
            event: ObserverEventKind::ReplyText,
            client_ip,
            payload: json!({ "text": text }),
        }
    }

    pub fn reset(client_ip: IpAddr) -> Self {
        Self {
            event: ObserverEventKind::Reset,
            client_ip,
            payload: json!({}),
        }
    }

    pub fn reaped(client_ip: IpAddr) -> Self {
        Self {
            event: ObserverEventKind::Reaped,
            client_ip,
            payload: json!({}),
        }
    }
}

/// Fan-out hub from gateway internals to bound observers
#[derive(Default)]
pub struct ObserverHub {
    subscribers: RwLock<HashMap<IpAddr, Vec<mpsc::UnboundedSender<ObserverFrame>>>>,
}

impl ObserverHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a new observer to a client IP
    pub fn subscribe(&self, ip: IpAddr) -> mpsc::UnboundedReceiver<ObserverFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().entry(ip).or_default().push(tx);
        rx
    }

    /// Deliver a frame to every observer bound to its client IP,
    /// pruning observers that have gone away.
    pub fn publish(&self, frame: ObserverFrame) {
        let ip = frame.client_ip;

        let delivered = {
            let subscribers = self.subscribers.read();
            match subscribers.get(&ip) {
                Some(senders) => senders
                    .iter()
                    .map(|tx| tx.send(frame.clone()).is_ok())
                    .collect::<Vec<_>>(),
                None => return,
            }
        };

        if delivered.iter().any(|ok| !ok) {
            let mut subscribers = self.subscribers.write();
            if let Some(senders) = subscribers.get_mut(&ip) {
                senders.retain(|tx| !tx.is_closed());
                if senders.is_empty() {
                    subscribers.remove(&ip);
                }
            }
        }
    }

    pub fn observer_count(&self, ip: IpAddr) -> usize {
        self.subscribers
            .read()
            .get(&ip)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

/// First frame an observer must send to bind itself
#[derive(Debug, Deserialize)]
struct BindRequest {
    client_ip: IpAddr,
}

/// Build the observer HTTP router
pub fn observer_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/observe", get(ws_handler))
        .with_state(state)
}

/// Serve the observer WebSocket endpoint until shutdown
pub async fn run_observer(state: Arc<AppState>) -> Result<(), GatewayError> {
    let port = state.settings.server.observer_port;
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "observer bridge listening");

    axum::serve(listener, observer_router(state)).await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_observer(socket, state))
}

async fn handle_observer(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // The observer's first frame names the client IP it watches
    let bind = match ws_rx.next().await {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<BindRequest>(&text) {
            Ok(bind) => bind,
            Err(e) => {
                tracing::warn!(error = %e, "observer sent an invalid bind frame");
                let _ = ws_tx
                    .send(Message::Text(
                        json!({ "status": "error", "reason": "invalid bind frame" }).to_string(),
                    ))
                    .await;
                return;
            }
        },
        _ => return,
    };

    let ip = bind.client_ip;
    let mut events = state.observers.subscribe(ip);
    tracing::info!(client_ip = %ip, "observer bound");

    let _ = ws_tx
        .send(Message::Text(
            json!({ "status": "bound", "client_ip": ip }).to_string(),
        ))
        .await;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(frame) = event else { break };
                let Ok(text) = serde_json::to_string(&frame) else { continue };
                if ws_tx.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            message = ws_rx.next() => {
                match message {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Pings are answered by axum; other frames are ignored
                    _ => {}
                }
            }
        }
    }

    tracing::info!(client_ip = %ip, "observer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_routes_by_ip() {
        let hub = ObserverHub::new();
        let watched: IpAddr = "10.0.0.5".parse().unwrap();
        let other: IpAddr = "10.0.0.6".parse().unwrap();

        let mut rx = hub.subscribe(watched);
        hub.publish(ObserverFrame::reset(other));
        hub.publish(ObserverFrame::reset(watched));

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.client_ip, watched);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dead_observers_are_pruned() {
        let hub = ObserverHub::new();
        let ip: IpAddr = "10.0.0.5".parse().unwrap();

        let rx = hub.subscribe(ip);
        drop(rx);
        hub.publish(ObserverFrame::reset(ip));

        assert_eq!(hub.observer_count(ip), 0);
    }

    #[test]
    fn test_frame_shape() {
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        let frame = ObserverFrame::migrated(ip, 40001, 40002);
        let value = serde_json::to_value(&frame).unwrap();

        assert_eq!(value["event"], "migrated");
        assert_eq!(value["client_ip"], "10.0.0.5");
        assert_eq!(value["payload"]["old_port"], 40001);
        assert_eq!(value["payload"]["new_port"], 40002);
    }

    #[test]
    fn test_multiple_observers_all_receive() {
        let hub = ObserverHub::new();
        let ip: IpAddr = "10.0.0.5".parse().unwrap();

        let mut rx1 = hub.subscribe(ip);
        let mut rx2 = hub.subscribe(ip);
        hub.publish(ObserverFrame::utterance(ip, "hello"));

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }
}
