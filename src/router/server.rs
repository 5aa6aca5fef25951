//! Signaling router HTTP/WebSocket server
//!
//! One WebSocket endpoint at `/ws`. A connection missing its identity
//! parameters, or reusing a live identity, is accepted and then closed with
//! an explicit reason so the browser can surface it; it is never silently
//! dropped. Each accepted connection gets one sequential receive loop and
//! one writer task draining its outbound queue, so a slow receiver cannot
//! stall routing for anyone else.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Json;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use super::dispatch::SignalDispatcher;
use super::registry::SessionRegistry;
use crate::config::RouterConfig;
use crate::error::{AppError, Result};
use crate::signaling::{InboundEnvelope, OutboundEnvelope};

/// Outbound envelopes queued per client before sends start failing
const OUTBOUND_QUEUE: usize = 64;

struct RouterState {
    dispatcher: SignalDispatcher,
    started_at: Instant,
}

/// Run the signaling router until the process is stopped.
///
/// A bind failure is fatal and propagates to process exit.
pub async fn run(config: &RouterConfig) -> Result<()> {
    let registry = Arc::new(SessionRegistry::new());
    let state = Arc::new(RouterState {
        dispatcher: SignalDispatcher::new(registry),
        started_at: Instant::now(),
    });

    let app = build_router(state);

    let listener = TcpListener::bind(&config.bind_addr).await.map_err(|e| {
        AppError::Config(format!("failed to bind {}: {}", config.bind_addr, e))
    })?;
    info!("Signaling router listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<RouterState>) -> axum::Router {
    axum::Router::new()
        .route("/", get(|| async { "Signaling router.\n" }))
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<RouterState>>) -> Json<serde_json::Value> {
    let registry = state.dispatcher.registry();
    Json(json!({
        "status": "healthy",
        "connectedClients": registry.count().await,
        "waitingClients": registry.waiting_count().await,
        "uptime": state.started_at.elapsed().as_secs(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<RouterState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

/// Validate the connect query parameters
fn connect_params(
    params: &HashMap<String, String>,
) -> std::result::Result<(String, String), &'static str> {
    let client_id = params
        .get("clientId")
        .filter(|v| !v.is_empty())
        .ok_or("Client ID is required")?;
    let user_name = params
        .get("userName")
        .filter(|v| !v.is_empty())
        .ok_or("User name is required")?;
    Ok((client_id.clone(), user_name.clone()))
}

async fn handle_socket(
    mut socket: WebSocket,
    state: Arc<RouterState>,
    params: HashMap<String, String>,
) {
    let (client_id, user_name) = match connect_params(&params) {
        Ok(pair) => pair,
        Err(reason) => {
            error!("Rejecting WebSocket connection: {}", reason);
            close_with_reason(&mut socket, reason).await;
            return;
        }
    };

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundEnvelope>(OUTBOUND_QUEUE);
    if let Err(e) = state
        .dispatcher
        .register_session(&client_id, &user_name, outbound_tx)
        .await
    {
        error!("Rejecting WebSocket connection: {}", e);
        close_with_reason(&mut socket, "Client ID already exists").await;
        return;
    }

    let (mut sender, mut receiver) = socket.split();

    let writer_id = client_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&envelope) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to encode envelope for {}: {}", writer_id, e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                debug!("Writer for {} exiting, socket closed", writer_id);
                break;
            }
        }
    });

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let envelope: InboundEnvelope = match serde_json::from_str(&text) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        error!("Failed to deserialize message from {}: {}", client_id, e);
                        continue;
                    }
                };
                state.dispatcher.handle(&client_id, envelope).await;
            }
            Ok(Message::Close(_)) => {
                info!("Client {} requested close", client_id);
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) => {}
            Err(e) => {
                warn!("WebSocket receive error from {}: {}", client_id, e);
                break;
            }
        }
    }

    state.dispatcher.remove_session(&client_id).await;
    writer.abort();
}

async fn close_with_reason(socket: &mut WebSocket, reason: &'static str) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}
