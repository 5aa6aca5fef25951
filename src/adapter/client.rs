//! Signaling client
//!
//! The adapter side of the relay: one WebSocket connection to the router
//! under the reserved `rtc-adapter` identity, one sequential receive loop
//! classifying router notices into supervisor calls, and one outbound queue
//! the supervisor and bridges push envelopes into. On connection loss every
//! bridge is evicted (its offer can no longer be answered through a new
//! registry generation) and the client reconnects with a backoff ladder.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::supervisor::BridgeSupervisor;
use super::transport::TransportFactory;
use crate::config::AdapterConfig;
use crate::error::{AppError, Result};
use crate::media::decoder::DecoderRegistry;
use crate::media::sink::SinkFactory;
use crate::signaling::{InboundEnvelope, OutboundEnvelope, RouterNotice, ADAPTER_CLIENT_ID};

/// Envelopes queued toward the router before sends backpressure
const OUTBOUND_QUEUE: usize = 64;

/// Run the signaling client until the process is stopped.
pub async fn run(
    config: &AdapterConfig,
    transports: Arc<dyn TransportFactory>,
    decoders: Arc<DecoderRegistry>,
    sinks: Arc<dyn SinkFactory>,
) -> Result<()> {
    let url = signaling_url(config);
    let mut attempts: u32 = 0;

    loop {
        info!(
            "Connecting to signaling router at {} (attempt {})",
            config.signaling_url,
            attempts + 1
        );
        match connect_and_serve(&url, transports.clone(), decoders.clone(), sinks.clone()).await {
            Ok(()) => {
                info!("Signaling connection closed");
                attempts = 0;
            }
            Err(e) => {
                error!("Signaling connection error: {}", e);
                attempts += 1;
            }
        }

        let delay = reconnect_delay(attempts);
        debug!("Reconnecting in {:?}", delay);
        tokio::time::sleep(delay).await;
    }
}

fn signaling_url(config: &AdapterConfig) -> String {
    format!(
        "{}?clientId={}&userName={}",
        config.signaling_url,
        ADAPTER_CLIENT_ID,
        urlencoding::encode(&config.user_name)
    )
}

fn reconnect_delay(attempts: u32) -> Duration {
    Duration::from_secs(match attempts {
        0 => 1,
        1 => 2,
        2 => 4,
        _ => 8,
    })
}

async fn connect_and_serve(
    url: &str,
    transports: Arc<dyn TransportFactory>,
    decoders: Arc<DecoderRegistry>,
    sinks: Arc<dyn SinkFactory>,
) -> Result<()> {
    let (ws, _) = connect_async(url)
        .await
        .map_err(|e| AppError::Signaling(format!("failed to connect: {}", e)))?;
    info!("Connected to signaling router");

    let (mut write, mut read) = ws.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<InboundEnvelope>(OUTBOUND_QUEUE);
    let (exit_tx, mut exit_rx) = mpsc::unbounded_channel::<String>();
    let mut supervisor = BridgeSupervisor::new(transports, decoders, sinks, outbound_tx, exit_tx);

    let result = loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let envelope: OutboundEnvelope = match serde_json::from_str(&text) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            error!("Failed to deserialize message: {}", e);
                            continue;
                        }
                    };
                    handle_notice(&mut supervisor, &envelope).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    match frame {
                        Some(frame) if !frame.reason.is_empty() => {
                            info!("Router closed the connection: {}", frame.reason)
                        }
                        _ => info!("Router closed the connection"),
                    }
                    break Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(AppError::Signaling(format!("receive error: {}", e))),
                None => break Ok(()),
            },
            Some(envelope) = outbound_rx.recv() => {
                let json = match serde_json::to_string(&envelope) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to encode envelope: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(json)).await {
                    break Err(AppError::Signaling(format!("send error: {}", e)));
                }
            }
            Some(client_id) = exit_rx.recv() => supervisor.release(&client_id).await,
        }
    };

    supervisor.evict_all().await;
    result
}

async fn handle_notice(supervisor: &mut BridgeSupervisor, envelope: &OutboundEnvelope) {
    match RouterNotice::classify(envelope) {
        Ok(RouterNotice::ClientAwaiting(notice)) => supervisor.admit(&notice).await,
        Ok(RouterNotice::SdpAnswer(payload)) => supervisor.apply_answer(&payload).await,
        Ok(RouterNotice::ClientAdded(notice)) => info!(
            "Client {} ({}) joined, {} connected",
            notice.id, notice.user_name, notice.count
        ),
        Err(e) => warn!("Ignoring message: {}", e),
    }
}
