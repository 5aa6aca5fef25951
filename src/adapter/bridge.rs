//! Per-client media bridge
//!
//! One bridge per admitted client. The bridge owns a negotiated transport,
//! a decoder and an output sink, and is driven by the transport's event
//! stream from a single task:
//!
//! `Created -> OfferSent -> AwaitingAnswer -> Negotiating -> Streaming -> Closed`
//!
//! Media failures (unsupported codec, decode error, malformed frame) are
//! per-frame and never close the bridge; each distinct failure type is
//! logged once per connection. The decoder and sink are released on every
//! exit path before the supervisor is told the slot is free.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::transport::{MediaTransport, NegotiatedFormat, TransportEvent, TransportState};
use crate::error::Result;
use crate::media::convert::convert_frame;
use crate::media::decoder::{Decoder, DecoderRegistry};
use crate::media::sink::{FrameSink, SinkFactory};
use crate::signaling::{InboundEnvelope, SignalKind, ADAPTER_CLIENT_ID};

/// Bridge lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Created,
    OfferSent,
    AwaitingAnswer,
    Negotiating,
    Streaming,
    Closed,
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeState::Created => write!(f, "created"),
            BridgeState::OfferSent => write!(f, "offer-sent"),
            BridgeState::AwaitingAnswer => write!(f, "awaiting-answer"),
            BridgeState::Negotiating => write!(f, "negotiating"),
            BridgeState::Streaming => write!(f, "streaming"),
            BridgeState::Closed => write!(f, "closed"),
        }
    }
}

pub struct MediaBridge {
    client_id: String,
    state: BridgeState,
    transport: Arc<dyn MediaTransport>,
    decoders: Arc<DecoderRegistry>,
    sinks: Arc<dyn SinkFactory>,
    /// Envelopes headed for the signaling router
    outbound: mpsc::Sender<InboundEnvelope>,
    decoder: Option<Box<dyn Decoder>>,
    sink: Option<Box<dyn FrameSink>>,
    /// Failure types already logged for this connection
    logged_failures: HashSet<String>,
}

impl MediaBridge {
    pub fn new(
        client_id: impl Into<String>,
        transport: Arc<dyn MediaTransport>,
        decoders: Arc<DecoderRegistry>,
        sinks: Arc<dyn SinkFactory>,
        outbound: mpsc::Sender<InboundEnvelope>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            state: BridgeState::Created,
            transport,
            decoders,
            sinks,
            outbound,
            decoder: None,
            sink: None,
            logged_failures: HashSet::new(),
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Build the local offer. Transitions `Created -> OfferSent` once the
    /// engine confirms a local description of type offer.
    pub async fn negotiate(&mut self) -> Result<String> {
        let sdp = self.transport.create_offer().await?;
        self.state = BridgeState::OfferSent;
        info!("Bridge {} offer created", self.client_id);
        Ok(sdp)
    }

    /// Drive the bridge until its transport terminates, the event stream
    /// ends, or the supervisor cancels it. Resources are released before
    /// the exit notification is sent.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<TransportEvent>,
        cancel: CancellationToken,
        exit_tx: mpsc::UnboundedSender<String>,
    ) {
        if self.state == BridgeState::OfferSent {
            self.state = BridgeState::AwaitingAnswer;
            debug!("Bridge {} awaiting answer", self.client_id);
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Bridge {} evicted", self.client_id);
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        if !self.handle_event(event).await {
                            break;
                        }
                    }
                    None => {
                        debug!("Bridge {} event stream ended", self.client_id);
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        let _ = exit_tx.send(self.client_id.clone());
    }

    /// Returns false once the bridge must stop
    async fn handle_event(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::FormatsNegotiated(formats) => {
                self.on_formats_negotiated(formats).await;
                true
            }
            TransportEvent::FrameReceived {
                timestamp,
                payload,
                format,
            } => {
                self.on_frame(timestamp, &payload, &format);
                true
            }
            TransportEvent::AudioFrameReceived { timestamp, len } => {
                trace!(
                    "Bridge {} audio frame: {} bytes at {}",
                    self.client_id,
                    len,
                    timestamp
                );
                true
            }
            TransportEvent::StateChanged(state) => self.on_state_changed(state).await,
        }
    }

    async fn on_state_changed(&mut self, state: TransportState) -> bool {
        info!("Bridge {} transport state: {}", self.client_id, state);
        if state == TransportState::Connected {
            let envelope = InboundEnvelope::new(
                SignalKind::ClientReady,
                self.client_id.clone(),
                ADAPTER_CLIENT_ID,
            );
            if self.outbound.send(envelope).await.is_err() {
                warn!("Bridge {} could not announce ClientReady", self.client_id);
            }
        }
        !state.is_terminal()
    }

    async fn on_formats_negotiated(&mut self, formats: Vec<NegotiatedFormat>) {
        if formats.is_empty() {
            warn!("Bridge {} negotiated no video formats", self.client_id);
            return;
        }

        // First entry carries the sender's declared preference order
        let chosen = formats[0].clone();
        info!(
            "Bridge {} video formats negotiated: [{}], using {}",
            self.client_id,
            formats
                .iter()
                .map(|f| f.codec.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            chosen.codec
        );

        match self.decoder.as_mut() {
            Some(decoder) if decoder.codec() == chosen.codec => {
                if let Err(e) = decoder.reset() {
                    self.warn_once("decoder-reset", format!("decoder reset failed: {}", e));
                    self.decoder = None;
                }
            }
            _ => match self.decoders.create(chosen.codec) {
                Ok(decoder) => self.decoder = Some(decoder),
                Err(e) => {
                    self.decoder = None;
                    self.warn_once("decoder-create", e.to_string());
                }
            },
        }

        if self.sink.is_none() {
            match self.sinks.open(&self.client_id).await {
                Ok(sink) => self.sink = Some(sink),
                Err(e) => self.warn_once("sink-open", e.to_string()),
            }
        }

        self.state = BridgeState::Negotiating;
        debug!("Bridge {} negotiating with {}", self.client_id, chosen.codec);
    }

    fn on_frame(&mut self, timestamp: u32, payload: &[u8], format: &NegotiatedFormat) {
        if !matches!(self.state, BridgeState::Negotiating | BridgeState::Streaming) {
            trace!(
                "Bridge {} ignoring frame in state {}",
                self.client_id,
                self.state
            );
            return;
        }

        let Some(decoder) = self.decoder.as_mut() else {
            let message = format!("no decoder for {}, dropping frames", format.codec);
            self.warn_once("no-decoder", message);
            return;
        };

        let frames = match decoder.decode(payload, timestamp) {
            Ok(frames) => frames,
            Err(e) => {
                self.warn_once("decode", e.to_string());
                return;
            }
        };

        for frame in frames {
            let Some(sink) = self.sink.as_mut() else {
                self.warn_once("no-sink", "no output sink, dropping frames".to_string());
                return;
            };

            let converted = match convert_frame(&frame, sink.expected_format()) {
                Ok(converted) => converted,
                Err(e) => {
                    self.warn_once("convert", e.to_string());
                    continue;
                }
            };

            if let Err(e) = sink.send(&converted) {
                self.warn_once("sink-send", e.to_string());
                continue;
            }

            if self.state == BridgeState::Negotiating {
                self.state = BridgeState::Streaming;
                info!(
                    "Bridge {} streaming ({}x{})",
                    self.client_id, converted.width, converted.height
                );
            }
        }
    }

    async fn shutdown(&mut self) {
        self.decoder = None;
        if let Some(mut sink) = self.sink.take() {
            sink.close();
        }
        if let Err(e) = self.transport.close().await {
            debug!("Bridge {} transport close: {}", self.client_id, e);
        }
        self.state = BridgeState::Closed;
        info!("Bridge {} closed", self.client_id);
    }

    fn warn_once(&mut self, key: &str, message: String) {
        if self.logged_failures.insert(key.to_string()) {
            warn!("Bridge {}: {}", self.client_id, message);
        }
    }
}
