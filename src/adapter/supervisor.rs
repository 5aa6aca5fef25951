//! Bridge supervisor
//!
//! Owns the map of client identity -> media bridge. Admission notices
//! construct a bridge (at most one per identity), answers are forwarded to
//! the matching bridge exactly once, and a terminated bridge releases its
//! slot only after the bridge task has disposed its own resources.
//!
//! All methods are called from the single adapter loop, which gives the
//! map single-writer semantics without a lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bridge::MediaBridge;
use super::transport::{MediaTransport, TransportFactory};
use crate::media::decoder::DecoderRegistry;
use crate::media::sink::SinkFactory;
use crate::signaling::{
    ClientAwaitingNotice, InboundEnvelope, SdpAnswerPayload, SdpOfferPayload, SignalKind,
    ADAPTER_CLIENT_ID,
};

struct BridgeHandle {
    user_name: String,
    transport: Arc<dyn MediaTransport>,
    /// Set once the engine accepts the remote answer; later answers for the
    /// same identity are discarded
    remote_applied: bool,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct BridgeSupervisor {
    transports: Arc<dyn TransportFactory>,
    decoders: Arc<DecoderRegistry>,
    sinks: Arc<dyn SinkFactory>,
    /// Envelopes headed for the signaling router
    outbound: mpsc::Sender<InboundEnvelope>,
    /// Handed to every bridge task to announce its exit
    exit_tx: mpsc::UnboundedSender<String>,
    bridges: HashMap<String, BridgeHandle>,
}

impl BridgeSupervisor {
    pub fn new(
        transports: Arc<dyn TransportFactory>,
        decoders: Arc<DecoderRegistry>,
        sinks: Arc<dyn SinkFactory>,
        outbound: mpsc::Sender<InboundEnvelope>,
        exit_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            transports,
            decoders,
            sinks,
            outbound,
            exit_tx,
            bridges: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.bridges.contains_key(client_id)
    }

    /// Admit a waiting client: open a transport, build the offer, send it
    /// through the router, and start the bridge task.
    pub async fn admit(&mut self, notice: &ClientAwaitingNotice) {
        if self.bridges.contains_key(&notice.id) {
            debug!("Bridge for {} already exists, ignoring admission", notice.id);
            return;
        }

        info!("Client {} ({}) is awaiting a bridge", notice.id, notice.user_name);

        let (transport, events) = match self.transports.open(&notice.id).await {
            Ok(pair) => pair,
            Err(e) => {
                error!("Failed to open transport for {}: {}", notice.id, e);
                return;
            }
        };

        let mut bridge = MediaBridge::new(
            notice.id.clone(),
            transport.clone(),
            self.decoders.clone(),
            self.sinks.clone(),
            self.outbound.clone(),
        );

        let sdp_offer = match bridge.negotiate().await {
            Ok(sdp) => sdp,
            Err(e) => {
                error!("Failed to build offer for {}: {}", notice.id, e);
                let _ = transport.close().await;
                return;
            }
        };

        let payload = SdpOfferPayload {
            sdp_offer,
            target_id: notice.id.clone(),
        };
        let envelope = match serde_json::to_string(&payload) {
            Ok(data) => InboundEnvelope::new(SignalKind::SdpOffer, data, ADAPTER_CLIENT_ID),
            Err(e) => {
                error!("Failed to encode offer for {}: {}", notice.id, e);
                let _ = transport.close().await;
                return;
            }
        };
        // try_send: the adapter loop draining this queue is the same task
        // that called admit, so a blocking send here could never complete
        if self.outbound.try_send(envelope).is_err() {
            error!("Signaling queue unavailable, dropping bridge for {}", notice.id);
            let _ = transport.close().await;
            return;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(bridge.run(events, cancel.clone(), self.exit_tx.clone()));

        self.bridges.insert(
            notice.id.clone(),
            BridgeHandle {
                user_name: notice.user_name.clone(),
                transport,
                remote_applied: false,
                cancel,
                task,
            },
        );
        info!("Bridge created for {}", notice.id);
    }

    /// Apply a remote answer to the matching bridge.
    ///
    /// A late or spurious answer (no bridge) and a duplicate answer (flag
    /// already set) are both idempotent no-ops.
    pub async fn apply_answer(&mut self, payload: &SdpAnswerPayload) {
        let Some(handle) = self.bridges.get_mut(&payload.source_id) else {
            warn!(
                "SDP answer from {} has no matching bridge, discarding",
                payload.source_id
            );
            return;
        };

        if handle.remote_applied {
            debug!("Duplicate SDP answer from {}, discarding", payload.source_id);
            return;
        }

        match handle.transport.apply_answer(&payload.sdp_answer).await {
            Ok(()) => {
                handle.remote_applied = true;
                info!(
                    "Remote description applied for {} ({})",
                    payload.source_id, handle.user_name
                );
            }
            Err(e) => error!(
                "Failed to apply remote description for {}: {}",
                payload.source_id, e
            ),
        }
    }

    /// Release the slot of a finished bridge. The bridge task has already
    /// disposed its decoder and sink by the time it announces its exit.
    pub async fn release(&mut self, client_id: &str) {
        if let Some(handle) = self.bridges.remove(client_id) {
            let _ = handle.task.await;
            info!("Bridge for {} removed, slot released", client_id);
        }
    }

    /// Tear all bridges down (signaling loss or shutdown)
    pub async fn evict_all(&mut self) {
        if self.bridges.is_empty() {
            return;
        }
        info!("Evicting {} bridge(s)", self.bridges.len());
        for (_, handle) in self.bridges.drain() {
            handle.cancel.cancel();
            let _ = handle.task.await;
        }
    }
}
