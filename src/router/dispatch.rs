//! Signaling message routing
//!
//! One [`SignalDispatcher`] instance per router process. Envelopes are
//! classified at the connection boundary and routed by kind; every
//! violation (wrong role, unknown target, malformed payload) is recovered
//! locally by logging and dropping the single offending message. Relay is
//! fire-and-forget: there is no ack or retry, and a failure delivering to
//! one recipient never blocks delivery to the others.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::registry::SessionRegistry;
use crate::error::Result;
use crate::signaling::{
    ClientAddedNotice, ClientAwaitingNotice, ClientMessage, InboundEnvelope, OutboundEnvelope,
    SdpAnswerPayload, SdpOfferPayload, SignalKind, ADAPTER_CLIENT_ID,
};

pub struct SignalDispatcher {
    registry: Arc<SessionRegistry>,
}

impl SignalDispatcher {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Register a connecting client and announce it.
    ///
    /// On success every other non-adapter session receives a `ClientAdded`
    /// notice carrying the registry size. When the adapter itself connects,
    /// the full waiting list is flushed to it in arrival order.
    pub async fn register_session(
        &self,
        id: &str,
        user_name: &str,
        outbound: mpsc::Sender<OutboundEnvelope>,
    ) -> Result<()> {
        let count = self.registry.register(id, user_name, outbound).await?;
        info!("Client {} connected ({} total)", id, count);

        let notice = ClientAddedNotice {
            id: id.to_string(),
            user_name: user_name.to_string(),
            count,
        };
        match OutboundEnvelope::with_payload(SignalKind::ClientAdded, &notice) {
            Ok(envelope) => self.broadcast_to_clients(Some(id), envelope).await,
            Err(e) => error!("Failed to encode ClientAdded notice: {}", e),
        }

        if id == ADAPTER_CLIENT_ID {
            self.flush_waiting_to_adapter().await;
        }

        Ok(())
    }

    /// Remove a disconnected client. Idempotent.
    pub async fn remove_session(&self, id: &str) {
        self.registry.unregister(id).await;
        info!("Client {} disconnected", id);
    }

    /// Route one envelope from a connected client.
    ///
    /// `sender_id` is the identity the connection registered with; the
    /// envelope's own `clientId` field is advisory and never trusted.
    pub async fn handle(&self, sender_id: &str, envelope: InboundEnvelope) {
        if envelope.client_id != sender_id {
            warn!(
                "Envelope clientId '{}' does not match connection identity '{}', using the latter",
                envelope.client_id, sender_id
            );
        }

        let message = match ClientMessage::classify(&envelope) {
            Ok(message) => message,
            Err(e) => {
                error!("Dropping message from {}: {}", sender_id, e);
                return;
            }
        };

        match message {
            ClientMessage::Log(text) => info!("Log from '{}': {}", sender_id, text),
            ClientMessage::WaitingRoom => self.on_waiting_room(sender_id).await,
            ClientMessage::SdpOffer(payload) => self.on_sdp_offer(sender_id, payload).await,
            ClientMessage::SdpAnswer(sdp) => self.on_sdp_answer(sender_id, sdp).await,
            ClientMessage::ClientReady(client_id) => {
                self.on_client_ready(sender_id, client_id).await
            }
        }
    }

    async fn on_waiting_room(&self, sender_id: &str) {
        if sender_id == ADAPTER_CLIENT_ID {
            error!("Adapter cannot enter the waiting room");
            return;
        }

        let Some(handle) = self.registry.lookup(sender_id).await else {
            error!("WaitingRoom from unregistered client {}", sender_id);
            return;
        };

        if !self
            .registry
            .enqueue_waiting(sender_id, &handle.user_name)
            .await
        {
            debug!("Client {} is already waiting", sender_id);
            return;
        }
        info!("Client {} entered the waiting room", sender_id);

        let notice = ClientAwaitingNotice {
            id: sender_id.to_string(),
            user_name: handle.user_name,
        };
        if self.registry.contains(ADAPTER_CLIENT_ID).await {
            self.send_awaiting_notice(&notice).await;
        } else {
            debug!(
                "Adapter not connected, retaining waiting entry for {}",
                sender_id
            );
        }
    }

    async fn on_sdp_offer(&self, sender_id: &str, payload: SdpOfferPayload) {
        if sender_id != ADAPTER_CLIENT_ID {
            error!("Only the RTC adapter can send SDP offers (got one from {})", sender_id);
            return;
        }

        let target = payload.target_id;
        if !self.registry.contains(&target).await {
            error!("SDP offer targets unknown client {}", target);
            return;
        }

        info!("Relaying SDP offer to {}", target);
        self.unicast(
            &target,
            OutboundEnvelope::new(SignalKind::SdpOffer, payload.sdp_offer),
        )
        .await;

        // The offer is the adapter's acknowledgement that a bridge claimed
        // this client; its waiting entry is spent.
        self.registry.dequeue_waiting(&target).await;
    }

    async fn on_sdp_answer(&self, sender_id: &str, sdp: String) {
        if sender_id == ADAPTER_CLIENT_ID {
            error!("Received SDP answer from the RTC adapter");
            return;
        }

        info!("Relaying SDP answer from {}", sender_id);
        let payload = SdpAnswerPayload {
            sdp_answer: sdp,
            source_id: sender_id.to_string(),
        };
        match OutboundEnvelope::with_payload(SignalKind::SdpAnswer, &payload) {
            Ok(envelope) => self.unicast(ADAPTER_CLIENT_ID, envelope).await,
            Err(e) => error!("Failed to encode SdpAnswer payload: {}", e),
        }
    }

    async fn on_client_ready(&self, sender_id: &str, client_id: String) {
        if sender_id != ADAPTER_CLIENT_ID {
            error!("Only the RTC adapter can send ClientReady (got one from {})", sender_id);
            return;
        }

        info!("Bridge for {} is live", client_id);
        self.broadcast_to_clients(None, OutboundEnvelope::new(SignalKind::ClientReady, client_id))
            .await;
    }

    async fn flush_waiting_to_adapter(&self) {
        let entries = self.registry.waiting_entries().await;
        if entries.is_empty() {
            return;
        }
        info!("Flushing {} waiting client(s) to adapter", entries.len());
        for entry in entries {
            self.send_awaiting_notice(&ClientAwaitingNotice {
                id: entry.id,
                user_name: entry.user_name,
            })
            .await;
        }
    }

    async fn send_awaiting_notice(&self, notice: &ClientAwaitingNotice) {
        match OutboundEnvelope::with_payload(SignalKind::ClientAwaiting, notice) {
            Ok(envelope) => self.unicast(ADAPTER_CLIENT_ID, envelope).await,
            Err(e) => error!("Failed to encode ClientAwaiting notice: {}", e),
        }
    }

    /// Deliver to one registered client; misses and closed transports are
    /// logged and swallowed.
    async fn unicast(&self, target: &str, envelope: OutboundEnvelope) {
        let Some(handle) = self.registry.lookup(target).await else {
            error!("Client {} not found", target);
            return;
        };
        if let Err(e) = handle.send(envelope) {
            error!("Failed to send message to client {}: {}", target, e);
        }
    }

    /// Deliver to every non-adapter session except `exclude`; per-recipient
    /// failures are isolated.
    async fn broadcast_to_clients(&self, exclude: Option<&str>, envelope: OutboundEnvelope) {
        for (id, handle) in self.registry.sessions_snapshot().await {
            if id == ADAPTER_CLIENT_ID || Some(id.as_str()) == exclude {
                continue;
            }
            if let Err(e) = handle.send(envelope.clone()) {
                error!("Failed to send message to client {}: {}", id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::Receiver;

    struct Harness {
        dispatcher: SignalDispatcher,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                dispatcher: SignalDispatcher::new(Arc::new(SessionRegistry::new())),
            }
        }

        async fn connect(&self, id: &str, user_name: &str) -> Receiver<OutboundEnvelope> {
            let (tx, rx) = mpsc::channel(16);
            self.dispatcher
                .register_session(id, user_name, tx)
                .await
                .unwrap();
            rx
        }

        async fn send(&self, sender: &str, kind: SignalKind, data: &str) {
            self.dispatcher
                .handle(sender, InboundEnvelope::new(kind, data, sender))
                .await;
        }
    }

    fn drain(rx: &mut Receiver<OutboundEnvelope>) -> Vec<OutboundEnvelope> {
        let mut out = vec![];
        while let Ok(envelope) = rx.try_recv() {
            out.push(envelope);
        }
        out
    }

    #[tokio::test]
    async fn test_waiting_client_flushed_when_adapter_connects() {
        let harness = Harness::new();
        let mut alice = harness.connect("alice", "Alice").await;

        // Adapter not connected yet: entry is retained, nothing delivered
        harness.send("alice", SignalKind::WaitingRoom, "").await;
        assert!(drain(&mut alice).is_empty());

        let mut adapter = harness.connect(ADAPTER_CLIENT_ID, "Adapter").await;
        let received = drain(&mut adapter);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].kind, "ClientAwaiting");

        let notice: ClientAwaitingNotice = serde_json::from_str(&received[0].data).unwrap();
        assert_eq!(notice.id, "alice");
        assert_eq!(notice.user_name, "Alice");

        // Alice saw the adapter join (ClientAdded), but no waiting traffic
        let alice_received = drain(&mut alice);
        assert_eq!(alice_received.len(), 1);
        assert_eq!(alice_received[0].kind, "ClientAdded");
    }

    #[tokio::test]
    async fn test_client_added_broadcast_excludes_sender_and_adapter() {
        let harness = Harness::new();
        let mut adapter = harness.connect(ADAPTER_CLIENT_ID, "Adapter").await;
        let mut alice = harness.connect("alice", "Alice").await;
        drain(&mut alice);

        let mut bob = harness.connect("bob", "Bob").await;

        let alice_received = drain(&mut alice);
        assert_eq!(alice_received.len(), 1);
        let notice: ClientAddedNotice = serde_json::from_str(&alice_received[0].data).unwrap();
        assert_eq!(notice.id, "bob");
        assert_eq!(notice.user_name, "Bob");
        assert_eq!(notice.count, 3);

        assert!(drain(&mut adapter).is_empty());
        assert!(drain(&mut bob).is_empty());
    }

    #[tokio::test]
    async fn test_offer_relayed_verbatim_to_target_only() {
        let harness = Harness::new();
        let mut adapter = harness.connect(ADAPTER_CLIENT_ID, "Adapter").await;
        let mut alice = harness.connect("alice", "Alice").await;
        let mut bob = harness.connect("bob", "Bob").await;
        drain(&mut adapter);
        drain(&mut alice);
        drain(&mut bob);

        let payload = serde_json::to_string(&SdpOfferPayload {
            sdp_offer: "v=0...".into(),
            target_id: "alice".into(),
        })
        .unwrap();
        harness
            .send(ADAPTER_CLIENT_ID, SignalKind::SdpOffer, &payload)
            .await;

        let alice_received = drain(&mut alice);
        assert_eq!(alice_received.len(), 1);
        assert_eq!(alice_received[0].kind, "SdpOffer");
        assert_eq!(alice_received[0].data, "v=0...");

        assert!(drain(&mut bob).is_empty());
        assert!(drain(&mut adapter).is_empty());
    }

    #[tokio::test]
    async fn test_answer_wrapped_with_source_identity() {
        let harness = Harness::new();
        let mut adapter = harness.connect(ADAPTER_CLIENT_ID, "Adapter").await;
        let _alice = harness.connect("alice", "Alice").await;
        drain(&mut adapter);

        harness
            .send("alice", SignalKind::SdpAnswer, "v=0...answer")
            .await;

        let received = drain(&mut adapter);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].kind, "SdpAnswer");
        let payload: SdpAnswerPayload = serde_json::from_str(&received[0].data).unwrap();
        assert_eq!(payload.sdp_answer, "v=0...answer");
        assert_eq!(payload.source_id, "alice");
    }

    #[tokio::test]
    async fn test_offer_from_non_adapter_rejected() {
        let harness = Harness::new();
        let mut adapter = harness.connect(ADAPTER_CLIENT_ID, "Adapter").await;
        let mut alice = harness.connect("alice", "Alice").await;
        let mut bob = harness.connect("bob", "Bob").await;
        drain(&mut adapter);
        drain(&mut alice);
        drain(&mut bob);

        let payload = serde_json::to_string(&SdpOfferPayload {
            sdp_offer: "v=0...".into(),
            target_id: "bob".into(),
        })
        .unwrap();
        harness.send("alice", SignalKind::SdpOffer, &payload).await;

        assert!(drain(&mut adapter).is_empty());
        assert!(drain(&mut alice).is_empty());
        assert!(drain(&mut bob).is_empty());
    }

    #[tokio::test]
    async fn test_answer_from_adapter_rejected() {
        let harness = Harness::new();
        let mut adapter = harness.connect(ADAPTER_CLIENT_ID, "Adapter").await;
        let mut alice = harness.connect("alice", "Alice").await;
        drain(&mut adapter);
        drain(&mut alice);

        harness
            .send(ADAPTER_CLIENT_ID, SignalKind::SdpAnswer, "v=0...")
            .await;

        assert!(drain(&mut adapter).is_empty());
        assert!(drain(&mut alice).is_empty());
    }

    #[tokio::test]
    async fn test_rewaiting_sends_no_duplicate_notice() {
        let harness = Harness::new();
        let mut adapter = harness.connect(ADAPTER_CLIENT_ID, "Adapter").await;
        let _alice = harness.connect("alice", "Alice").await;
        drain(&mut adapter);

        harness.send("alice", SignalKind::WaitingRoom, "").await;
        harness.send("alice", SignalKind::WaitingRoom, "").await;

        assert_eq!(drain(&mut adapter).len(), 1);
    }

    #[tokio::test]
    async fn test_offer_relay_spends_waiting_entry() {
        let harness = Harness::new();
        let mut adapter = harness.connect(ADAPTER_CLIENT_ID, "Adapter").await;
        let mut alice = harness.connect("alice", "Alice").await;
        drain(&mut adapter);

        harness.send("alice", SignalKind::WaitingRoom, "").await;
        assert_eq!(harness.dispatcher.registry().waiting_count().await, 1);

        let payload = serde_json::to_string(&SdpOfferPayload {
            sdp_offer: "v=0...".into(),
            target_id: "alice".into(),
        })
        .unwrap();
        harness
            .send(ADAPTER_CLIENT_ID, SignalKind::SdpOffer, &payload)
            .await;

        assert_eq!(harness.dispatcher.registry().waiting_count().await, 0);
        assert_eq!(drain(&mut alice).len(), 1);

        // Re-waiting after the bridge claimed the slot produces a new notice
        harness.send("alice", SignalKind::WaitingRoom, "").await;
        assert_eq!(drain(&mut adapter).len(), 1);
    }

    #[tokio::test]
    async fn test_offer_to_unknown_target_dropped() {
        let harness = Harness::new();
        let mut adapter = harness.connect(ADAPTER_CLIENT_ID, "Adapter").await;
        drain(&mut adapter);

        let payload = serde_json::to_string(&SdpOfferPayload {
            sdp_offer: "v=0...".into(),
            target_id: "ghost".into(),
        })
        .unwrap();
        harness
            .send(ADAPTER_CLIENT_ID, SignalKind::SdpOffer, &payload)
            .await;

        assert!(drain(&mut adapter).is_empty());
    }

    #[tokio::test]
    async fn test_client_ready_broadcast_to_clients() {
        let harness = Harness::new();
        let mut adapter = harness.connect(ADAPTER_CLIENT_ID, "Adapter").await;
        let mut alice = harness.connect("alice", "Alice").await;
        let mut bob = harness.connect("bob", "Bob").await;
        drain(&mut adapter);
        drain(&mut alice);
        drain(&mut bob);

        harness
            .send(ADAPTER_CLIENT_ID, SignalKind::ClientReady, "alice")
            .await;

        for rx in [&mut alice, &mut bob] {
            let received = drain(rx);
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].kind, "ClientReady");
            assert_eq!(received[0].data, "alice");
        }
        assert!(drain(&mut adapter).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_kind_dropped_without_panic() {
        let harness = Harness::new();
        let _alice = harness.connect("alice", "Alice").await;
        harness
            .dispatcher
            .handle(
                "alice",
                InboundEnvelope {
                    kind: "Telemetry".into(),
                    data: String::new(),
                    client_id: "alice".into(),
                },
            )
            .await;
    }
}
