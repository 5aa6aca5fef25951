//! Signaling wire types
//!
//! Both legs of the relay (browser <-> router and adapter <-> router) speak
//! the same envelope shape over a text WebSocket. The `data` field is always
//! a string; structured payloads are JSON-encoded into it by the sender and
//! re-parsed by the handler for that kind.
//!
//! Envelopes are decoded exactly once at the connection boundary into a
//! closed variant set ([`ClientMessage`] on the router side,
//! [`RouterNotice`] on the adapter side); an unknown `type` string is a
//! classification error the caller logs and drops, never a panic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Reserved identity of the bridge-hosting adapter process
pub const ADAPTER_CLIENT_ID: &str = "rtc-adapter";

/// The closed set of recognized message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Log,
    WaitingRoom,
    SdpOffer,
    SdpAnswer,
    ClientAdded,
    ClientAwaiting,
    ClientReady,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Log => "Log",
            SignalKind::WaitingRoom => "WaitingRoom",
            SignalKind::SdpOffer => "SdpOffer",
            SignalKind::SdpAnswer => "SdpAnswer",
            SignalKind::ClientAdded => "ClientAdded",
            SignalKind::ClientAwaiting => "ClientAwaiting",
            SignalKind::ClientReady => "ClientReady",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Log" => Some(SignalKind::Log),
            "WaitingRoom" => Some(SignalKind::WaitingRoom),
            "SdpOffer" => Some(SignalKind::SdpOffer),
            "SdpAnswer" => Some(SignalKind::SdpAnswer),
            "ClientAdded" => Some(SignalKind::ClientAdded),
            "ClientAwaiting" => Some(SignalKind::ClientAwaiting),
            "ClientReady" => Some(SignalKind::ClientReady),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope sent by a client (browser or adapter) to the router
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: String,
    #[serde(rename = "clientId")]
    pub client_id: String,
}

impl InboundEnvelope {
    pub fn new(kind: SignalKind, data: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            data: data.into(),
            client_id: client_id.into(),
        }
    }
}

/// Envelope sent by the router to a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: String,
    pub timestamp: DateTime<Utc>,
}

impl OutboundEnvelope {
    pub fn new(kind: SignalKind, data: impl Into<String>) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            data: data.into(),
            timestamp: Utc::now(),
        }
    }

    /// Envelope carrying a JSON-encoded structured payload
    pub fn with_payload<T: Serialize>(kind: SignalKind, payload: &T) -> Result<Self> {
        Ok(Self::new(kind, serde_json::to_string(payload)?))
    }
}

/// `ClientAdded` notice payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientAddedNotice {
    pub id: String,
    #[serde(rename = "userName")]
    pub user_name: String,
    pub count: usize,
}

/// `ClientAwaiting` notice payload (structured variant)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientAwaitingNotice {
    pub id: String,
    #[serde(rename = "userName")]
    pub user_name: String,
}

/// `SdpOffer` payload, adapter -> router
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SdpOfferPayload {
    #[serde(rename = "sdpOffer")]
    pub sdp_offer: String,
    #[serde(rename = "targetId")]
    pub target_id: String,
}

/// `SdpAnswer` payload, router -> adapter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SdpAnswerPayload {
    #[serde(rename = "sdpAnswer")]
    pub sdp_answer: String,
    #[serde(rename = "sourceId")]
    pub source_id: String,
}

/// A client envelope classified at the router boundary
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Log(String),
    WaitingRoom,
    SdpOffer(SdpOfferPayload),
    SdpAnswer(String),
    ClientReady(String),
}

impl ClientMessage {
    pub fn classify(envelope: &InboundEnvelope) -> Result<Self> {
        let kind = SignalKind::parse(&envelope.kind)
            .ok_or_else(|| AppError::Signaling(format!("unknown message type: {}", envelope.kind)))?;

        match kind {
            SignalKind::Log => Ok(ClientMessage::Log(envelope.data.clone())),
            SignalKind::WaitingRoom => Ok(ClientMessage::WaitingRoom),
            SignalKind::SdpOffer => {
                let payload: SdpOfferPayload = serde_json::from_str(&envelope.data)
                    .map_err(|e| AppError::Signaling(format!("malformed SdpOffer payload: {}", e)))?;
                Ok(ClientMessage::SdpOffer(payload))
            }
            SignalKind::SdpAnswer => Ok(ClientMessage::SdpAnswer(envelope.data.clone())),
            SignalKind::ClientReady => Ok(ClientMessage::ClientReady(envelope.data.clone())),
            other => Err(AppError::Signaling(format!(
                "message type {} is not valid from a client",
                other
            ))),
        }
    }
}

/// A router envelope classified at the adapter boundary
#[derive(Debug, Clone)]
pub enum RouterNotice {
    ClientAdded(ClientAddedNotice),
    ClientAwaiting(ClientAwaitingNotice),
    SdpAnswer(SdpAnswerPayload),
}

impl RouterNotice {
    pub fn classify(envelope: &OutboundEnvelope) -> Result<Self> {
        let kind = SignalKind::parse(&envelope.kind)
            .ok_or_else(|| AppError::Signaling(format!("unknown message type: {}", envelope.kind)))?;

        match kind {
            SignalKind::ClientAdded => {
                let payload: ClientAddedNotice = serde_json::from_str(&envelope.data)
                    .map_err(|e| {
                        AppError::Signaling(format!("malformed ClientAdded payload: {}", e))
                    })?;
                Ok(RouterNotice::ClientAdded(payload))
            }
            SignalKind::ClientAwaiting => {
                let payload: ClientAwaitingNotice = serde_json::from_str(&envelope.data)
                    .map_err(|e| {
                        AppError::Signaling(format!("malformed ClientAwaiting payload: {}", e))
                    })?;
                Ok(RouterNotice::ClientAwaiting(payload))
            }
            SignalKind::SdpAnswer => {
                let payload: SdpAnswerPayload = serde_json::from_str(&envelope.data)
                    .map_err(|e| {
                        AppError::Signaling(format!("malformed SdpAnswer payload: {}", e))
                    })?;
                Ok(RouterNotice::SdpAnswer(payload))
            }
            other => Err(AppError::Signaling(format!(
                "message type {} is not expected by the adapter",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_envelope_wire_shape() {
        let envelope = InboundEnvelope::new(SignalKind::Log, "hello", "alice");
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"type\":\"Log\""));
        assert!(json.contains("\"clientId\":\"alice\""));

        let parsed: InboundEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind, "Log");
        assert_eq!(parsed.data, "hello");
        assert_eq!(parsed.client_id, "alice");
    }

    #[test]
    fn test_outbound_envelope_timestamp_is_rfc3339() {
        let envelope = OutboundEnvelope::new(SignalKind::ClientReady, "alice");
        let json = serde_json::to_string(&envelope).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let timestamp = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[test]
    fn test_payload_field_names() {
        let offer = SdpOfferPayload {
            sdp_offer: "v=0".into(),
            target_id: "alice".into(),
        };
        let json = serde_json::to_string(&offer).unwrap();
        assert!(json.contains("\"sdpOffer\""));
        assert!(json.contains("\"targetId\""));

        let answer = SdpAnswerPayload {
            sdp_answer: "v=0".into(),
            source_id: "alice".into(),
        };
        let json = serde_json::to_string(&answer).unwrap();
        assert!(json.contains("\"sdpAnswer\""));
        assert!(json.contains("\"sourceId\""));

        let added = ClientAddedNotice {
            id: "alice".into(),
            user_name: "Alice".into(),
            count: 1,
        };
        let json = serde_json::to_string(&added).unwrap();
        assert!(json.contains("\"userName\":\"Alice\""));
    }

    #[test]
    fn test_classify_client_message() {
        let envelope = InboundEnvelope::new(
            SignalKind::SdpOffer,
            r#"{"sdpOffer":"v=0...","targetId":"alice"}"#,
            ADAPTER_CLIENT_ID,
        );
        match ClientMessage::classify(&envelope).unwrap() {
            ClientMessage::SdpOffer(payload) => {
                assert_eq!(payload.sdp_offer, "v=0...");
                assert_eq!(payload.target_id, "alice");
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_classify_unknown_kind_is_error_not_panic() {
        let envelope = InboundEnvelope {
            kind: "Telemetry".into(),
            data: String::new(),
            client_id: "alice".into(),
        };
        assert!(ClientMessage::classify(&envelope).is_err());

        let outbound = OutboundEnvelope {
            kind: "Telemetry".into(),
            data: String::new(),
            timestamp: Utc::now(),
        };
        assert!(RouterNotice::classify(&outbound).is_err());
    }

    #[test]
    fn test_classify_malformed_payload_is_error() {
        let envelope = InboundEnvelope::new(SignalKind::SdpOffer, "not json", ADAPTER_CLIENT_ID);
        assert!(ClientMessage::classify(&envelope).is_err());
    }

    #[test]
    fn test_classify_router_notice() {
        let envelope = OutboundEnvelope::with_payload(
            SignalKind::ClientAwaiting,
            &ClientAwaitingNotice {
                id: "alice".into(),
                user_name: "Alice".into(),
            },
        )
        .unwrap();

        match RouterNotice::classify(&envelope).unwrap() {
            RouterNotice::ClientAwaiting(notice) => {
                assert_eq!(notice.id, "alice");
                assert_eq!(notice.user_name, "Alice");
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_server_to_client_kinds_rejected_from_clients() {
        let envelope = InboundEnvelope::new(SignalKind::ClientAdded, "{}", "alice");
        assert!(ClientMessage::classify(&envelope).is_err());
    }
}
