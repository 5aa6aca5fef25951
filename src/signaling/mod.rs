//! Shared signaling protocol definitions

pub mod messages;

pub use messages::{
    ClientAddedNotice, ClientAwaitingNotice, ClientMessage, InboundEnvelope, OutboundEnvelope,
    RouterNotice, SdpAnswerPayload, SdpOfferPayload, SignalKind, ADAPTER_CLIENT_ID,
};
