//! Media transport seam
//!
//! The WebRTC engine (ICE, DTLS, SRTP, RTP) is consumed as an opaque
//! capability behind [`MediaTransport`]. Engine callbacks are turned into a
//! bounded stream of [`TransportEvent`]s consumed by a single per-bridge
//! task, so the bridge state machine is driven by one sequential event
//! source and can be tested against a fake transport.
//!
//! The production implementation wraps a webrtc-rs peer connection with
//! recv-only audio (PCMU) and video transceivers. Depacketization and
//! access-unit assembly happen here: `FrameReceived` always carries a whole
//! access unit, cut on the RTP marker bit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use rtp::codecs::h264::H264Packet;
use rtp::codecs::vp8::Vp8Packet;
use rtp::codecs::vp9::Vp9Packet;
use rtp::packetizer::Depacketizer;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_PCMU};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;

use crate::error::{AppError, Result};
use crate::media::format::VideoCodec;

/// Events queued per transport before the producer backpressures
const EVENT_QUEUE: usize = 64;

/// Connection state as observed by a bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    /// Whether this state terminates the bridge
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportState::Failed | TransportState::Closed)
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportState::New => write!(f, "new"),
            TransportState::Connecting => write!(f, "connecting"),
            TransportState::Connected => write!(f, "connected"),
            TransportState::Disconnected => write!(f, "disconnected"),
            TransportState::Failed => write!(f, "failed"),
            TransportState::Closed => write!(f, "closed"),
        }
    }
}

/// A format agreed during negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub codec: VideoCodec,
    pub clock_rate: u32,
    pub payload_type: u8,
}

/// Event emitted by a media transport, consumed by one bridge task
#[derive(Debug)]
pub enum TransportEvent {
    /// Video formats agreed with the remote peer, preference order preserved
    FormatsNegotiated(Vec<NegotiatedFormat>),
    /// One whole video access unit, with its RTP capture timestamp
    FrameReceived {
        timestamp: u32,
        payload: Bytes,
        format: NegotiatedFormat,
    },
    /// An audio frame arrived (audio is observed, not bridged)
    AudioFrameReceived { timestamp: u32, len: usize },
    StateChanged(TransportState),
}

/// Opaque negotiated transport capability
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Build the local offer; fails unless the engine confirms a local
    /// description of type offer.
    async fn create_offer(&self) -> Result<String>;

    /// Apply the remote answer
    async fn apply_answer(&self, sdp: &str) -> Result<()>;

    /// Tear the transport down
    async fn close(&self) -> Result<()>;
}

/// Opens one transport per admitted client
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(
        &self,
        client_id: &str,
    ) -> Result<(Arc<dyn MediaTransport>, mpsc::Receiver<TransportEvent>)>;
}

/// webrtc-rs backed transport factory
pub struct WebRtcTransportFactory {
    ice_servers: Vec<String>,
    video_codecs: Vec<VideoCodec>,
}

impl WebRtcTransportFactory {
    pub fn new(ice_servers: Vec<String>, video_codecs: Vec<VideoCodec>) -> Self {
        Self {
            ice_servers,
            video_codecs,
        }
    }

    fn build_media_engine(&self) -> Result<MediaEngine> {
        let mut media_engine = MediaEngine::default();

        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: RTCRtpCodecCapability {
                        mime_type: MIME_TYPE_PCMU.to_string(),
                        clock_rate: 8000,
                        channels: 1,
                        sdp_fmtp_line: String::new(),
                        rtcp_feedback: vec![],
                    },
                    payload_type: 0,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .map_err(|e| AppError::Transport(format!("failed to register PCMU: {}", e)))?;

        // Registration order is the offer's preference order
        for codec in &self.video_codecs {
            let sdp_fmtp_line = match codec {
                VideoCodec::H264 => {
                    "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                        .to_string()
                }
                VideoCodec::VP8 => String::new(),
                VideoCodec::VP9 => "profile-id=0".to_string(),
            };
            media_engine
                .register_codec(
                    RTCRtpCodecParameters {
                        capability: RTCRtpCodecCapability {
                            mime_type: codec.mime_type().to_string(),
                            clock_rate: 90000,
                            channels: 0,
                            sdp_fmtp_line,
                            rtcp_feedback: vec![],
                        },
                        payload_type: codec.payload_type(),
                        ..Default::default()
                    },
                    RTPCodecType::Video,
                )
                .map_err(|e| {
                    AppError::Transport(format!("failed to register {}: {}", codec, e))
                })?;
        }

        Ok(media_engine)
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn open(
        &self,
        client_id: &str,
    ) -> Result<(Arc<dyn MediaTransport>, mpsc::Receiver<TransportEvent>)> {
        let mut media_engine = self.build_media_engine()?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| AppError::Transport(format!("failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = self
            .ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let pc = api
            .new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(|e| AppError::Transport(format!("failed to create peer connection: {}", e)))?;
        let pc = Arc::new(pc);

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);

        let state_tx = event_tx.clone();
        let state_client = client_id.to_string();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let state_tx = state_tx.clone();
            let state_client = state_client.clone();
            Box::pin(async move {
                let state = match s {
                    RTCPeerConnectionState::New => TransportState::New,
                    RTCPeerConnectionState::Connecting => TransportState::Connecting,
                    RTCPeerConnectionState::Connected => TransportState::Connected,
                    RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
                    RTCPeerConnectionState::Failed => TransportState::Failed,
                    RTCPeerConnectionState::Closed => TransportState::Closed,
                    _ => return,
                };
                info!("Peer {} connection state: {}", state_client, state);
                let _ = state_tx.send(TransportEvent::StateChanged(state)).await;
            })
        }));

        let track_tx = event_tx.clone();
        let track_client = client_id.to_string();
        let formats_sent = Arc::new(AtomicBool::new(false));
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let events = track_tx.clone();
            let client_id = track_client.clone();
            let formats_sent = formats_sent.clone();
            let codec = track.codec();

            Box::pin(async move {
                let mime_type = codec.capability.mime_type.clone();
                info!(
                    "Peer {} track: kind={:?} mime={}",
                    client_id,
                    track.kind(),
                    mime_type
                );

                match track.kind() {
                    RTPCodecType::Audio => {
                        tokio::spawn(audio_read_loop(track, events));
                    }
                    RTPCodecType::Video => {
                        let Some(video_codec) = VideoCodec::from_mime_type(&mime_type) else {
                            warn!(
                                "Peer {} negotiated unrecognized video mime {}",
                                client_id, mime_type
                            );
                            return;
                        };
                        let format = NegotiatedFormat {
                            codec: video_codec,
                            clock_rate: codec.capability.clock_rate,
                            payload_type: codec.payload_type,
                        };
                        if !formats_sent.swap(true, Ordering::SeqCst) {
                            let _ = events
                                .send(TransportEvent::FormatsNegotiated(vec![format.clone()]))
                                .await;
                        }
                        tokio::spawn(video_read_loop(track, format, events));
                    }
                    _ => {}
                }
            })
        }));

        for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
            pc.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| {
                AppError::Transport(format!("failed to add {:?} transceiver: {}", kind, e))
            })?;
        }

        Ok((Arc::new(WebRtcTransport { pc }), event_rx))
    }
}

/// One negotiated webrtc-rs peer connection
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl MediaTransport for WebRtcTransport {
    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::Transport(format!("failed to create offer: {}", e)))?;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| AppError::Transport(format!("failed to set local description: {}", e)))?;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| AppError::Transport("peer connection has no local description".into()))?;
        if local.sdp_type != RTCSdpType::Offer {
            return Err(AppError::Transport(format!(
                "local description is not an offer: {}",
                local.sdp_type
            )));
        }
        Ok(local.sdp)
    }

    async fn apply_answer(&self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| AppError::Transport(format!("invalid SDP answer: {}", e)))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| AppError::Transport(format!("failed to set remote description: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| AppError::Transport(format!("failed to close peer connection: {}", e)))
    }
}

fn depacketizer_for(codec: VideoCodec) -> Box<dyn Depacketizer + Send> {
    match codec {
        VideoCodec::H264 => Box::new(H264Packet::default()),
        VideoCodec::VP8 => Box::new(Vp8Packet::default()),
        VideoCodec::VP9 => Box::new(Vp9Packet::default()),
    }
}

/// Read RTP video packets, reassemble access units, emit frame events.
///
/// A depacketization error discards the partial access unit; the next
/// marker-terminated unit starts clean.
async fn video_read_loop(
    track: Arc<TrackRemote>,
    format: NegotiatedFormat,
    events: mpsc::Sender<TransportEvent>,
) {
    let mut depacketizer = depacketizer_for(format.codec);
    let mut access_unit = BytesMut::new();

    loop {
        let (packet, _) = match track.read_rtp().await {
            Ok(pair) => pair,
            Err(e) => {
                debug!("Video track read ended: {}", e);
                break;
            }
        };
        if packet.payload.is_empty() {
            continue;
        }

        match depacketizer.depacketize(&packet.payload) {
            Ok(data) => access_unit.extend_from_slice(&data),
            Err(e) => {
                trace!("Dropping malformed RTP payload: {}", e);
                access_unit.clear();
                continue;
            }
        }

        if packet.header.marker && !access_unit.is_empty() {
            let payload = access_unit.split().freeze();
            let event = TransportEvent::FrameReceived {
                timestamp: packet.header.timestamp,
                payload,
                format: format.clone(),
            };
            if events.send(event).await.is_err() {
                break;
            }
        }
    }
}

async fn audio_read_loop(track: Arc<TrackRemote>, events: mpsc::Sender<TransportEvent>) {
    loop {
        let (packet, _) = match track.read_rtp().await {
            Ok(pair) => pair,
            Err(e) => {
                debug!("Audio track read ended: {}", e);
                break;
            }
        };
        let event = TransportEvent::AudioFrameReceived {
            timestamp: packet.header.timestamp,
            len: packet.payload.len(),
        };
        if events.send(event).await.is_err() {
            break;
        }
    }
}
