//! Always-on adapter process: signaling client, bridge supervisor and
//! per-client media bridges

pub mod bridge;
pub mod client;
pub mod supervisor;
pub mod transport;

pub use bridge::{BridgeState, MediaBridge};
pub use supervisor::BridgeSupervisor;

use std::net::IpAddr;
use std::sync::Arc;

use tracing::info;

use crate::config::AdapterConfig;
use crate::error::{AppError, Result};
use crate::media::decoder::DecoderRegistry;
use crate::media::sink::tcp::TcpSinkFactory;
use crate::media::sink::SinkFactory;
use transport::{TransportFactory, WebRtcTransportFactory};

/// Run the adapter with its production collaborators wired in.
pub async fn run(config: &AdapterConfig) -> Result<()> {
    let sink_addr: IpAddr = config.sink_bind_addr.parse().map_err(|e| {
        AppError::Config(format!(
            "invalid sink bind address '{}': {}",
            config.sink_bind_addr, e
        ))
    })?;

    let transports: Arc<dyn TransportFactory> = Arc::new(WebRtcTransportFactory::new(
        config.ice_servers.clone(),
        config.video_codecs.clone(),
    ));
    let decoders = Arc::new(DecoderRegistry::with_defaults());
    let sinks: Arc<dyn SinkFactory> =
        Arc::new(TcpSinkFactory::new(sink_addr, config.sink_base_port));

    info!(
        "Starting RTC adapter (codec preference: {:?})",
        config.video_codecs
    );
    client::run(config, transports, decoders, sinks).await
}
