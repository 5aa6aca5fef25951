//! TCP fan-out frame publisher
//!
//! One listener per bridge, allocated sequentially from a base port. Every
//! accepted subscriber receives the live frame stream; a subscriber that
//! falls behind skips frames rather than stalling the publisher or its
//! peers.
//!
//! Wire format per frame, little-endian:
//! `"RVF0" | width u32 | height u32 | fourcc [u8;4] | timestamp u32 | len u32 | data`

use std::net::IpAddr;
use std::sync::atomic::{AtomicU16, Ordering};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{FrameSink, SinkFactory};
use crate::error::{AppError, Result};
use crate::media::format::PixelFormat;
use crate::media::frame::RawFrame;

const FRAME_MAGIC: &[u8; 4] = b"RVF0";

/// How many serialized frames a slow subscriber may lag before skipping
const SUBSCRIBER_BACKLOG: usize = 8;

/// Factory allocating one TCP publisher per sink name
pub struct TcpSinkFactory {
    bind_addr: IpAddr,
    base_port: u16,
    next_offset: AtomicU16,
}

impl TcpSinkFactory {
    pub fn new(bind_addr: IpAddr, base_port: u16) -> Self {
        Self {
            bind_addr,
            base_port,
            next_offset: AtomicU16::new(0),
        }
    }
}

#[async_trait::async_trait]
impl SinkFactory for TcpSinkFactory {
    async fn open(&self, name: &str) -> Result<Box<dyn FrameSink>> {
        let offset = self.next_offset.fetch_add(1, Ordering::Relaxed);
        let port = self.base_port.checked_add(offset).ok_or_else(|| {
            AppError::Sink(format!("sink port range exhausted at offset {}", offset))
        })?;

        let listener = TcpListener::bind((self.bind_addr, port))
            .await
            .map_err(|e| AppError::Sink(format!("failed to bind sink port {}: {}", port, e)))?;

        let (frame_tx, _) = broadcast::channel(SUBSCRIBER_BACKLOG);
        let cancel = CancellationToken::new();

        info!(
            "Video sink '{}' publishing on {}:{}",
            name, self.bind_addr, port
        );

        tokio::spawn(accept_loop(
            listener,
            frame_tx.clone(),
            cancel.clone(),
            name.to_string(),
        ));

        Ok(Box::new(TcpFrameSink {
            name: name.to_string(),
            frame_tx,
            cancel,
        }))
    }
}

async fn accept_loop(
    listener: TcpListener,
    frame_tx: broadcast::Sender<Bytes>,
    cancel: CancellationToken,
    name: String,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("Sink '{}' accept error: {}", name, e);
                        continue;
                    }
                };
                debug!("Sink '{}' subscriber connected: {}", name, peer);

                let mut frames = frame_tx.subscribe();
                let cancel = cancel.clone();
                let name = name.clone();
                tokio::spawn(async move {
                    let mut stream = stream;
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            frame = frames.recv() => match frame {
                                Ok(frame) => {
                                    if stream.write_all(&frame).await.is_err() {
                                        break;
                                    }
                                }
                                Err(broadcast::error::RecvError::Lagged(n)) => {
                                    debug!("Sink '{}' subscriber {} lagged {} frames", name, peer, n);
                                }
                                Err(broadcast::error::RecvError::Closed) => break,
                            }
                        }
                    }
                    debug!("Sink '{}' subscriber disconnected: {}", name, peer);
                });
            }
        }
    }
    debug!("Sink '{}' listener closed", name);
}

/// A bridge-owned TCP frame publisher
pub struct TcpFrameSink {
    name: String,
    frame_tx: broadcast::Sender<Bytes>,
    cancel: CancellationToken,
}

impl FrameSink for TcpFrameSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn expected_format(&self) -> PixelFormat {
        PixelFormat::Bgra
    }

    fn send(&mut self, frame: &RawFrame) -> Result<()> {
        // No subscribers is not an error; the frame is simply not observed
        let _ = self.frame_tx.send(serialize_frame(frame));
        Ok(())
    }

    fn close(&mut self) {
        self.cancel.cancel();
    }
}

fn serialize_frame(frame: &RawFrame) -> Bytes {
    let mut buf = BytesMut::with_capacity(20 + frame.len());
    buf.put_slice(FRAME_MAGIC);
    buf.put_u32_le(frame.width);
    buf.put_u32_le(frame.height);
    buf.put_slice(&frame.format.fourcc());
    buf.put_u32_le(frame.timestamp);
    buf.put_u32_le(frame.len() as u32);
    buf.put_slice(&frame.data);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::AsyncReadExt;

    fn bgra_frame(timestamp: u32) -> RawFrame {
        RawFrame::new(
            Bytes::from(vec![7u8; 2 * 2 * 4]),
            2,
            2,
            PixelFormat::Bgra,
            timestamp,
        )
    }

    #[test]
    fn test_serialize_frame_header() {
        let buf = serialize_frame(&bgra_frame(0x0102_0304));
        assert_eq!(&buf[..4], b"RVF0");
        assert_eq!(&buf[4..8], &2u32.to_le_bytes());
        assert_eq!(&buf[8..12], &2u32.to_le_bytes());
        assert_eq!(&buf[12..16], b"BGRA");
        assert_eq!(&buf[16..20], &0x0102_0304u32.to_le_bytes());
        assert_eq!(&buf[20..24], &16u32.to_le_bytes());
        assert_eq!(buf.len(), 24 + 16);
    }

    #[tokio::test]
    async fn test_subscriber_receives_frames() {
        // Grab a free port first; the factory needs a concrete base port
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let factory = TcpSinkFactory::new(addr.ip(), addr.port());

        let mut sink = factory.open("alice").await.unwrap();
        assert_eq!(sink.name(), "alice");
        assert_eq!(sink.expected_format(), PixelFormat::Bgra);

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        // Give the accept loop a turn before publishing
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        sink.send(&bgra_frame(99)).unwrap();

        let mut header = [0u8; 20];
        stream.read_exact(&mut header).await.unwrap();
        assert_eq!(&header[..4], b"RVF0");
        assert_eq!(&header[16..20], &99u32.to_le_bytes());

        sink.close();
    }

    #[tokio::test]
    async fn test_send_without_subscribers_is_ok() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let factory = TcpSinkFactory::new(addr.ip(), addr.port());
        let mut sink = factory.open("bob").await.unwrap();
        assert!(sink.send(&bgra_frame(1)).is_ok());
        sink.close();
    }
}
