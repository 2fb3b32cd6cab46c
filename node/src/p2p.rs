use crate::network::codec::{encode_frame, FrameDecoder};
use crate::network::{MessageTransportReceiver, MessageTransportSender, Transport};
use crate::primitives::WireMessage;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

const READ_BUFFER_LEN: usize = 1024;

/// Writes frames to the connection this party opened to the peer.
pub struct TcpSender {
    stream: Mutex<OwnedWriteHalf>,
}

/// Reads frames from the connection the peer opened to us.
pub struct TcpReceiver {
    stream: OwnedReadHalf,
    _write_half: OwnedWriteHalf,
    decoder: FrameDecoder,
    pending: VecDeque<WireMessage>,
}

#[async_trait]
impl MessageTransportSender for TcpSender {
    async fn send(&self, message: WireMessage) -> Result<()> {
        let mut stream = self.stream.lock().await;
        stream.write_all(&encode_frame(&message)).await?;
        stream.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl MessageTransportReceiver for TcpReceiver {
    async fn receive(&mut self) -> Result<WireMessage> {
        let mut buf = [0u8; READ_BUFFER_LEN];
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(message);
            }
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(anyhow!("Connection closed by peer"));
            }
            self.pending.extend(self.decoder.feed(&buf[..n]));
        }
    }
}

/// Listens on `listen_address` and connects to `peer_address`, retrying the
/// connection until the peer is up.
pub async fn new_tcp_transport(listen_address: &str, peer_address: &str) -> Result<Transport> {
    let listener = TcpListener::bind(listen_address)
        .await
        .with_context(|| format!("TCP bind {}", listen_address))?;
    connect_tcp_transport(listener, peer_address).await
}

pub async fn connect_tcp_transport(listener: TcpListener, peer_address: &str) -> Result<Transport> {
    let accept = async {
        let (stream, address) = listener.accept().await.context("TCP accept")?;
        tracing::info!(%address, "accepted peer connection");
        anyhow::Ok(stream)
    };
    let peer_address = peer_address.to_string();
    let connect = async {
        let stream = (|| TcpStream::connect(peer_address.clone()))
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(50))
                    .with_max_delay(Duration::from_secs(2))
                    .with_max_times(30),
            )
            .notify(|err, delay| {
                tracing::debug!(%err, ?delay, "peer not reachable yet, retrying");
            })
            .await
            .with_context(|| format!("TCP connect {}", peer_address))?;
        tracing::info!(address = %peer_address, "connected to peer");
        anyhow::Ok(stream)
    };
    let (incoming, outgoing) = tokio::try_join!(accept, connect)?;
    incoming.set_nodelay(true)?;
    outgoing.set_nodelay(true)?;

    let (read_half, write_half) = incoming.into_split();
    let (_, outgoing) = outgoing.into_split();
    Ok(Transport {
        sender: Arc::new(TcpSender {
            stream: Mutex::new(outgoing),
        }),
        receiver: Box::new(TcpReceiver {
            stream: read_half,
            _write_half: write_half,
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
        }),
    })
}
