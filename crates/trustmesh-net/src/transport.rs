//! TCP gossip transport
//!
//! Every envelope rides a single shared broadcast channel: a published
//! frame goes to all live connections, and inbound frames are delivered
//! onto a bounded channel handed in at construction. The transport
//! guarantees neither delivery nor ordering nor deduplication; the record
//! store's timestamp reconciliation is what makes repeated and
//! out-of-order delivery safe.

use crate::framing::{Frame, FrameCodec, FrameError, FrameType};
use crate::peer::PeerId;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};
use trustmesh_core::Envelope;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("codec error: {0}")]
    Codec(#[from] postcard::Error),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("connection closed")]
    ConnectionClosed,
}

/// The single shared broadcast channel all envelopes ride.
pub const CHANNEL: &str = "node";

/// Handshake sent once per connection, identifying the remote end and
/// the channel it gossips on.
#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    public_key: [u8; 32],
    channel: String,
}

/// A gossip payload with its originating peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GossipFrame {
    pub from: PeerId,
    pub envelope: Envelope,
}

/// Gossip transport owning the connection table.
pub struct Transport {
    local_id: PeerId,
    public_key: [u8; 32],
    listen: Vec<String>,
    conns: Arc<RwLock<HashMap<PeerId, mpsc::Sender<Frame>>>>,
    inbound_tx: mpsc::Sender<GossipFrame>,
}

impl Transport {
    /// Create a transport. `inbound_tx` is the bounded channel the
    /// receive loop consumes; the transport never holds a reference back
    /// to its owner.
    pub fn new(
        public_key: [u8; 32],
        listen: Vec<String>,
        inbound_tx: mpsc::Sender<GossipFrame>,
    ) -> Self {
        Self {
            local_id: PeerId::from_public_key(&public_key),
            public_key,
            listen,
            conns: Arc::new(RwLock::new(HashMap::new())),
            inbound_tx,
        }
    }

    /// Our peer ID
    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    /// Currently connected peers
    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.conns.read().keys().copied().collect()
    }

    /// Bind every listen address and start accepting connections.
    ///
    /// Returns the bound socket addresses. Bind failures are fatal; this
    /// runs at startup only.
    pub async fn start(self: &Arc<Self>) -> Result<Vec<SocketAddr>, TransportError> {
        let mut bound = Vec::new();
        for addr in &self.listen {
            let listener = TcpListener::bind(addr.as_str()).await?;
            let local = listener.local_addr()?;
            info!("gossip transport listening on {}", local);
            bound.push(local);

            let transport = Arc::clone(self);
            tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, remote)) => {
                            debug!("accepted connection from {}", remote);
                            transport.spawn_connection(stream);
                        }
                        Err(e) => {
                            warn!("accept failed: {}", e);
                        }
                    }
                }
            });
        }
        Ok(bound)
    }

    /// Dial a comma-separated address list, one address at a time.
    ///
    /// Malformed entries are skipped; connection failures are logged and
    /// the loop continues. Never fatal.
    pub async fn connect(self: &Arc<Self>, addrs: &str) {
        for addr in addrs.split(',') {
            let addr = addr.trim();
            if addr.is_empty() {
                continue;
            }
            if !addr.contains(':') {
                warn!("skipping malformed address {}", addr);
                continue;
            }
            debug!("dialing {}", addr);
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    debug!("{} connected", addr);
                    self.spawn_connection(stream);
                }
                Err(e) => {
                    debug!("connect to {} failed: {}", addr, e);
                }
            }
        }
    }

    /// Publish an envelope to every live connection.
    pub async fn broadcast(&self, envelope: Envelope) -> Result<(), TransportError> {
        let gossip = GossipFrame {
            from: self.local_id,
            envelope,
        };
        let frame = Frame::new(FrameType::Gossip, postcard::to_allocvec(&gossip)?);

        let conns: Vec<(PeerId, mpsc::Sender<Frame>)> = self
            .conns
            .read()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();
        for (id, tx) in conns {
            if tx.send(frame.clone()).await.is_err() {
                warn!("broadcast to {} failed, connection closed", id);
            }
        }
        Ok(())
    }

    fn spawn_connection(self: &Arc<Self>, stream: TcpStream) {
        let transport = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = transport.handle_connection(stream).await {
                debug!("connection ended: {}", e);
            }
        });
    }

    /// Per-connection task: Hello exchange, then frame pumping in both
    /// directions until either side closes.
    async fn handle_connection(self: Arc<Self>, stream: TcpStream) -> Result<(), TransportError> {
        let remote = stream.peer_addr()?;
        let (rd, wr) = stream.into_split();
        let mut reader = FramedRead::new(rd, FrameCodec::new());
        let mut writer = FramedWrite::new(wr, FrameCodec::new());

        let hello = Hello {
            public_key: self.public_key,
            channel: CHANNEL.to_string(),
        };
        writer
            .send(Frame::new(FrameType::Hello, postcard::to_allocvec(&hello)?))
            .await?;

        let peer_id = match reader.next().await {
            Some(Ok(frame)) if frame.frame_type == FrameType::Hello => {
                let hello: Hello = postcard::from_bytes(&frame.payload)?;
                if hello.channel != CHANNEL {
                    return Err(TransportError::Handshake(format!(
                        "peer at {} gossips on channel {:?}",
                        remote, hello.channel
                    )));
                }
                PeerId::from_public_key(&hello.public_key)
            }
            _ => {
                return Err(TransportError::Handshake(format!(
                    "no hello from {}",
                    remote
                )))
            }
        };

        if peer_id == self.local_id {
            debug!("dropping loopback connection via {}", remote);
            return Ok(());
        }

        let (tx, mut rx) = mpsc::channel::<Frame>(64);
        {
            let mut conns = self.conns.write();
            if conns.contains_key(&peer_id) {
                debug!("duplicate connection to {}, dropping", peer_id);
                return Ok(());
            }
            conns.insert(peer_id, tx);
        }
        info!("peer {} connected via {}", peer_id, remote);

        let result = self.pump(peer_id, &mut reader, &mut writer, &mut rx).await;

        self.conns.write().remove(&peer_id);
        info!("peer {} disconnected", peer_id);
        result
    }

    async fn pump(
        &self,
        peer_id: PeerId,
        reader: &mut FramedRead<tokio::net::tcp::OwnedReadHalf, FrameCodec>,
        writer: &mut FramedWrite<tokio::net::tcp::OwnedWriteHalf, FrameCodec>,
        outbound: &mut mpsc::Receiver<Frame>,
    ) -> Result<(), TransportError> {
        loop {
            tokio::select! {
                frame = outbound.recv() => match frame {
                    Some(frame) => writer.send(frame).await?,
                    None => return Ok(()),
                },
                frame = reader.next() => match frame {
                    Some(Ok(frame)) => match frame.frame_type {
                        FrameType::Gossip => match postcard::from_bytes::<GossipFrame>(&frame.payload) {
                            Ok(gossip) => {
                                if self.inbound_tx.send(gossip).await.is_err() {
                                    return Ok(());
                                }
                            }
                            Err(e) => warn!("malformed gossip frame from {}: {}", peer_id, e),
                        },
                        FrameType::Ping => writer.send(Frame::pong()).await?,
                        FrameType::Pong | FrameType::Hello => {}
                    },
                    Some(Err(e)) => {
                        warn!("read from {} failed: {}", peer_id, e);
                        return Ok(());
                    }
                    None => return Ok(()),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;
    use trustmesh_core::{AnyRecord, AuthRecord, Domain, Envelope};

    fn test_transport(key_byte: u8) -> (Arc<Transport>, mpsc::Receiver<GossipFrame>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let transport = Arc::new(Transport::new(
            [key_byte; 32],
            vec!["127.0.0.1:0".to_string()],
            inbound_tx,
        ));
        (transport, inbound_rx)
    }

    #[tokio::test]
    async fn test_gossip_reaches_connected_peer() {
        let (listener, mut listener_rx) = test_transport(1);
        let (dialer, _dialer_rx) = test_transport(2);

        let bound = listener.start().await.unwrap();
        dialer.connect(&bound[0].to_string()).await;

        // Wait for the handshake to register the connection.
        timeout(Duration::from_secs(5), async {
            while dialer.connected_peers().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let record = AnyRecord::Auth(AuthRecord::new(Domain::new("sub."), "key".into(), 42));
        let envelope = Envelope::encode(&record, false).unwrap();
        dialer.broadcast(envelope.clone()).await.unwrap();

        let received = timeout(Duration::from_secs(5), listener_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.from, dialer.local_id());
        assert_eq!(received.envelope, envelope);
    }

    #[tokio::test]
    async fn test_connect_skips_malformed_addresses() {
        let (transport, _rx) = test_transport(3);
        // Must not panic or abort on junk entries.
        transport.connect("not-an-address,,127.0.0.1:1").await;
        assert!(transport.connected_peers().is_empty());
    }
}
