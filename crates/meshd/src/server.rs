//! meshd server - daemon loops
//!
//! One task per long-running loop: inbound receive, outbound broadcast,
//! re-broadcast drain, connect, heartbeat, periodic reconnect. The loops
//! communicate with the record store through channels only and terminate
//! on the shutdown signal.

use crate::config::Config;
use crate::records::{NodeHook, PeerHook, RecordStore, StoreChannels};
use crate::store::{Store, StorageError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};
use trustmesh_core::{Domain, Envelope, KeyPair};
use trustmesh_net::{GossipFrame, PeerId, Transport, TransportError};

/// Anti-entropy heartbeat period
const HELO_INTERVAL: Duration = Duration::from_secs(30);
/// Bootstrap redial period
const RECONNECT_INTERVAL: Duration = Duration::from_secs(60);
/// Inbound gossip queue depth
const INBOUND_QUEUE: usize = 256;

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("key error: {0}")]
    Key(#[from] trustmesh_core::Error),
}

/// Server state
pub struct Server {
    config: Config,
    db: Arc<Store>,
    store: Arc<RecordStore>,
    transport: Arc<Transport>,
    inbound_rx: mpsc::Receiver<GossipFrame>,
    outbound_rx: mpsc::UnboundedReceiver<Envelope>,
    pending_rx: mpsc::UnboundedReceiver<Domain>,
    connect_rx: mpsc::UnboundedReceiver<String>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a new server instance. Key parsing and store opening are
    /// the fatal startup paths; nothing here fails once `run` is live.
    pub fn new(config: Config) -> Result<Self, ServerError> {
        Self::with_hooks(config, None, None)
    }

    /// Create a server with external acceptance hooks (the tunnel-layer
    /// and peer-record collaborators).
    pub fn with_hooks(
        config: Config,
        node_hook: Option<NodeHook>,
        peer_hook: Option<PeerHook>,
    ) -> Result<Self, ServerError> {
        let keys = KeyPair::parse(&config.private_key)?;
        let db = Arc::new(Store::open(&config.database)?);

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        let (connect_tx, connect_rx) = mpsc::unbounded_channel();

        let transport = Arc::new(Transport::new(
            keys.public_key(),
            config.listen_addrs(),
            inbound_tx,
        ));

        let mut store = RecordStore::new(
            db.clone(),
            keys,
            config.local_domain(),
            config.advertised(),
            StoreChannels {
                outbound_tx,
                pending_tx,
                connect_tx,
            },
        );
        if let Some(hook) = node_hook {
            store = store.with_node_hook(hook);
        }
        if let Some(hook) = peer_hook {
            store = store.with_peer_hook(hook);
        }

        let pinned: Vec<_> = config
            .auth
            .iter()
            .filter_map(|entry| match entry.to_record() {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("unusable pinned trust assertion for {}: {}", entry.domain, e);
                    None
                }
            })
            .collect();
        store.seed(&config.root_key, &pinned);
        store.warm_load();

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            db,
            store: Arc::new(store),
            transport,
            inbound_rx,
            outbound_rx,
            pending_rx,
            connect_rx,
            shutdown_tx,
        })
    }

    /// Our peer ID
    pub fn local_id(&self) -> PeerId {
        self.transport.local_id()
    }

    /// Signal all loops to stop.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Run the daemon until shutdown.
    pub async fn run(self) -> Result<(), ServerError> {
        let Server {
            config,
            db,
            store,
            transport,
            mut inbound_rx,
            mut outbound_rx,
            mut pending_rx,
            mut connect_rx,
            shutdown_tx,
        } = self;

        let bound = transport.start().await?;
        info!(
            "meshd running as {} ({} records), listening on {:?}",
            transport.local_id(),
            store.len(),
            bound
        );

        if let Some(bootstrap) = &config.bootstrap {
            transport.connect(bootstrap).await;
        }

        // Inbound gossip -> record store.
        {
            let store = store.clone();
            let mut shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        frame = inbound_rx.recv() => match frame {
                            Some(frame) => store.on_receive(frame),
                            None => break,
                        },
                        _ = shutdown.recv() => break,
                    }
                }
            });
        }

        // Locally accepted records -> gossip channel.
        {
            let transport = transport.clone();
            let mut shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        envelope = outbound_rx.recv() => match envelope {
                            Some(envelope) => {
                                if let Err(e) = transport.broadcast(envelope).await {
                                    warn!("broadcast failed: {}", e);
                                }
                            }
                            None => break,
                        },
                        _ = shutdown.recv() => break,
                    }
                }
            });
        }

        // Domains whose peers are behind -> re-broadcast.
        {
            let store = store.clone();
            let transport = transport.clone();
            let mut shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        domain = pending_rx.recv() => match domain {
                            Some(domain) => {
                                debug!("re-broadcasting {}", domain);
                                if let Some(envelope) = store.envelope_for(&domain) {
                                    if let Err(e) = transport.broadcast(envelope).await {
                                        warn!("re-broadcast of {} failed: {}", domain, e);
                                    }
                                }
                            }
                            None => break,
                        },
                        _ = shutdown.recv() => break,
                    }
                }
            });
        }

        // Addresses learned from node records -> dialer.
        {
            let transport = transport.clone();
            let mut shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        addrs = connect_rx.recv() => match addrs {
                            Some(addrs) => transport.connect(&addrs).await,
                            None => break,
                        },
                        _ = shutdown.recv() => break,
                    }
                }
            });
        }

        // Anti-entropy heartbeat.
        {
            let store = store.clone();
            let mut shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut ticker = interval(HELO_INTERVAL);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if !store.helo() {
                                debug!("heartbeat not broadcast");
                            }
                        }
                        _ = shutdown.recv() => break,
                    }
                }
            });
        }

        // Periodic reconnect to bootstrap and known nodes.
        {
            let store = store.clone();
            let transport = transport.clone();
            let bootstrap = config.bootstrap.clone();
            let mut shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut ticker = interval(RECONNECT_INTERVAL);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Some(bootstrap) = &bootstrap {
                                transport.connect(bootstrap).await;
                            }
                            for addrs in store.node_addresses() {
                                transport.connect(&addrs).await;
                            }
                        }
                        _ = shutdown.recv() => break,
                    }
                }
            });
        }

        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
            _ = shutdown_rx.recv() => {}
        }
        let _ = shutdown_tx.send(());

        db.flush()?;
        Ok(())
    }
}
