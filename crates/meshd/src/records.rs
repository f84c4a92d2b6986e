//! The record store
//!
//! Authoritative domain -> record map. Owns verification, persistence,
//! conflict resolution, and the side effects of record acceptance. All
//! map access goes through a single lock; within a domain only strictly
//! increasing timestamps are ever committed.

use crate::store::Store;
use crate::trust;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use trustmesh_core::{
    now_nanos, AnyRecord, AuthRecord, Domain, Envelope, KeyPair, NodeRecord, PeerRecord, Record,
};
use trustmesh_net::{GossipFrame, PeerId};

/// Map entry: the currently accepted record plus its managed flag.
pub struct StoredEntry {
    pub record: AnyRecord,
    pub managed: bool,
}

/// State behind the store lock.
pub(crate) struct StoreState {
    pub(crate) records: HashMap<Domain, StoredEntry>,
    /// Domains currently being hydrated from disk; breaks lazy-load
    /// re-entrancy on corrupted data.
    pub(crate) resolving: HashSet<Domain>,
}

impl StoreState {
    pub(crate) fn new() -> Self {
        Self {
            records: HashMap::new(),
            resolving: HashSet::new(),
        }
    }
}

/// Invoked with (new, old) when a node advertisement is accepted; the
/// tunnel layer reconfigures interfaces from it. Called with the store
/// lock held, so hooks must not call back into the store.
pub type NodeHook = Box<dyn Fn(&NodeRecord, Option<&NodeRecord>) + Send + Sync>;

/// Invoked with (new, old) when a peer record is accepted; the store
/// never interprets peer record contents. Same locking caveat as
/// [`NodeHook`].
pub type PeerHook = Box<dyn Fn(&PeerRecord, Option<&PeerRecord>) + Send + Sync>;

/// Channel endpoints the store writes to. The server loops and the
/// transport hold the receiving ends; no component holds a reference
/// back into the store.
pub struct StoreChannels {
    /// Envelopes to publish on the gossip channel
    pub outbound_tx: mpsc::UnboundedSender<Envelope>,
    /// Domains scheduled for re-broadcast (a peer is behind)
    pub pending_tx: mpsc::UnboundedSender<Domain>,
    /// Address lists to dial
    pub connect_tx: mpsc::UnboundedSender<String>,
}

/// Authoritative record store
pub struct RecordStore {
    state: Mutex<StoreState>,
    db: Arc<Store>,
    keys: KeyPair,
    local_domain: Domain,
    local_id: PeerId,
    advertise: String,
    channels: StoreChannels,
    node_hook: Option<NodeHook>,
    peer_hook: Option<PeerHook>,
}

impl RecordStore {
    pub fn new(
        db: Arc<Store>,
        keys: KeyPair,
        local_domain: Domain,
        advertise: String,
        channels: StoreChannels,
    ) -> Self {
        let local_id = PeerId::from_public_key(&keys.public_key());
        Self {
            state: Mutex::new(StoreState::new()),
            db,
            keys,
            local_domain,
            local_id,
            advertise,
            channels,
            node_hook: None,
            peer_hook: None,
        }
    }

    pub fn with_node_hook(mut self, hook: NodeHook) -> Self {
        self.node_hook = Some(hook);
        self
    }

    pub fn with_peer_hook(mut self, hook: PeerHook) -> Self {
        self.peer_hook = Some(hook);
        self
    }

    /// Seed the trust anchor and statically pinned assertions.
    ///
    /// The root entry is canonical from configuration: neither verified
    /// nor persisted. Pinned entries verify like any other record and
    /// are written through as managed.
    pub fn seed(&self, root_key: &str, pinned: &[AuthRecord]) {
        let root = AuthRecord::new(Domain::root(), root_key.to_string(), now_nanos());
        self.add(AnyRecord::Auth(root), true, false, true);
        for auth in pinned {
            if !self.add(AnyRecord::Auth(auth.clone()), false, true, true) {
                warn!("pinned trust assertion for {} rejected", auth.domain);
            }
        }
    }

    /// Optional boot path: hydrate the map from every persisted
    /// envelope. Entries that no longer verify are dropped from disk.
    /// The verifier also loads entries on demand, so skipping this only
    /// costs first-touch latency.
    pub fn warm_load(&self) {
        let entries: Vec<(String, Envelope)> = self
            .db
            .scan()
            .filter_map(|item| match item {
                Ok(pair) => Some(pair),
                Err(e) => {
                    warn!("skipping unreadable store entry: {}", e);
                    None
                }
            })
            .collect();
        for (key, envelope) in entries {
            let record = match envelope.decode() {
                Ok(record) => record,
                Err(e) => {
                    warn!("dropping undecodable store entry {}: {}", key, e);
                    if let Err(e) = self.db.remove(&key) {
                        warn!("removing {} failed: {}", key, e);
                    }
                    continue;
                }
            };
            if self.get(record.domain()).is_some() {
                continue;
            }
            if !self.add(record, false, false, envelope.managed) {
                warn!("dropping store entry {} that no longer verifies", key);
                if let Err(e) = self.db.remove(&key) {
                    warn!("removing {} failed: {}", key, e);
                }
            }
        }
    }

    /// Insert a record. `force` skips verification (trusted input such
    /// as the configured root); `persist` writes the envelope through
    /// to the backing store; `managed` marks static-configuration
    /// origin. The map entry is overwritten unconditionally: callers
    /// that care about freshness compare timestamps first (see `set`
    /// and `on_receive`).
    pub fn add(&self, record: AnyRecord, force: bool, persist: bool, managed: bool) -> bool {
        let mut state = self.state.lock();
        if !force && !trust::verify(&mut state, &self.db, &record) {
            warn!("record for {} failed verification, dropped", record.domain());
            return false;
        }
        self.add_locked(&mut state, record, persist, managed)
    }

    /// Map mutation under the lock. Callers have verified (or forced)
    /// the record already.
    fn add_locked(
        &self,
        state: &mut StoreState,
        record: AnyRecord,
        persist: bool,
        managed: bool,
    ) -> bool {
        let domain = record.domain().clone();
        let old = state.records.get(&domain).map(|e| e.record.clone());
        self.react(state, &record, old.as_ref());
        if persist {
            match Envelope::encode(&record, managed) {
                Ok(envelope) => {
                    if let Err(e) = self.db.put(domain.trimmed(), &envelope) {
                        // The in-memory acceptance stands either way.
                        warn!("persisting {} failed: {}", domain, e);
                    }
                }
                Err(e) => warn!("encoding {} for persistence failed: {}", domain, e),
            }
        }
        state.records.insert(domain, StoredEntry { record, managed });
        true
    }

    /// The locally-authoritative write path.
    ///
    /// Unsigned records are signed in place iff they belong to this
    /// node's own domain. A verified record replaces the stored one only
    /// when strictly newer; accepted records persist and broadcast.
    pub fn set(&self, mut record: AnyRecord) -> bool {
        if record.signature().is_empty() {
            if record.domain().base() != self.local_domain.base() {
                warn!(
                    "refusing to sign record for foreign domain {}",
                    record.domain()
                );
                return false;
            }
            if let Err(e) = record.sign(&self.keys) {
                warn!("signing record for {} failed: {}", record.domain(), e);
                return false;
            }
        }
        let mut state = self.state.lock();
        if !trust::verify(&mut state, &self.db, &record) {
            warn!("record for {} failed verification, dropped", record.domain());
            return false;
        }
        if let Some(existing) = state.records.get(record.domain()) {
            if record.timestamp() <= existing.record.timestamp() {
                debug!("record for {} is not newer, ignoring", record.domain());
                return false;
            }
        }
        let envelope = match Envelope::encode(&record, false) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("encoding {} for broadcast failed: {}", record.domain(), e);
                return false;
            }
        };
        self.add_locked(&mut state, record, true, false);
        let _ = self.channels.outbound_tx.send(envelope);
        true
    }

    /// Gossip inbound path. Persists accepted records but never
    /// re-broadcasts them; fan-out is the transport's job.
    pub fn on_receive(&self, frame: GossipFrame) {
        if frame.from == self.local_id {
            return;
        }
        let record = match frame.envelope.decode() {
            Ok(record) => record,
            Err(e) => {
                debug!("dropping undecodable gossip from {}: {}", frame.from, e);
                return;
            }
        };
        let mut state = self.state.lock();
        if !trust::verify(&mut state, &self.db, &record) {
            warn!(
                "gossip record for {} from {} failed verification, dropped",
                record.domain(),
                frame.from
            );
            return;
        }
        if let Some(existing) = state.records.get(record.domain()) {
            if record.timestamp() <= existing.record.timestamp() {
                debug!(
                    "stale record for {} from {}, ignoring",
                    record.domain(),
                    frame.from
                );
                return;
            }
        }
        self.add_locked(&mut state, record, true, frame.envelope.managed);
    }

    /// Anti-entropy heartbeat: advertise our addresses plus a snapshot
    /// of every stored domain's timestamp, signed and broadcast via
    /// `set`.
    pub fn helo(&self) -> bool {
        let snapshot: BTreeMap<Domain, i64> = self
            .state
            .lock()
            .records
            .iter()
            .map(|(domain, entry)| (domain.clone(), entry.record.timestamp()))
            .collect();
        let mut node = NodeRecord::new(
            self.local_domain.identity_form(),
            self.advertise.clone(),
            now_nanos(),
        );
        node.snapshot = snapshot;
        self.set(AnyRecord::Node(node))
    }

    /// Envelope for a currently-stored domain, for re-broadcast.
    pub fn envelope_for(&self, domain: &Domain) -> Option<Envelope> {
        let state = self.state.lock();
        let entry = state.records.get(domain)?;
        Envelope::encode(&entry.record, entry.managed).ok()
    }

    pub fn get(&self, domain: &Domain) -> Option<AnyRecord> {
        self.state
            .lock()
            .records
            .get(domain)
            .map(|e| e.record.clone())
    }

    /// Addresses of every known node, for the periodic reconnect loop.
    pub fn node_addresses(&self) -> Vec<String> {
        let local = self.local_domain.identity_form();
        self.state
            .lock()
            .records
            .values()
            .filter_map(|entry| match &entry.record {
                AnyRecord::Node(node) if node.domain != local && !node.addresses.is_empty() => {
                    Some(node.addresses.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-variant acceptance side effects, fired with (new, old)
    /// before the map entry is overwritten.
    fn react(&self, state: &mut StoreState, new: &AnyRecord, old: Option<&AnyRecord>) {
        match new {
            // Trust assertions only feed future verifications.
            AnyRecord::Auth(_) => {}
            AnyRecord::Node(node) => {
                let old_node = old.and_then(|r| match r {
                    AnyRecord::Node(n) => Some(n),
                    _ => None,
                });
                if node.domain != self.local_domain.identity_form()
                    && !node.addresses.is_empty()
                {
                    let _ = self.channels.connect_tx.send(node.addresses.clone());
                }
                // Push fresher managed records at peers whose snapshot
                // is behind.
                for (domain, peer_ts) in &node.snapshot {
                    if let Some(entry) = state.records.get(domain) {
                        if entry.managed && entry.record.timestamp() > *peer_ts {
                            let _ = self.channels.pending_tx.send(domain.clone());
                        }
                    }
                }
                if old_node.is_none() {
                    self.register_node(node);
                }
                if let Some(hook) = &self.node_hook {
                    hook(node, old_node);
                }
            }
            AnyRecord::Peer(peer) => {
                let old_peer = old.and_then(|r| match r {
                    AnyRecord::Peer(p) => Some(p),
                    _ => None,
                });
                if let Some(hook) = &self.peer_hook {
                    hook(peer, old_peer);
                }
            }
        }
    }

    /// Track known node identities under the reserved registry key.
    fn register_node(&self, node: &NodeRecord) {
        let id = node.domain.to_string();
        let mut registry = match self.db.node_registry() {
            Ok(registry) => registry,
            Err(e) => {
                warn!("reading node registry failed: {}", e);
                return;
            }
        };
        if !registry.contains(&id) {
            registry.push(id);
            if let Err(e) = self.db.put_node_registry(&registry) {
                warn!("updating node registry failed: {}", e);
            }
        }
    }
}
