//! Signed, timestamped, domain-scoped records
//!
//! The canonical bytes of a record are the postcard encoding of every
//! field except the signature, in struct field order. Signing and
//! verification must operate on these exact bytes.

use crate::canonical::canonical_bytes;
use crate::domain::Domain;
use crate::error::Result;
use crate::keys::{self, KeyPair};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in nanoseconds, the timestamp form all records
/// carry. Per-domain conflict resolution is strictly newer-wins on this
/// value.
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

/// Common capability set of every record variant.
pub trait Record {
    fn domain(&self) -> &Domain;
    fn timestamp(&self) -> i64;
    /// Deterministic encoding of all fields except the signature.
    fn canonical_bytes(&self) -> Result<Vec<u8>>;
    fn signature(&self) -> &[u8];
    fn set_signature(&mut self, signature: Vec<u8>);

    /// Sign the canonical bytes in place.
    fn sign(&mut self, keys: &KeyPair) -> Result<()> {
        let bytes = self.canonical_bytes()?;
        self.set_signature(keys.sign(&bytes));
        Ok(())
    }

    /// Check the stored signature against `key`.
    fn verify_with(&self, key: &VerifyingKey) -> bool {
        match self.canonical_bytes() {
            Ok(bytes) => keys::verify(key, &bytes, self.signature()),
            Err(_) => false,
        }
    }
}

// =============================================================================
// AUTH RECORD
// =============================================================================

/// Signed statement binding a public key to authority over a domain
/// subtree. The root entry (domain ".") is seeded from configuration and
/// trusted unconditionally.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AuthRecord {
    pub domain: Domain,
    /// Base64-encoded raw Ed25519 public key authorized for the subtree.
    pub key: String,
    pub timestamp: i64,
    pub signature: Vec<u8>,
}

#[derive(Serialize)]
struct AuthSignable<'a> {
    domain: &'a Domain,
    key: &'a str,
    timestamp: i64,
}

impl AuthRecord {
    pub fn new(domain: Domain, key: String, timestamp: i64) -> Self {
        Self {
            domain,
            key,
            timestamp,
            signature: Vec::new(),
        }
    }

    /// The declared authority key, parsed.
    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        keys::parse_public(&self.key)
    }
}

impl Record for AuthRecord {
    fn domain(&self) -> &Domain {
        &self.domain
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical_bytes(&AuthSignable {
            domain: &self.domain,
            key: &self.key,
            timestamp: self.timestamp,
        })
    }

    fn signature(&self) -> &[u8] {
        &self.signature
    }

    fn set_signature(&mut self, signature: Vec<u8>) {
        self.signature = signature;
    }
}

// =============================================================================
// NODE RECORD
// =============================================================================

/// Reachability advertisement for an identity domain, carrying a
/// point-in-time digest of the sender's entire store for anti-entropy.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    /// Identity domain ("labels.@").
    pub domain: Domain,
    /// Comma-separated connection strings.
    pub addresses: String,
    pub timestamp: i64,
    pub signature: Vec<u8>,
    /// Sender's view of its store: domain -> accepted timestamp.
    /// BTreeMap keeps the canonical encoding deterministic.
    pub snapshot: BTreeMap<Domain, i64>,
}

#[derive(Serialize)]
struct NodeSignable<'a> {
    domain: &'a Domain,
    addresses: &'a str,
    timestamp: i64,
    snapshot: &'a BTreeMap<Domain, i64>,
}

impl NodeRecord {
    pub fn new(domain: Domain, addresses: String, timestamp: i64) -> Self {
        Self {
            domain,
            addresses,
            timestamp,
            signature: Vec::new(),
            snapshot: BTreeMap::new(),
        }
    }
}

impl Record for NodeRecord {
    fn domain(&self) -> &Domain {
        &self.domain
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical_bytes(&NodeSignable {
            domain: &self.domain,
            addresses: &self.addresses,
            timestamp: self.timestamp,
            snapshot: &self.snapshot,
        })
    }

    fn signature(&self) -> &[u8] {
        &self.signature
    }

    fn set_signature(&mut self, signature: Vec<u8>) {
        self.signature = signature;
    }
}

// =============================================================================
// PEER RECORD
// =============================================================================

/// Generic signed address/metadata record. The control plane stores and
/// relays it but never interprets its contents; acceptance is delivered
/// to an externally supplied handler.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PeerRecord {
    pub domain: Domain,
    pub addresses: String,
    pub timestamp: i64,
    pub signature: Vec<u8>,
}

#[derive(Serialize)]
struct PeerSignable<'a> {
    domain: &'a Domain,
    addresses: &'a str,
    timestamp: i64,
}

impl PeerRecord {
    pub fn new(domain: Domain, addresses: String, timestamp: i64) -> Self {
        Self {
            domain,
            addresses,
            timestamp,
            signature: Vec::new(),
        }
    }
}

impl Record for PeerRecord {
    fn domain(&self) -> &Domain {
        &self.domain
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical_bytes(&PeerSignable {
            domain: &self.domain,
            addresses: &self.addresses,
            timestamp: self.timestamp,
        })
    }

    fn signature(&self) -> &[u8] {
        &self.signature
    }

    fn set_signature(&mut self, signature: Vec<u8>) {
        self.signature = signature;
    }
}

// =============================================================================
// TAGGED UNION
// =============================================================================

/// Union of all record variants. The envelope carries this as a tagged
/// payload rather than a trait object so persistence and transport stay
/// independent of runtime type identity.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum AnyRecord {
    Auth(AuthRecord),
    Node(NodeRecord),
    Peer(PeerRecord),
}

impl Record for AnyRecord {
    fn domain(&self) -> &Domain {
        match self {
            Self::Auth(r) => r.domain(),
            Self::Node(r) => r.domain(),
            Self::Peer(r) => r.domain(),
        }
    }

    fn timestamp(&self) -> i64 {
        match self {
            Self::Auth(r) => r.timestamp(),
            Self::Node(r) => r.timestamp(),
            Self::Peer(r) => r.timestamp(),
        }
    }

    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::Auth(r) => r.canonical_bytes(),
            Self::Node(r) => r.canonical_bytes(),
            Self::Peer(r) => r.canonical_bytes(),
        }
    }

    fn signature(&self) -> &[u8] {
        match self {
            Self::Auth(r) => r.signature(),
            Self::Node(r) => r.signature(),
            Self::Peer(r) => r.signature(),
        }
    }

    fn set_signature(&mut self, signature: Vec<u8>) {
        match self {
            Self::Auth(r) => r.set_signature(signature),
            Self::Node(r) => r.set_signature(signature),
            Self::Peer(r) => r.set_signature(signature),
        }
    }
}
