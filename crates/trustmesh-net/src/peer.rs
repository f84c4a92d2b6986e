//! Peer identity

use serde::{Deserialize, Serialize};

/// Domain prefix for peer-id derivation
const DOMAIN_PEER: &[u8] = b"peer";

/// Stable peer identifier: BLAKE3("peer" || transport public key).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    /// Derive from a transport public key
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(DOMAIN_PEER);
        hasher.update(public_key);
        Self(*hasher.finalize().as_bytes())
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}
