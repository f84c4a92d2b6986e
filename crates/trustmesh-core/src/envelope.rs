//! Wire and persistence wrapper with a static type registry
//!
//! An envelope carries a record's own serialized form behind a type tag so
//! payloads can be reconstructed without compile-time knowledge at the
//! call site. The registry is a static dispatch table over the three
//! record variants; extension is by recompilation.

use crate::canonical::canonical_bytes;
use crate::error::{Error, Result};
use crate::record::AnyRecord;
use serde::{Deserialize, Serialize};

/// Registered tag for trust assertions.
pub const TAG_AUTH: &str = "auth";
/// Registered tag for node advertisements.
pub const TAG_NODE: &str = "node";
/// Registered tag for generic peer records.
pub const TAG_PEER: &str = "peer";

/// Transport/persistence wrapper: type tag, serialized payload, and the
/// managed flag marking records that originate from static configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub tag: String,
    pub payload: Vec<u8>,
    pub managed: bool,
}

impl Envelope {
    /// Wrap a record under its registered tag.
    pub fn encode(record: &AnyRecord, managed: bool) -> Result<Self> {
        let (tag, payload) = match record {
            AnyRecord::Auth(r) => (TAG_AUTH, postcard::to_allocvec(r)?),
            AnyRecord::Node(r) => (TAG_NODE, postcard::to_allocvec(r)?),
            AnyRecord::Peer(r) => (TAG_PEER, postcard::to_allocvec(r)?),
        };
        Ok(Self {
            tag: tag.to_string(),
            payload,
            managed,
        })
    }

    /// Reconstruct the record behind the tag.
    ///
    /// Unknown tags and malformed payloads are reportable, recoverable
    /// errors; callers drop the message and carry on.
    pub fn decode(&self) -> Result<AnyRecord> {
        match self.tag.as_str() {
            TAG_AUTH => Ok(AnyRecord::Auth(postcard::from_bytes(&self.payload)?)),
            TAG_NODE => Ok(AnyRecord::Node(postcard::from_bytes(&self.payload)?)),
            TAG_PEER => Ok(AnyRecord::Peer(postcard::from_bytes(&self.payload)?)),
            other => Err(Error::UnknownTag(other.to_string())),
        }
    }

    /// Serialize the envelope itself, for the wire and the persistent
    /// store.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        canonical_bytes(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        postcard::from_bytes(bytes).map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;
    use crate::keys::KeyPair;
    use crate::record::{AuthRecord, NodeRecord, PeerRecord, Record};

    #[test]
    fn test_roundtrip_all_variants() {
        let kp = KeyPair::from_seed(&[1u8; 32]);

        let mut auth = AuthRecord::new(Domain::new("sub."), kp.public_b64(), 1);
        auth.sign(&kp).unwrap();
        let mut node = NodeRecord::new(Domain::new("sub.@"), "127.0.0.1:9".into(), 2);
        node.snapshot.insert(Domain::new("sub."), 1);
        node.sign(&kp).unwrap();
        let mut peer = PeerRecord::new(Domain::new("svc.sub."), "10.1.1.1:9".into(), 3);
        peer.sign(&kp).unwrap();

        for record in [
            AnyRecord::Auth(auth),
            AnyRecord::Node(node),
            AnyRecord::Peer(peer),
        ] {
            let envelope = Envelope::encode(&record, false).unwrap();
            let wire = envelope.to_bytes().unwrap();
            let back = Envelope::from_bytes(&wire).unwrap();
            assert_eq!(back.decode().unwrap(), record);
        }
    }

    #[test]
    fn test_unknown_tag_is_recoverable() {
        let envelope = Envelope {
            tag: "mystery".into(),
            payload: vec![1, 2, 3],
            managed: false,
        };
        assert!(matches!(envelope.decode(), Err(Error::UnknownTag(_))));
    }

    #[test]
    fn test_malformed_payload_is_recoverable() {
        let envelope = Envelope {
            tag: TAG_AUTH.into(),
            payload: vec![0xff; 2],
            managed: false,
        };
        assert!(envelope.decode().is_err());
    }

    #[test]
    fn test_managed_flag_survives() {
        let record = AnyRecord::Auth(AuthRecord::new(Domain::new("pin."), "k".into(), 1));
        let envelope = Envelope::encode(&record, true).unwrap();
        let back = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert!(back.managed);
    }
}
