//! Trust-chain verification
//!
//! A record is accepted iff some ancestor in its domain's trust chain
//! holds a trust assertion whose declared key verifies the record's
//! canonical bytes. Ancestors absent from the in-memory map are lazily
//! hydrated from the persistent store; a hydrated assertion must itself
//! verify before it is trusted, which re-enters this same walk. The
//! `resolving` set breaks that re-entrancy if persisted data is
//! corrupted into a cycle; the root entry is the unconditional base case.

use crate::records::{StoreState, StoredEntry};
use crate::store::Store;
use ed25519_dalek::VerifyingKey;
use tracing::{debug, warn};
use trustmesh_core::{AnyRecord, Domain, Record};

/// Walk the record's trust chain; true on the first ancestor whose key
/// verifies the signature.
pub(crate) fn verify(state: &mut StoreState, db: &Store, record: &AnyRecord) -> bool {
    let domain = record.domain().clone();
    if domain.is_root() {
        // The anchor enters through configuration seeding only; nothing
        // received or loaded may claim it.
        return false;
    }
    for ancestor in domain.trust_chain() {
        let Some(key) = lookup_auth(state, db, &ancestor) else {
            continue;
        };
        if record.verify_with(&key) {
            return true;
        }
    }
    false
}

/// Authority key for an ancestor domain, from memory or disk.
fn lookup_auth(state: &mut StoreState, db: &Store, ancestor: &Domain) -> Option<VerifyingKey> {
    if let Some(entry) = state.records.get(ancestor) {
        if let AnyRecord::Auth(auth) = &entry.record {
            return auth.verifying_key().ok();
        }
        return None;
    }
    load_from_db(state, db, ancestor)
}

fn load_from_db(state: &mut StoreState, db: &Store, domain: &Domain) -> Option<VerifyingKey> {
    if !state.resolving.insert(domain.clone()) {
        debug!("cycle while resolving {}, treating as unresolvable", domain);
        return None;
    }
    let key = try_load(state, db, domain);
    state.resolving.remove(domain);
    key
}

fn try_load(state: &mut StoreState, db: &Store, domain: &Domain) -> Option<VerifyingKey> {
    let envelope = match db.get(domain.trimmed()) {
        Ok(Some(envelope)) => envelope,
        // Read errors degrade to "not found": the ancestor is simply
        // untrusted for this walk.
        Ok(None) => return None,
        Err(e) => {
            warn!("loading {} from store failed: {}", domain, e);
            return None;
        }
    };
    let record = match envelope.decode() {
        Ok(record) => record,
        Err(e) => {
            warn!("undecodable store entry for {}: {}", domain, e);
            drop_invalid(db, domain);
            return None;
        }
    };
    let AnyRecord::Auth(auth) = &record else {
        warn!("store entry for {} is not a trust assertion", domain);
        return None;
    };
    if auth.domain != *domain {
        warn!("store entry under {} claims domain {}", domain, auth.domain);
        drop_invalid(db, domain);
        return None;
    }
    if !verify(state, db, &record) {
        warn!("persisted trust assertion for {} no longer verifies", domain);
        drop_invalid(db, domain);
        return None;
    }
    let key = auth.verifying_key().ok()?;
    state.records.insert(
        domain.clone(),
        StoredEntry {
            record,
            managed: envelope.managed,
        },
    );
    Some(key)
}

fn drop_invalid(db: &Store, domain: &Domain) {
    if let Err(e) = db.remove(domain.trimmed()) {
        warn!("removing invalid store entry {} failed: {}", domain, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use trustmesh_core::{AuthRecord, Envelope, KeyPair, PeerRecord};

    fn seeded_state(root: &KeyPair) -> StoreState {
        let mut state = StoreState::new();
        let anchor = AuthRecord::new(Domain::root(), root.public_b64(), 1);
        state.records.insert(
            Domain::root(),
            StoredEntry {
                record: AnyRecord::Auth(anchor),
                managed: true,
            },
        );
        state
    }

    #[test]
    fn test_chain_to_root_accepts() {
        let dir = tempdir().unwrap();
        let db = Store::open(dir.path()).unwrap();
        let root = KeyPair::from_seed(&[1u8; 32]);
        let mut state = seeded_state(&root);

        let mut auth = AuthRecord::new(Domain::new("sub."), "irrelevant".into(), 2);
        auth.sign(&root).unwrap();

        assert!(verify(&mut state, &db, &AnyRecord::Auth(auth)));
    }

    #[test]
    fn test_unchained_record_rejected() {
        let dir = tempdir().unwrap();
        let db = Store::open(dir.path()).unwrap();
        let root = KeyPair::from_seed(&[1u8; 32]);
        let mut state = seeded_state(&root);

        let rogue = KeyPair::from_seed(&[9u8; 32]);
        let mut auth = AuthRecord::new(Domain::new("sub."), rogue.public_b64(), 2);
        auth.sign(&rogue).unwrap();

        assert!(!verify(&mut state, &db, &AnyRecord::Auth(auth)));
    }

    #[test]
    fn test_root_claim_rejected() {
        let dir = tempdir().unwrap();
        let db = Store::open(dir.path()).unwrap();
        let root = KeyPair::from_seed(&[1u8; 32]);
        let mut state = seeded_state(&root);

        let mut claim = AuthRecord::new(Domain::root(), root.public_b64(), 99);
        claim.sign(&root).unwrap();

        assert!(!verify(&mut state, &db, &AnyRecord::Auth(claim)));
    }

    #[test]
    fn test_lazy_load_hydrates_chain() {
        let dir = tempdir().unwrap();
        let db = Store::open(dir.path()).unwrap();
        let root = KeyPair::from_seed(&[1u8; 32]);
        let sub_keys = KeyPair::from_seed(&[2u8; 32]);

        // Persisted but not in memory: root signs "sub.".
        let mut sub = AuthRecord::new(Domain::new("sub."), sub_keys.public_b64(), 2);
        sub.sign(&root).unwrap();
        db.put("sub", &Envelope::encode(&AnyRecord::Auth(sub), false).unwrap())
            .unwrap();

        let mut state = seeded_state(&root);
        let mut record = PeerRecord::new(Domain::new("svc.sub."), "10.0.0.1:1".into(), 3);
        record.sign(&sub_keys).unwrap();

        assert!(verify(&mut state, &db, &AnyRecord::Peer(record)));
        // The hydrated assertion is now cached.
        assert!(state.records.contains_key(&Domain::new("sub.")));
    }

    #[test]
    fn test_invalid_persisted_entry_removed() {
        let dir = tempdir().unwrap();
        let db = Store::open(dir.path()).unwrap();
        let root = KeyPair::from_seed(&[1u8; 32]);
        let rogue = KeyPair::from_seed(&[9u8; 32]);

        // Persisted assertion signed by nobody in the chain.
        let mut bad = AuthRecord::new(Domain::new("sub."), rogue.public_b64(), 2);
        bad.sign(&rogue).unwrap();
        db.put("sub", &Envelope::encode(&AnyRecord::Auth(bad), false).unwrap())
            .unwrap();

        let mut state = seeded_state(&root);
        let sub_signer = KeyPair::from_seed(&[3u8; 32]);
        let mut record = PeerRecord::new(Domain::new("svc.sub."), String::new(), 3);
        record.sign(&sub_signer).unwrap();

        assert!(!verify(&mut state, &db, &AnyRecord::Peer(record)));
        assert!(db.get("sub").unwrap().is_none());
    }

    #[test]
    fn test_mislabeled_persisted_entry_removed() {
        let dir = tempdir().unwrap();
        let db = Store::open(dir.path()).unwrap();
        let root = KeyPair::from_seed(&[1u8; 32]);

        // Entry stored under "sub" claims a different domain.
        let mut other = AuthRecord::new(Domain::new("other."), root.public_b64(), 2);
        other.sign(&root).unwrap();
        db.put("sub", &Envelope::encode(&AnyRecord::Auth(other), false).unwrap())
            .unwrap();

        let mut state = seeded_state(&root);
        let mut record = PeerRecord::new(Domain::new("svc.sub."), String::new(), 3);
        record.sign(&root).unwrap();

        // Chain still succeeds via the root, but the bogus entry is gone.
        assert!(verify(&mut state, &db, &AnyRecord::Peer(record)));
        assert!(db.get("sub").unwrap().is_none());
    }
}
