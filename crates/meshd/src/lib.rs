//! meshd - TrustMesh control-plane daemon
//!
//! This daemon maintains the trust-chain verified record store and
//! reconciles it across the gossip mesh:
//! - Domain-keyed record map with last-writer-wins conflict resolution
//! - Hierarchical trust-chain verification back to a configured root
//! - Write-through persistence keyed by trimmed domain
//! - Anti-entropy heartbeat carrying a full state snapshot

pub mod config;
pub mod records;
pub mod server;
pub mod store;
mod trust;

pub use config::{AuthEntry, Config};
pub use records::{NodeHook, PeerHook, RecordStore};
pub use server::Server;
pub use store::Store;

use trustmesh_core::{now_nanos, AuthRecord, Domain, KeyPair, Record};
use trustmesh_net::PeerId;

/// Run the daemon until shutdown. The only long-lived entry point
/// consumed by the CLI.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let server = Server::new(config)?;
    server.run().await?;
    Ok(())
}

/// Derive the public identity from a configuration: the base64 public
/// key and the gossip peer ID.
pub fn get_id(config: &Config) -> anyhow::Result<(String, PeerId)> {
    let keys = KeyPair::parse(&config.private_key)?;
    Ok((keys.public_b64(), PeerId::from_public_key(&keys.public_key())))
}

/// Produce a signed trust assertion for manual distribution, using the
/// configured management key.
pub fn sign_auth(config: &Config, domain: &str, key: &str) -> anyhow::Result<AuthRecord> {
    let manage = config
        .manage_key
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("manage key missing from configuration"))?;
    let manage = KeyPair::parse(manage)?;
    let name = if domain.ends_with('.') || domain.ends_with('@') {
        domain.to_string()
    } else {
        format!("{domain}.")
    };
    let mut record = AuthRecord::new(Domain::new(name), key.to_string(), now_nanos());
    record.sign(&manage)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustmesh_core::keys;

    fn config_with_manage_key() -> Config {
        let kp = KeyPair::from_seed(&[1u8; 32]);
        let root = KeyPair::from_seed(&[2u8; 32]);
        let manage = KeyPair::from_seed(&[3u8; 32]);
        Config {
            domain: "node1.mesh".to_string(),
            private_key: kp.private_b64(),
            root_key: root.public_b64(),
            listen: "127.0.0.1:0".to_string(),
            advertise: None,
            bootstrap: None,
            auth: vec![],
            database: "./unused".into(),
            socket: "/tmp/unused.sock".into(),
            manage_key: Some(manage.private_b64()),
        }
    }

    #[test]
    fn test_get_id_is_deterministic() {
        let config = config_with_manage_key();
        let (public, peer) = get_id(&config).unwrap();
        let (public2, peer2) = get_id(&config).unwrap();
        assert_eq!(public, public2);
        assert_eq!(peer, peer2);
    }

    #[test]
    fn test_sign_auth_chains_to_manage_key() {
        let config = config_with_manage_key();
        let subject = KeyPair::from_seed(&[4u8; 32]);

        let record = sign_auth(&config, "sub", &subject.public_b64()).unwrap();
        assert_eq!(record.domain.as_str(), "sub.");

        let manage = KeyPair::parse(config.manage_key.as_deref().unwrap()).unwrap();
        assert!(record.verify_with(&manage.verifying_key()));
        assert_eq!(
            keys::parse_public(&record.key).unwrap().to_bytes(),
            subject.public_key()
        );
    }

    #[test]
    fn test_sign_auth_requires_manage_key() {
        let mut config = config_with_manage_key();
        config.manage_key = None;
        assert!(sign_auth(&config, "sub", "key").is_err());
    }
}
