//! Configuration for meshd
//!
//! The daemon reads a JSON configuration file naming the local identity,
//! key material, addresses, and any statically pinned trust assertions.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use trustmesh_core::{keys, AuthRecord, Domain, KeyPair};

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Local identity domain, e.g. "node1.mesh"
    pub domain: String,

    /// Base64 raw Ed25519 private key for the local identity
    pub private_key: String,

    /// Base64 raw Ed25519 public key trusted as the root of the domain
    /// tree
    pub root_key: String,

    /// Listen addresses, comma-separated host:port
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Addresses advertised in our node record; defaults to `listen`
    #[serde(default)]
    pub advertise: Option<String>,

    /// Bootstrap address list, comma-separated
    #[serde(default)]
    pub bootstrap: Option<String>,

    /// Statically pinned trust assertions
    #[serde(default)]
    pub auth: Vec<AuthEntry>,

    /// Persistent store path
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Control socket path, consumed by external tooling
    #[serde(default = "default_socket")]
    pub socket: PathBuf,

    /// Management key used by the `sign` subcommand
    #[serde(default)]
    pub manage_key: Option<String>,
}

fn default_listen() -> String {
    "0.0.0.0:7946".to_string()
}

fn default_database() -> PathBuf {
    PathBuf::from("./.meshd.db")
}

fn default_socket() -> PathBuf {
    PathBuf::from("/tmp/meshd.sock")
}

/// A pinned trust assertion as it appears in the configuration file.
/// The signature is base64 so entries can be pasted from `meshd sign`
/// output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthEntry {
    pub domain: String,
    pub key: String,
    pub timestamp: i64,
    pub sign: String,
}

impl AuthEntry {
    pub fn to_record(&self) -> anyhow::Result<AuthRecord> {
        let signature = BASE64.decode(self.sign.trim())?;
        let mut record = AuthRecord::new(
            Domain::new(self.domain.clone()),
            self.key.clone(),
            self.timestamp,
        );
        record.signature = signature;
        Ok(record)
    }

    pub fn from_record(record: &AuthRecord) -> Self {
        Self {
            domain: record.domain.to_string(),
            key: record.key.clone(),
            timestamp: record.timestamp,
            sign: BASE64.encode(&record.signature),
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.domain.is_empty() {
            anyhow::bail!("local domain cannot be empty");
        }
        KeyPair::parse(&self.private_key)
            .map_err(|e| anyhow::anyhow!("private key: {}", e))?;
        keys::parse_public(&self.root_key)
            .map_err(|e| anyhow::anyhow!("root key: {}", e))?;
        Ok(())
    }

    /// The local identity domain.
    pub fn local_domain(&self) -> Domain {
        Domain::new(self.domain.clone())
    }

    /// Addresses advertised to peers.
    pub fn advertised(&self) -> String {
        self.advertise.clone().unwrap_or_else(|| self.listen.clone())
    }

    /// Listen addresses as a list.
    pub fn listen_addrs(&self) -> Vec<String> {
        self.listen
            .split(',')
            .filter(|a| !a.is_empty())
            .map(|a| a.trim().to_string())
            .collect()
    }
}
