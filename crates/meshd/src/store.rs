//! Persistent record store backed by sled
//!
//! Keys are trimmed domain names (no leading or trailing dot); values are
//! postcard-encoded envelopes. The reserved "%nodes" key carries the
//! known node-identity registry.

use sled::Db;
use std::path::Path;
use thiserror::Error;
use trustmesh_core::Envelope;

/// Reserved key enumerating known node identity domains.
pub const NODES_KEY: &str = "%nodes";

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("codec error: {0}")]
    Codec(#[from] trustmesh_core::Error),
}

/// Write-through backing store for the record map
pub struct Store {
    db: Db,
}

impl Store {
    /// Open the store at the given path. Fatal at startup only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    /// Load the envelope stored under a trimmed domain key.
    pub fn get(&self, key: &str) -> Result<Option<Envelope>, StorageError> {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(Envelope::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Write an envelope under a trimmed domain key.
    pub fn put(&self, key: &str, envelope: &Envelope) -> Result<(), StorageError> {
        let value = envelope.to_bytes()?;
        self.db.insert(key.as_bytes(), value)?;
        Ok(())
    }

    /// Drop a persisted entry (used when a stored record no longer
    /// verifies).
    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.db.remove(key.as_bytes())?;
        Ok(())
    }

    /// Iterate every stored (key, envelope) pair; the warm-load boot path.
    pub fn scan(&self) -> impl Iterator<Item = Result<(String, Envelope), StorageError>> + '_ {
        self.db
            .iter()
            .filter(|item| match item {
                Ok((key, _)) => key.as_ref() != NODES_KEY.as_bytes(),
                Err(_) => true,
            })
            .map(|item| {
                let (key, bytes) = item?;
                let envelope = Envelope::from_bytes(&bytes)?;
                Ok((String::from_utf8_lossy(&key).into_owned(), envelope))
            })
    }

    /// Known node identity domains.
    pub fn node_registry(&self) -> Result<Vec<String>, StorageError> {
        match self.db.get(NODES_KEY.as_bytes())? {
            Some(bytes) => Ok(postcard::from_bytes(&bytes)
                .map_err(trustmesh_core::Error::Serialization)?),
            None => Ok(Vec::new()),
        }
    }

    /// Replace the node registry.
    pub fn put_node_registry(&self, domains: &[String]) -> Result<(), StorageError> {
        let value =
            postcard::to_allocvec(domains).map_err(trustmesh_core::Error::Serialization)?;
        self.db.insert(NODES_KEY.as_bytes(), value)?;
        Ok(())
    }

    /// Flush all pending writes
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
