//! Error types for TrustMesh

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// TrustMesh core error types
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    /// Unknown envelope type tag
    #[error("unknown record tag: {0}")]
    UnknownTag(String),

    /// Key material failed to parse
    #[error("invalid key: {0}")]
    InvalidKey(String),
}
