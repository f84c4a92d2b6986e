//! TrustMesh Core Library
//!
//! Core types, canonical encoding, and signed records for the TrustMesh
//! overlay-network control plane.
//!
//! # Modules
//!
//! - [`domain`]: Hierarchical domain names and trust-chain construction
//! - [`record`]: Record trait and the Auth/Node/Peer variants
//! - [`envelope`]: Wire/persistence wrapper and the type registry
//! - [`canonical`]: Deterministic serialization for signing
//! - [`keys`]: Ed25519 key parsing, generation, sign/verify
//! - [`error`]: Error types

pub mod canonical;
pub mod domain;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod record;

pub use domain::Domain;
pub use envelope::Envelope;
pub use error::{Error, Result};
pub use keys::KeyPair;
pub use record::{now_nanos, AnyRecord, AuthRecord, NodeRecord, PeerRecord, Record};
