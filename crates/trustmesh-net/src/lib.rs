//! Networking primitives for the TrustMesh control plane
//!
//! This crate provides:
//! - Stable peer identity derived from the transport public key
//! - Length-prefixed message framing
//! - The TCP gossip transport carrying serialized envelopes on a single
//!   shared broadcast channel

pub mod framing;
pub mod peer;
pub mod transport;

pub use framing::{Frame, FrameCodec, FrameType};
pub use peer::PeerId;
pub use transport::{GossipFrame, Transport, TransportError, CHANNEL};
