//! Canonical encoding for TrustMesh records
//!
//! All signed objects use postcard serialization with field order fixed by
//! Rust struct order. Repeated/keyed fields must use ordered containers
//! (`BTreeMap`) so the encoding is deterministic; signing and verifying
//! must operate on identical bytes.

use crate::error::{Error, Result};
use serde::Serialize;

/// Serialize a value to canonical bytes using postcard.
///
/// This is the normative encoding for all signing operations and for the
/// envelope wire/persistence form.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(value).map_err(Error::from)
}
