//! Ed25519 key handling
//!
//! Keys travel as base64-encoded raw bytes in configuration files, CLI
//! output, and trust assertions.

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

/// Ed25519 keypair for signing and identity
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Create from seed bytes (for deterministic testing)
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Parse a base64-encoded raw private key.
    ///
    /// Accepts a bare 32-byte seed or the 64-byte seed||public
    /// concatenation; both raw forms circulate in existing configs.
    pub fn parse(b64: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(b64.trim())
            .map_err(|e| Error::InvalidKey(e.to_string()))?;
        if bytes.len() != 32 && bytes.len() != 64 {
            return Err(Error::InvalidKey(format!(
                "expected 32 or 64 key bytes, got {}",
                bytes.len()
            )));
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes[..32]);
        Ok(Self::from_seed(&seed))
    }

    /// Get the public key bytes
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Get the verifying key
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Base64 form of the public key, as carried in trust assertions.
    pub fn public_b64(&self) -> String {
        BASE64.encode(self.public_key())
    }

    /// Base64 form of the full 64-byte private key (seed||public).
    pub fn private_b64(&self) -> String {
        BASE64.encode(self.signing_key.to_keypair_bytes())
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_vec()
    }
}

/// Parse a base64-encoded raw public key.
pub fn parse_public(b64: &str) -> Result<VerifyingKey> {
    let bytes = BASE64
        .decode(b64.trim())
        .map_err(|e| Error::InvalidKey(e.to_string()))?;
    let raw: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::InvalidKey(format!("expected 32 key bytes, got {}", bytes.len())))?;
    VerifyingKey::from_bytes(&raw).map_err(|e| Error::InvalidKey(e.to_string()))
}

/// Verify `signature` over `message` with `key`.
pub fn verify(key: &VerifyingKey, message: &[u8], signature: &[u8]) -> bool {
    let Ok(sig) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(message, &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let kp = KeyPair::generate();
        let msg = b"hello world";
        let sig = kp.sign(msg);

        assert!(verify(&kp.verifying_key(), msg, &sig));
        assert!(!verify(&kp.verifying_key(), b"other message", &sig));
    }

    #[test]
    fn test_parse_roundtrip() {
        let kp = KeyPair::from_seed(&[7u8; 32]);

        let parsed = KeyPair::parse(&kp.private_b64()).unwrap();
        assert_eq!(parsed.public_key(), kp.public_key());

        let public = parse_public(&kp.public_b64()).unwrap();
        assert_eq!(public.to_bytes(), kp.public_key());
    }

    #[test]
    fn test_parse_bare_seed() {
        let seed = [9u8; 32];
        let b64 = BASE64.encode(seed);
        let kp = KeyPair::parse(&b64).unwrap();
        assert_eq!(kp.public_key(), KeyPair::from_seed(&seed).public_key());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(KeyPair::parse("not base64!").is_err());
        assert!(KeyPair::parse(&BASE64.encode([0u8; 16])).is_err());
        assert!(parse_public(&BASE64.encode([0u8; 16])).is_err());
    }

    #[test]
    fn test_verify_rejects_malformed_signature() {
        let kp = KeyPair::generate();
        assert!(!verify(&kp.verifying_key(), b"msg", &[0u8; 3]));
    }
}
