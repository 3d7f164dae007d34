// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Node signing identity (ed25519).
//!
//! Holds key material only; reading and writing key files is the node's job.

use core::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::canonical::short_digest_upper;
use crate::config::{NODE_ID_HEX_LEN, NODE_ID_PREFIX};
use crate::error::{KernelError, KernelResult};

pub struct NodeIdentity {
    signing_key: SigningKey,
    node_id: String,
}

impl NodeIdentity {
    /// Fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    pub fn from_secret_bytes(secret: [u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(&secret))
    }

    pub fn from_secret_hex(secret_hex: &str) -> KernelResult<Self> {
        let bytes = hex::decode(secret_hex.trim()).map_err(|e| KernelError::InvalidKey(e.to_string()))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| KernelError::InvalidKey(format!("expected 32 secret bytes, got {}", b.len())))?;
        Ok(Self::from_secret_bytes(secret))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let node_id = derive_node_id(&signing_key.verifying_key());
        Self { signing_key, node_id }
    }

    /// Hex signature over `bytes`.
    pub fn sign(&self, bytes: &[u8]) -> String {
        hex::encode(self.signing_key.sign(bytes).to_bytes())
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Hex-encoded public key.
    pub fn public_key(&self) -> String {
        hex::encode(self.signing_key.verifying_key().as_bytes())
    }

    /// Hex-encoded secret key. Only key generation should need this.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("node_id", &self.node_id)
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// `NODE-` + first hex chars of digest(public key bytes), uppercased.
pub fn derive_node_id(public_key: &VerifyingKey) -> String {
    format!("{}{}", NODE_ID_PREFIX, short_digest_upper(public_key.as_bytes(), NODE_ID_HEX_LEN))
}

/// Node id for a hex-encoded public key.
pub fn node_id_for_public_key(public_key_hex: &str) -> KernelResult<String> {
    Ok(derive_node_id(&parse_public_key(public_key_hex)?))
}

fn parse_public_key(public_key_hex: &str) -> KernelResult<VerifyingKey> {
    let bytes = hex::decode(public_key_hex.trim()).map_err(|e| KernelError::InvalidKey(e.to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| KernelError::InvalidKey(format!("expected 32 public key bytes, got {}", b.len())))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| KernelError::InvalidKey(e.to_string()))
}

/// Check a hex signature against a hex public key.
///
/// `Ok(false)` means well-formed inputs that do not verify; malformed key or
/// signature encodings are errors.
pub fn verify_hex(public_key_hex: &str, message: &[u8], signature_hex: &str) -> KernelResult<bool> {
    let key = parse_public_key(public_key_hex)?;
    let sig_bytes = hex::decode(signature_hex.trim()).map_err(|e| KernelError::InvalidKey(e.to_string()))?;
    let signature = Signature::from_slice(&sig_bytes).map_err(|e| KernelError::InvalidKey(e.to_string()))?;
    Ok(key.verify(message, &signature).is_ok())
}
