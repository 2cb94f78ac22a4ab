//! Key material for signers and deployed resources
//!
//! Every party is identified by an Ed25519 key. The same key is used for
//! signing deployment transactions and, through its X25519 equivalent, as
//! the recipient of custody shares.
//!
//! Key types:
//! - `KeyPair`: Ed25519 signing key with its public half
//! - `PublicKey`: Ed25519 verifying key, printed as base64 "address"

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// 32-byte SHA-256 digest
pub type Digest = [u8; 32];

/// SHA-256 over a domain tag followed by the given parts
pub fn tagged_hash(tag: &[u8], parts: &[&[u8]]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update((tag.len() as u32).to_be_bytes());
    hasher.update(tag);
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Base64 text form of a digest
pub fn encode_digest(digest: &Digest) -> String {
    STANDARD.encode(digest)
}

/// Parse a base64 digest
pub fn decode_digest(s: &str) -> Result<Digest> {
    let bytes = STANDARD.decode(s)?;
    bytes
        .try_into()
        .map_err(|_| CoreError::Validation("Digest must be 32 bytes".into()))
}

/// Ed25519 key pair
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key().to_base64())
            .field("secret", &"[redacted]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Restore a key pair from its 32-byte secret seed
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(bytes))
    }

    /// Restore a key pair from a base64 secret seed
    pub fn from_base64(secret: &str) -> Result<Self> {
        let bytes = STANDARD.decode(secret.trim())?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::Validation("Secret key must be 32 bytes".into()))?;
        Ok(Self::from_bytes(&bytes))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.verifying_key,
        }
    }

    /// Raw secret seed. Only custody splitting should ever read this.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }

    /// Sign a message and encode the signature as base64
    pub fn sign_base64(&self, message: &[u8]) -> String {
        STANDARD.encode(self.sign(message))
    }

    /// X25519 static secret equivalent to this signing key
    pub(crate) fn x25519_secret(&self) -> x25519_dalek::StaticSecret {
        x25519_dalek::StaticSecret::from(self.signing_key.to_scalar_bytes())
    }
}

/// Ed25519 public key
#[derive(Clone, Copy)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.verifying_key.as_bytes() == other.verifying_key.as_bytes()
    }
}

impl Eq for PublicKey {}

impl std::hash::Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.verifying_key.as_bytes().hash(state);
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.verifying_key.as_bytes().cmp(other.verifying_key.as_bytes())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.to_base64()).finish()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl PublicKey {
    /// Parse raw public key bytes, rejecting points that are not on the curve
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes)
            .map_err(|e| CoreError::Validation(format!("Invalid public key: {}", e)))?;
        Ok(Self { verifying_key })
    }

    /// Parse a base64 address
    pub fn from_base64(address: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(address.trim())
            .map_err(|e| CoreError::Validation(format!("Malformed address '{}': {}", address, e)))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            CoreError::Validation(format!("Malformed address '{}': expected 32 bytes", address))
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    /// Verify a signature over a message
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let signature_bytes: [u8; 64] = signature
            .try_into()
            .map_err(|_| CoreError::Authorization("Invalid signature length".into()))?;
        let signature = Signature::from_bytes(&signature_bytes);
        self.verifying_key
            .verify(message, &signature)
            .map_err(|e| CoreError::Authorization(format!("Signature rejected: {}", e)))
    }

    /// Verify a base64 signature over a message
    pub fn verify_base64(&self, message: &[u8], signature: &str) -> Result<()> {
        let bytes = STANDARD
            .decode(signature)
            .map_err(|e| CoreError::Authorization(format!("Invalid signature encoding: {}", e)))?;
        self.verify(message, &bytes)
    }

    /// X25519 public key equivalent to this Ed25519 key
    pub(crate) fn x25519_public(&self) -> x25519_dalek::PublicKey {
        x25519_dalek::PublicKey::from(self.verifying_key.to_montgomery().to_bytes())
    }
}

impl FromStr for PublicKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_base64(s)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PublicKey::from_base64(&s).map_err(serde::de::Error::custom)
    }
}
