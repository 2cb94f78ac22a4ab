//! Key Registry for the deployment server
//!
//! Holds the private keys of operators that this server signs for:
//! - Authorizing signers, optionally pinned per network
//! - Any other held key, used for multisig approvals
//!
//! Public halves of all operators live in storage; only keys the server
//! can actually sign with are registered here.

use poolforge_core::{CoreError, KeyPair, PublicKey};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Network entry that applies when no network-specific authorizer is set
pub const DEFAULT_NETWORK: &str = "*";

/// Thread-safe registry of signing keys held by the server
#[derive(Debug, Default)]
pub struct KeyRegistry {
    /// Held signing keys by public key
    signing_keys: RwLock<HashMap<PublicKey, Arc<KeyPair>>>,

    /// Preferred authorizer per network
    authorizers: RwLock<HashMap<String, PublicKey>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `network=base64secret` entries separated by commas
    pub fn from_config(entries: &str) -> Result<Self, CoreError> {
        let registry = Self::new();
        for entry in entries.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (network, secret) = entry.split_once('=').ok_or_else(|| {
                CoreError::Validation(format!("Authorizer entry '{}' must be network=secret", entry))
            })?;
            let key = KeyPair::from_base64(secret.trim())?;
            registry.set_authorizer(network.trim(), key);
        }
        Ok(registry)
    }

    // =========================================================================
    // Held keys
    // =========================================================================

    /// Register a key the server may sign with
    pub fn insert_key(&self, key: KeyPair) -> PublicKey {
        let public_key = key.public_key();
        let mut keys = self.signing_keys.write().unwrap();
        keys.insert(public_key, Arc::new(key));
        info!(public_key = %public_key, "Registered signing key");
        public_key
    }

    pub fn signing_key(&self, public_key: &PublicKey) -> Option<Arc<KeyPair>> {
        let keys = self.signing_keys.read().unwrap();
        keys.get(public_key).cloned()
    }

    pub fn holds(&self, public_key: &PublicKey) -> bool {
        let keys = self.signing_keys.read().unwrap();
        keys.contains_key(public_key)
    }

    pub fn key_count(&self) -> usize {
        let keys = self.signing_keys.read().unwrap();
        keys.len()
    }

    // =========================================================================
    // Authorizers
    // =========================================================================

    /// Register `key` and pin it as the authorizer for `network`
    pub fn set_authorizer(&self, network: &str, key: KeyPair) -> PublicKey {
        let public_key = self.insert_key(key);
        let mut authorizers = self.authorizers.write().unwrap();
        authorizers.insert(network.to_string(), public_key);
        info!(network = %network, public_key = %public_key, "Pinned network authorizer");
        public_key
    }

    /// Pinned authorizer for a network, falling back to the default entry
    pub fn authorizer_for(&self, network: &str) -> Option<PublicKey> {
        let authorizers = self.authorizers.read().unwrap();
        authorizers
            .get(network)
            .or_else(|| authorizers.get(DEFAULT_NETWORK))
            .copied()
    }
}
