//! Attestation of deployment transactions
//!
//! Before a deployment transaction can be submitted to the ledger it must
//! carry an attestation bound to its digest. Producing one is the slowest
//! step of the pipeline and needs a one-time, per-network-class setup.
//!
//! [`Prover`] is the seam for the proving system. [`WorkProver`] is the
//! built-in implementation: a SHA-256 hash chain keyed by a setup seed,
//! whose cost scales with the configured number of rounds.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

use crate::crypto::{decode_digest, encode_digest, tagged_hash, Digest};
use crate::error::{CoreError, Result};
use crate::types::NetworkClass;

/// Default number of hash rounds per attestation
pub const DEFAULT_ROUNDS: u32 = 200_000;

/// How many times more expensive setup is than a single proof
const SETUP_FACTOR: u32 = 4;

const SETUP_TAG: &[u8] = b"poolforge/attestation/setup";
const PROVE_TAG: &[u8] = b"poolforge/attestation/prove";
const ROUND_TAG: &[u8] = b"poolforge/attestation/round";

/// Output of the one-time setup for a network class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvingKey {
    pub class: NetworkClass,
    pub rounds: u32,
    seed: Digest,
}

impl ProvingKey {
    /// Identifier of this key, embedded in attestations
    pub fn key_id(&self) -> String {
        encode_digest(&tagged_hash(SETUP_TAG, &[&self.seed]))
    }
}

/// Attestation bound to a statement digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    pub network_class: NetworkClass,
    pub key_id: String,
    pub rounds: u32,
    /// Digest of the attested statement, base64
    pub statement: String,
    /// Proof value, base64
    pub proof: String,
}

/// Proving system used by the deployment worker
pub trait Prover: Send + Sync {
    /// One-time expensive setup for a network class
    fn setup(&self, class: NetworkClass) -> Result<ProvingKey>;

    /// Attest a statement digest
    fn prove(&self, key: &ProvingKey, statement: &Digest) -> Result<Attestation>;

    /// Check an attestation against a statement
    fn verify(&self, key: &ProvingKey, attestation: &Attestation, statement: &Digest) -> Result<()>;
}

/// Hash-chain prover
#[derive(Debug, Clone)]
pub struct WorkProver {
    rounds: u32,
}

impl WorkProver {
    pub fn new(rounds: u32) -> Self {
        Self {
            rounds: rounds.max(1),
        }
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    fn chain(start: Digest, rounds: u32) -> Digest {
        let mut acc = start;
        for _ in 0..rounds {
            acc = tagged_hash(ROUND_TAG, &[&acc]);
        }
        acc
    }

    fn evaluate(key: &ProvingKey, statement: &Digest) -> Digest {
        let start = tagged_hash(
            PROVE_TAG,
            &[&key.seed, key.class.as_str().as_bytes(), statement],
        );
        Self::chain(start, key.rounds)
    }
}

impl Default for WorkProver {
    fn default() -> Self {
        Self::new(DEFAULT_ROUNDS)
    }
}

impl Prover for WorkProver {
    fn setup(&self, class: NetworkClass) -> Result<ProvingKey> {
        let started = Instant::now();
        let start = tagged_hash(SETUP_TAG, &[class.as_str().as_bytes()]);
        let seed = Self::chain(start, self.rounds.saturating_mul(SETUP_FACTOR));

        info!(
            class = %class,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Attestation setup complete"
        );

        Ok(ProvingKey {
            class,
            rounds: self.rounds,
            seed,
        })
    }

    fn prove(&self, key: &ProvingKey, statement: &Digest) -> Result<Attestation> {
        let started = Instant::now();
        let proof = Self::evaluate(key, statement);

        debug!(
            class = %key.class,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Produced attestation"
        );

        Ok(Attestation {
            network_class: key.class,
            key_id: key.key_id(),
            rounds: key.rounds,
            statement: encode_digest(statement),
            proof: encode_digest(&proof),
        })
    }

    fn verify(&self, key: &ProvingKey, attestation: &Attestation, statement: &Digest) -> Result<()> {
        if attestation.network_class != key.class || attestation.key_id != key.key_id() {
            return Err(CoreError::Authorization(
                "Attestation was produced with a different proving key".into(),
            ));
        }
        if attestation.rounds != key.rounds {
            return Err(CoreError::Authorization("Attestation round count mismatch".into()));
        }
        if &decode_digest(&attestation.statement)? != statement {
            return Err(CoreError::Authorization(
                "Attestation is bound to a different statement".into(),
            ));
        }
        if decode_digest(&attestation.proof)? != Self::evaluate(key, statement) {
            return Err(CoreError::Authorization("Attestation proof is invalid".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prove_and_verify() {
        let prover = WorkProver::new(64);
        let key = prover.setup(NetworkClass::Testnet).unwrap();
        let statement = tagged_hash(b"test", &[b"tx"]);

        let attestation = prover.prove(&key, &statement).unwrap();
        prover.verify(&key, &attestation, &statement).unwrap();
    }

    #[test]
    fn test_setup_is_deterministic_per_class() {
        let prover = WorkProver::new(16);
        let a = prover.setup(NetworkClass::Mainnet).unwrap();
        let b = prover.setup(NetworkClass::Mainnet).unwrap();
        let c = prover.setup(NetworkClass::Testnet).unwrap();

        assert_eq!(a, b);
        assert_ne!(a.key_id(), c.key_id());
    }

    #[test]
    fn test_attestation_bound_to_statement() {
        let prover = WorkProver::new(16);
        let key = prover.setup(NetworkClass::Testnet).unwrap();
        let attestation = prover.prove(&key, &[1u8; 32]).unwrap();

        assert!(prover.verify(&key, &attestation, &[2u8; 32]).is_err());
    }

    #[test]
    fn test_attestation_bound_to_network_class() {
        let prover = WorkProver::new(16);
        let testnet = prover.setup(NetworkClass::Testnet).unwrap();
        let mainnet = prover.setup(NetworkClass::Mainnet).unwrap();
        let attestation = prover.prove(&testnet, &[7u8; 32]).unwrap();

        assert!(prover.verify(&mainnet, &attestation, &[7u8; 32]).is_err());
    }
}
