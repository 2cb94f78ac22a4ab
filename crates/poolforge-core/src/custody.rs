//! Threshold custody splitting
//!
//! The private key of a freshly deployed resource is never stored in the
//! clear. For every unordered pair (i, j) of full-rights signers, the key is
//! sealed to signer i and the resulting ciphertext sealed again to signer j.
//! Recovering a share needs both: j opens the outer layer, i the inner one.
//!
//! With n custodians this produces n·(n−1)/2 shares. Any two custodians can
//! recover the key; losing one custodian loses nothing.
//!
//! Each layer is an ECIES seal over X25519: a fresh ephemeral key, HKDF-SHA256
//! over the shared secret, and ChaCha20-Poly1305 with a random nonce that is
//! prefixed to the ciphertext.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};

use crate::crypto::{KeyPair, PublicKey};
use crate::error::{CoreError, Result};

/// Smallest custodian set that still has a recovery pair
pub const MIN_CUSTODIANS: usize = 2;

const HKDF_INFO: &[u8] = b"poolforge/custody/v1";
const NONCE_LEN: usize = 12;

/// A signer eligible to hold custody shares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Custodian {
    pub signer_id: i64,
    pub public_key: PublicKey,
}

/// One pairwise share of a resource key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyShare {
    /// Signer holding the inner layer
    pub signer1_id: i64,
    /// Signer holding the outer layer
    pub signer2_id: i64,
    /// Outer ciphertext (nonce ‖ AEAD output)
    pub ciphertext: Vec<u8>,
    /// Ephemeral X25519 key of the inner layer
    pub ephemeral_public1: [u8; 32],
    /// Ephemeral X25519 key of the outer layer
    pub ephemeral_public2: [u8; 32],
}

/// Output of a single seal
#[derive(Debug, Clone)]
struct Sealed {
    ephemeral_public: [u8; 32],
    ciphertext: Vec<u8>,
}

fn derive_cipher(shared: &[u8; 32], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> Result<ChaCha20Poly1305> {
    let hk = Hkdf::<Sha256>::new(None, shared);
    let mut info = Vec::with_capacity(HKDF_INFO.len() + 64);
    info.extend_from_slice(HKDF_INFO);
    info.extend_from_slice(ephemeral);
    info.extend_from_slice(recipient);

    let mut okm = [0u8; 32];
    hk.expand(&info, &mut okm)
        .map_err(|e| CoreError::Crypto(format!("Key derivation failed: {}", e)))?;
    Ok(ChaCha20Poly1305::new(Key::from_slice(&okm)))
}

fn seal(plaintext: &[u8], recipient: &PublicKey) -> Result<Sealed> {
    let recipient = recipient.x25519_public();
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral);

    let shared = ephemeral.diffie_hellman(&recipient);
    if !shared.was_contributory() {
        return Err(CoreError::Crypto("Recipient key has low order".into()));
    }

    let cipher = derive_cipher(shared.as_bytes(), ephemeral_public.as_bytes(), recipient.as_bytes())?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let sealed = cipher.encrypt(Nonce::from_slice(&nonce), plaintext)?;

    let mut ciphertext = Vec::with_capacity(NONCE_LEN + sealed.len());
    ciphertext.extend_from_slice(&nonce);
    ciphertext.extend_from_slice(&sealed);

    Ok(Sealed {
        ephemeral_public: ephemeral_public.to_bytes(),
        ciphertext,
    })
}

fn open(ciphertext: &[u8], ephemeral_public: &[u8; 32], recipient: &KeyPair) -> Result<Vec<u8>> {
    if ciphertext.len() < NONCE_LEN {
        return Err(CoreError::Crypto("Ciphertext too short".into()));
    }
    let (nonce, body) = ciphertext.split_at(NONCE_LEN);

    let secret = recipient.x25519_secret();
    let recipient_public = recipient.public_key().x25519_public();
    let shared = secret.diffie_hellman(&X25519PublicKey::from(*ephemeral_public));

    let cipher = derive_cipher(shared.as_bytes(), ephemeral_public, recipient_public.as_bytes())?;
    Ok(cipher.decrypt(Nonce::from_slice(nonce), body)?)
}

/// Split a resource secret across every pair of custodians.
///
/// Custodians are processed in ascending `signer_id` order, so for each share
/// `signer1_id < signer2_id`. Fewer than [`MIN_CUSTODIANS`] is rejected: with a
/// single custodian there is no pair and no collaborative recovery path.
pub fn split_secret(secret: &[u8], custodians: &[Custodian]) -> Result<Vec<KeyShare>> {
    if custodians.len() < MIN_CUSTODIANS {
        return Err(CoreError::InsufficientQuorum {
            required: MIN_CUSTODIANS,
            found: custodians.len(),
        });
    }

    let mut ordered = custodians.to_vec();
    ordered.sort_by_key(|c| c.signer_id);
    ordered.dedup_by_key(|c| c.signer_id);
    if ordered.len() < MIN_CUSTODIANS {
        return Err(CoreError::InsufficientQuorum {
            required: MIN_CUSTODIANS,
            found: ordered.len(),
        });
    }

    let n = ordered.len();
    let mut shares = Vec::with_capacity(share_count(n));
    for i in 0..n {
        for j in (i + 1)..n {
            let inner = seal(secret, &ordered[i].public_key)?;
            let outer = seal(&inner.ciphertext, &ordered[j].public_key)?;
            shares.push(KeyShare {
                signer1_id: ordered[i].signer_id,
                signer2_id: ordered[j].signer_id,
                ciphertext: outer.ciphertext,
                ephemeral_public1: inner.ephemeral_public,
                ephemeral_public2: outer.ephemeral_public,
            });
        }
    }

    debug!(custodians = n, shares = shares.len(), "Split resource secret");
    Ok(shares)
}

/// Number of shares produced for `n` custodians
pub fn share_count(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}

/// Recover the secret from a share with both of its custodians' keys.
///
/// `first` must be the key of `signer1_id`, `second` the key of `signer2_id`.
pub fn recover_secret(share: &KeyShare, first: &KeyPair, second: &KeyPair) -> Result<Vec<u8>> {
    let inner = open(&share.ciphertext, &share.ephemeral_public2, second)?;
    open(&inner, &share.ephemeral_public1, first)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custodians(n: usize) -> (Vec<KeyPair>, Vec<Custodian>) {
        let keys: Vec<KeyPair> = (0..n).map(|_| KeyPair::generate()).collect();
        let custodians = keys
            .iter()
            .enumerate()
            .map(|(i, kp)| Custodian {
                signer_id: i as i64 + 1,
                public_key: kp.public_key(),
            })
            .collect();
        (keys, custodians)
    }

    #[test]
    fn test_share_count() {
        assert_eq!(share_count(0), 0);
        assert_eq!(share_count(1), 0);
        assert_eq!(share_count(2), 1);
        assert_eq!(share_count(4), 6);
    }

    #[test]
    fn test_split_and_recover_every_pair() {
        let (keys, custodians) = custodians(4);
        let resource = KeyPair::generate();
        let secret = resource.secret_bytes();

        let shares = split_secret(&secret, &custodians).unwrap();
        assert_eq!(shares.len(), 6);

        for share in &shares {
            assert!(share.signer1_id < share.signer2_id);
            let first = &keys[(share.signer1_id - 1) as usize];
            let second = &keys[(share.signer2_id - 1) as usize];
            let recovered = recover_secret(share, first, second).unwrap();
            assert_eq!(recovered, secret.to_vec());
        }
    }

    #[test]
    fn test_single_custodian_cannot_recover() {
        let (keys, custodians) = custodians(2);
        let shares = split_secret(b"resource-secret-material-32bytes", &custodians).unwrap();
        let share = &shares[0];

        // Outer layer belongs to signer 2; signer 1 alone cannot open it.
        assert!(recover_secret(share, &keys[0], &keys[0]).is_err());
        // Swapped roles fail too.
        assert!(recover_secret(share, &keys[1], &keys[0]).is_err());
    }

    #[test]
    fn test_outsider_cannot_recover() {
        let (keys, custodians) = custodians(3);
        let outsider = KeyPair::generate();
        let shares = split_secret(b"secret", &custodians).unwrap();

        assert!(recover_secret(&shares[0], &keys[0], &outsider).is_err());
    }

    #[test]
    fn test_rejects_fewer_than_two_custodians() {
        let (_, custodians) = custodians(1);
        let result = split_secret(b"secret", &custodians);
        assert!(matches!(
            result,
            Err(CoreError::InsufficientQuorum { required: 2, found: 1 })
        ));

        assert!(split_secret(b"secret", &[]).is_err());
    }

    #[test]
    fn test_duplicate_custodian_does_not_count_twice() {
        let (_, custodians) = custodians(1);
        let doubled = vec![custodians[0].clone(), custodians[0].clone()];
        assert!(matches!(
            split_secret(b"secret", &doubled),
            Err(CoreError::InsufficientQuorum { found: 1, .. })
        ));
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let (keys, custodians) = custodians(2);
        let mut share = split_secret(b"secret", &custodians).unwrap().remove(0);
        share.ciphertext.truncate(4);
        assert!(recover_secret(&share, &keys[0], &keys[1]).is_err());
    }
}
