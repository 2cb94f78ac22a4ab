//! Property-Based Tests for authorization and custody invariants
//!
//! 1. The authorization root is a pure, order-independent function of the
//!    active (signer, permission) pairs
//! 2. Custody splitting yields n·(n−1)/2 shares, each recoverable by exactly
//!    its two designated signers
//!
//! Uses proptest for property-based testing with arbitrary inputs.

use proptest::prelude::*;
use poolforge_core::{
    auth_tree::AuthorizationTree,
    crypto::KeyPair,
    custody::{recover_secret, share_count, split_secret, Custodian},
    Permissions,
};

fn keypair_from_seed(seed: u8, index: usize) -> KeyPair {
    let mut bytes = [seed; 32];
    bytes[0] = index as u8;
    bytes[1] = (index >> 8) as u8;
    KeyPair::from_bytes(&bytes)
}

// =============================================================================
// Authorization tree determinism
// =============================================================================

proptest! {
    /// Any permutation of the same grants yields the same root
    #[test]
    fn prop_root_is_order_independent(
        seed in any::<u8>(),
        masks in prop::collection::vec(0u16..64, 1..12),
        rotation in 0usize..12,
    ) {
        let grants: Vec<_> = masks
            .iter()
            .enumerate()
            .map(|(i, m)| (keypair_from_seed(seed, i).public_key(), Permissions(*m)))
            .collect();

        let mut shuffled = grants.clone();
        let len = shuffled.len();
        shuffled.rotate_left(rotation % len);
        shuffled.reverse();

        let a = AuthorizationTree::from_grants(grants);
        let b = AuthorizationTree::from_grants(shuffled);
        prop_assert_eq!(a.root(), b.root());
    }

    /// Building twice from the same input is stable, and every member's
    /// witness verifies against the root
    #[test]
    fn prop_root_is_deterministic_and_witnesses_verify(
        seed in any::<u8>(),
        masks in prop::collection::vec(0u16..64, 1..10),
    ) {
        let grants: Vec<_> = masks
            .iter()
            .enumerate()
            .map(|(i, m)| (keypair_from_seed(seed, i).public_key(), Permissions(*m)))
            .collect();

        let a = AuthorizationTree::from_grants(grants.clone());
        let b = AuthorizationTree::from_grants(grants.clone());
        prop_assert_eq!(a.root(), b.root());

        for (pk, _) in &grants {
            let witness = a.witness(pk).expect("member must have a witness");
            prop_assert!(witness.verify(&a.root()).is_ok());
        }
    }

    /// Full-rights signers are exactly those with the full bitmask
    #[test]
    fn prop_full_rights_selection(
        seed in any::<u8>(),
        full_flags in prop::collection::vec(any::<bool>(), 1..10),
    ) {
        let grants: Vec<_> = full_flags
            .iter()
            .enumerate()
            .map(|(i, full)| {
                let perms = if *full { Permissions::FULL } else { Permissions::DEPLOY_POOL };
                (keypair_from_seed(seed, i).public_key(), perms)
            })
            .collect();

        let tree = AuthorizationTree::from_grants(grants);
        let expected = full_flags.iter().filter(|f| **f).count();
        prop_assert_eq!(tree.full_rights_signers().len(), expected);
    }
}

// =============================================================================
// Custody splitting
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// n custodians produce n·(n−1)/2 shares and each share round-trips
    #[test]
    fn prop_split_count_and_roundtrip(
        n in 2usize..6,
        secret in prop::array::uniform32(any::<u8>()),
        seed in any::<u8>(),
    ) {
        let keys: Vec<KeyPair> = (0..n).map(|i| keypair_from_seed(seed, i)).collect();
        let custodians: Vec<Custodian> = keys
            .iter()
            .enumerate()
            .map(|(i, kp)| Custodian { signer_id: i as i64 + 10, public_key: kp.public_key() })
            .collect();

        let shares = split_secret(&secret, &custodians).expect("split should succeed");
        prop_assert_eq!(shares.len(), share_count(n));
        prop_assert_eq!(shares.len(), n * (n - 1) / 2);

        for share in &shares {
            let first = &keys[(share.signer1_id - 10) as usize];
            let second = &keys[(share.signer2_id - 10) as usize];
            let recovered = recover_secret(share, first, second).expect("pair must recover");
            prop_assert_eq!(recovered, secret.to_vec());
        }
    }
}
