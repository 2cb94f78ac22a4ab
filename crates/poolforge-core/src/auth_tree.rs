//! Authorization tree over signer grants
//!
//! A sparse binary Merkle structure keyed by `H(signer public key)` with leaf
//! values `H(permission bitmask)`. The root is baked into every deployment
//! transaction and checked on-ledger; the witness proves that one signer's
//! grant is part of that root.
//!
//! The tree is a map, not a list: the root depends only on the set of
//! (public key, permissions) pairs, never on the order they were supplied.
//!
//! Layout:
//! - an empty subtree hashes to [`EMPTY_DIGEST`]
//! - a subtree holding one leaf collapses to that leaf's hash
//! - otherwise a node hashes its two children, split on the next key bit

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crypto::{decode_digest, encode_digest, tagged_hash, Digest, PublicKey};
use crate::error::{CoreError, Result};
use crate::types::Permissions;

/// Digest of an empty subtree
pub const EMPTY_DIGEST: Digest = [0u8; 32];

/// Bits in a leaf key, and so the deepest possible witness
pub const MAX_DEPTH: usize = 256;

const LEAF_KEY_TAG: &[u8] = b"poolforge/auth-tree/key";
const LEAF_VALUE_TAG: &[u8] = b"poolforge/auth-tree/value";
const LEAF_NODE_TAG: &[u8] = b"poolforge/auth-tree/leaf";
const INNER_NODE_TAG: &[u8] = b"poolforge/auth-tree/node";

/// Leaf key for a signer
pub fn leaf_key(public_key: &PublicKey) -> Digest {
    tagged_hash(LEAF_KEY_TAG, &[&public_key.to_bytes()])
}

/// Leaf value for a permission bitmask
pub fn leaf_value(permissions: Permissions) -> Digest {
    tagged_hash(LEAF_VALUE_TAG, &[&permissions.bits().to_be_bytes()])
}

fn leaf_hash(key: &Digest, value: &Digest) -> Digest {
    tagged_hash(LEAF_NODE_TAG, &[key, value])
}

fn inner_hash(left: &Digest, right: &Digest) -> Digest {
    if left == &EMPTY_DIGEST && right == &EMPTY_DIGEST {
        return EMPTY_DIGEST;
    }
    tagged_hash(INNER_NODE_TAG, &[left, right])
}

/// Bit `depth` of a key, most significant first
fn bit(key: &Digest, depth: usize) -> bool {
    (key[depth / 8] >> (7 - depth % 8)) & 1 == 1
}

#[derive(Debug, Clone)]
struct Leaf {
    public_key: PublicKey,
    permissions: Permissions,
    value: Digest,
}

/// Authorization tree for one network
#[derive(Debug, Clone)]
pub struct AuthorizationTree {
    leaves: BTreeMap<Digest, Leaf>,
    root: Digest,
}

impl AuthorizationTree {
    /// Build a tree from active grants.
    ///
    /// A signer listed twice gets the union of its bitmasks, so the result
    /// stays independent of input order.
    pub fn from_grants<I>(grants: I) -> Self
    where
        I: IntoIterator<Item = (PublicKey, Permissions)>,
    {
        let mut merged: BTreeMap<Digest, (PublicKey, Permissions)> = BTreeMap::new();
        for (public_key, permissions) in grants {
            merged
                .entry(leaf_key(&public_key))
                .and_modify(|(_, existing)| *existing = existing.union(permissions))
                .or_insert((public_key, permissions));
        }

        let leaves: BTreeMap<Digest, Leaf> = merged
            .into_iter()
            .map(|(key, (public_key, permissions))| {
                (
                    key,
                    Leaf {
                        public_key,
                        permissions,
                        value: leaf_value(permissions),
                    },
                )
            })
            .collect();

        let entries: Vec<(Digest, Digest)> =
            leaves.iter().map(|(k, leaf)| (*k, leaf.value)).collect();
        let root = subtree_root(&entries, 0);

        Self { leaves, root }
    }

    pub fn root(&self) -> Digest {
        self.root
    }

    /// Root as base64 text
    pub fn root_base64(&self) -> String {
        encode_digest(&self.root)
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Permissions granted to a signer, if it is in the tree
    pub fn permissions(&self, public_key: &PublicKey) -> Option<Permissions> {
        self.leaves.get(&leaf_key(public_key)).map(|l| l.permissions)
    }

    /// Signers holding the full permission bitmask, ordered by leaf key
    pub fn full_rights_signers(&self) -> Vec<PublicKey> {
        self.leaves
            .values()
            .filter(|l| l.permissions.is_full())
            .map(|l| l.public_key)
            .collect()
    }

    /// Produce the membership witness for a signer
    pub fn witness(&self, public_key: &PublicKey) -> Result<TreeWitness> {
        let key = leaf_key(public_key);
        let leaf = self.leaves.get(&key).ok_or_else(|| {
            CoreError::Authorization(format!("Signer {} is not in the authorization tree", public_key))
        })?;

        let entries: Vec<(Digest, Digest)> =
            self.leaves.iter().map(|(k, l)| (*k, l.value)).collect();

        let mut siblings = Vec::new();
        let mut slice: &[(Digest, Digest)] = &entries;
        let mut depth = 0;
        while slice.len() > 1 {
            let split = slice.partition_point(|(k, _)| !bit(k, depth));
            let (left, right) = slice.split_at(split);
            if bit(&key, depth) {
                siblings.push(encode_digest(&subtree_root(left, depth + 1)));
                slice = right;
            } else {
                siblings.push(encode_digest(&subtree_root(right, depth + 1)));
                slice = left;
            }
            depth += 1;
        }

        Ok(TreeWitness {
            public_key: *public_key,
            permissions: leaf.permissions,
            siblings,
        })
    }
}

fn subtree_root(entries: &[(Digest, Digest)], depth: usize) -> Digest {
    match entries {
        [] => EMPTY_DIGEST,
        [(key, value)] => leaf_hash(key, value),
        _ => {
            let split = entries.partition_point(|(k, _)| !bit(k, depth));
            let (left, right) = entries.split_at(split);
            inner_hash(
                &subtree_root(left, depth + 1),
                &subtree_root(right, depth + 1),
            )
        }
    }
}

/// Proof that a signer's grant is part of an authorization root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeWitness {
    pub public_key: PublicKey,
    pub permissions: Permissions,
    /// Sibling digests from the root downward, base64
    pub siblings: Vec<String>,
}

impl TreeWitness {
    /// Recompute the root implied by this witness
    pub fn compute_root(&self) -> Result<Digest> {
        if self.siblings.len() > MAX_DEPTH {
            return Err(CoreError::Validation(format!(
                "Witness has {} siblings, at most {} allowed",
                self.siblings.len(),
                MAX_DEPTH
            )));
        }

        let key = leaf_key(&self.public_key);
        let mut node = leaf_hash(&key, &leaf_value(self.permissions));
        for (depth, sibling) in self.siblings.iter().enumerate().rev() {
            let sibling = decode_digest(sibling)?;
            node = if bit(&key, depth) {
                inner_hash(&sibling, &node)
            } else {
                inner_hash(&node, &sibling)
            };
        }
        Ok(node)
    }

    /// Check the witness against an expected root
    pub fn verify(&self, root: &Digest) -> Result<()> {
        if &self.compute_root()? != root {
            return Err(CoreError::Authorization(format!(
                "Witness for {} does not match authorization root",
                self.public_key
            )));
        }
        Ok(())
    }
}
