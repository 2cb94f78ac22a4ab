//! Multisig upgrade approvals
//!
//! A full-rights signer approves an upgrader by signing the canonical
//! approval message. Stored approvals are attached to later deployment
//! transactions while their deadline slot has not passed.

use serde::{Deserialize, Serialize};

use crate::crypto::{decode_digest, tagged_hash, Digest, KeyPair, PublicKey};
use crate::error::{CoreError, Result};

const APPROVAL_TAG: &[u8] = b"poolforge/multisig/approval";

/// Message a signer signs to approve an upgrader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeApproval {
    pub network: String,
    pub approved_upgrader: PublicKey,
    /// Base64 digest of the message being approved
    pub message_hash: String,
    /// Last ledger slot at which the approval is valid
    pub deadline_slot: u64,
}

impl UpgradeApproval {
    pub fn new(
        network: impl Into<String>,
        approved_upgrader: PublicKey,
        message_hash: impl Into<String>,
        deadline_slot: u64,
    ) -> Result<Self> {
        let approval = Self {
            network: network.into(),
            approved_upgrader,
            message_hash: message_hash.into(),
            deadline_slot,
        };
        decode_digest(&approval.message_hash).map_err(|_| {
            CoreError::Validation("messageHash must be a base64 32-byte digest".into())
        })?;
        Ok(approval)
    }

    /// Canonical digest that gets signed
    pub fn digest(&self) -> Result<Digest> {
        let message_hash = decode_digest(&self.message_hash)?;
        Ok(tagged_hash(
            APPROVAL_TAG,
            &[
                self.network.as_bytes(),
                &[0u8],
                &self.approved_upgrader.to_bytes(),
                &message_hash,
                &self.deadline_slot.to_be_bytes(),
            ],
        ))
    }

    pub fn sign(&self, signer: &KeyPair) -> Result<SignedApproval> {
        let signature = signer.sign_base64(&self.digest()?);
        Ok(SignedApproval {
            signer: signer.public_key(),
            approval: self.clone(),
            signature,
        })
    }

    /// Whether the approval is still usable at `slot`
    pub fn is_live_at(&self, slot: u64) -> bool {
        slot <= self.deadline_slot
    }
}

/// Approval with the approving signer's signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedApproval {
    pub signer: PublicKey,
    pub approval: UpgradeApproval,
    pub signature: String,
}

impl SignedApproval {
    pub fn verify(&self) -> Result<()> {
        self.signer
            .verify_base64(&self.approval.digest()?, &self.signature)
    }
}
