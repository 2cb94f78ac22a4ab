//! Deployment transactions
//!
//! A deployment is assembled unsigned, signed by both the new resource key
//! and the authorizing signer, then attested. The finished transaction
//! travels to the client as `transactionPayload`: base64 of its JSON form.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::attestation::{Attestation, Prover, ProvingKey};
use crate::auth_tree::TreeWitness;
use crate::crypto::{decode_digest, encode_digest, tagged_hash, Digest, KeyPair, PublicKey};
use crate::error::{CoreError, Result};
use crate::multisig::SignedApproval;
use crate::types::{ResourceKind, ResourceParams};

const DEPLOYMENT_TAG: &[u8] = b"poolforge/deployment";

/// Transaction body covered by the signatures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedDeployment {
    pub kind: ResourceKind,
    pub network: String,
    pub requester: String,
    pub resource_public_key: PublicKey,
    pub params: ResourceParams,
    /// Authorization root the ledger checks, base64
    pub auth_root: String,
    pub authorizer: PublicKey,
    pub witness: TreeWitness,
    #[serde(default)]
    pub approvals: Vec<SignedApproval>,
}

impl UnsignedDeployment {
    /// Canonical digest of the body
    pub fn digest(&self) -> Result<Digest> {
        let bytes = serde_json::to_vec(self)?;
        Ok(tagged_hash(DEPLOYMENT_TAG, &[&bytes]))
    }

    /// Check the witness and authorizer rights against the embedded root
    pub fn check_authorization(&self) -> Result<()> {
        if self.witness.public_key != self.authorizer {
            return Err(CoreError::Authorization(
                "Witness does not belong to the authorizing signer".into(),
            ));
        }
        if !self.witness.permissions.contains(self.kind.required_permission()) {
            return Err(CoreError::Authorization(format!(
                "Signer {} may not deploy a {}",
                self.authorizer, self.kind
            )));
        }
        self.witness.verify(&decode_digest(&self.auth_root)?)?;
        for approval in &self.approvals {
            approval.verify()?;
        }
        Ok(())
    }

    /// Sign with the resource key and the authorizing signer's key
    pub fn sign(self, resource: &KeyPair, authorizer: &KeyPair) -> Result<DeploymentTransaction> {
        if resource.public_key() != self.resource_public_key {
            return Err(CoreError::Authorization(
                "Resource key does not match the transaction".into(),
            ));
        }
        if authorizer.public_key() != self.authorizer {
            return Err(CoreError::Authorization(
                "Authorizer key does not match the transaction".into(),
            ));
        }
        self.check_authorization()?;

        let digest = self.digest()?;
        Ok(DeploymentTransaction {
            resource_signature: resource.sign_base64(&digest),
            authorizer_signature: authorizer.sign_base64(&digest),
            body: self,
            attestation: None,
        })
    }
}

/// Signed (and eventually attested) deployment transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentTransaction {
    pub body: UnsignedDeployment,
    pub resource_signature: String,
    pub authorizer_signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<Attestation>,
}

impl DeploymentTransaction {
    /// Digest of the signed transaction, the statement being attested
    pub fn statement(&self) -> Result<Digest> {
        let body = self.body.digest()?;
        Ok(tagged_hash(
            DEPLOYMENT_TAG,
            &[
                &body,
                self.resource_signature.as_bytes(),
                self.authorizer_signature.as_bytes(),
            ],
        ))
    }

    /// Check both signatures and the authorization witness
    pub fn verify_signatures(&self) -> Result<()> {
        self.body.check_authorization()?;
        let digest = self.body.digest()?;
        self.body
            .resource_public_key
            .verify_base64(&digest, &self.resource_signature)?;
        self.body
            .authorizer
            .verify_base64(&digest, &self.authorizer_signature)
    }

    /// Attach an attestation produced by `prover`
    pub fn attest(mut self, prover: &dyn Prover, key: &ProvingKey) -> Result<Self> {
        let statement = self.statement()?;
        self.attestation = Some(prover.prove(key, &statement)?);
        Ok(self)
    }

    /// Check signatures and the attestation
    pub fn verify(&self, prover: &dyn Prover, key: &ProvingKey) -> Result<()> {
        self.verify_signatures()?;
        let attestation = self
            .attestation
            .as_ref()
            .ok_or_else(|| CoreError::Authorization("Transaction is not attested".into()))?;
        prover.verify(key, attestation, &self.statement()?)
    }

    /// Encode as a `transactionPayload` string
    pub fn to_payload(&self) -> Result<String> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }

    /// Decode a `transactionPayload` string
    pub fn from_payload(payload: &str) -> Result<Self> {
        let bytes = STANDARD.decode(payload)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Short printable id of the transaction
    pub fn id(&self) -> Result<String> {
        Ok(encode_digest(&self.statement()?))
    }
}
