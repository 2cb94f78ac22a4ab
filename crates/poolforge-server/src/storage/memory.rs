//! In-memory storage backend
//!
//! Default storage implementation using in-memory maps behind one lock, so
//! multi-row writes are atomic. Suitable for development and tests.
//! Data is lost on restart.

use async_trait::async_trait;
use chrono::Utc;
use poolforge_core::{KeyShare, PublicKey, ResourceStatus};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

use super::{
    ConfirmOutcome, GrantRecord, MultisigRecord, NewMultisig, NewResource, ResourceRecord,
    SignerRecord, StorageError, Store,
};

#[derive(Debug, Default)]
struct Tables {
    signers: HashMap<i64, SignerRecord>,
    grants: HashMap<(i64, String), GrantRecord>,
    resources: HashMap<i64, ResourceRecord>,
    key_shares: HashMap<i64, Vec<KeyShare>>,
    multisig: Vec<MultisigRecord>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory store implementation
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // Signers and grants
    // =========================================================================

    async fn create_signer(&self, public_key: PublicKey) -> Result<SignerRecord, StorageError> {
        let mut tables = self.tables.write().unwrap();
        if tables.signers.values().any(|s| s.public_key == public_key) {
            return Err(StorageError::AlreadyExists(format!("signer {}", public_key)));
        }
        let record = SignerRecord {
            id: tables.next_id(),
            public_key,
            created_at: Utc::now(),
        };
        info!(signer_id = record.id, public_key = %public_key, "Created signer");
        tables.signers.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_signer(&self, id: i64) -> Result<Option<SignerRecord>, StorageError> {
        let tables = self.tables.read().unwrap();
        Ok(tables.signers.get(&id).cloned())
    }

    async fn find_signer(&self, public_key: &PublicKey) -> Result<Option<SignerRecord>, StorageError> {
        let tables = self.tables.read().unwrap();
        Ok(tables
            .signers
            .values()
            .find(|s| &s.public_key == public_key)
            .cloned())
    }

    async fn upsert_grant(&self, grant: GrantRecord) -> Result<GrantRecord, StorageError> {
        let mut tables = self.tables.write().unwrap();
        if !tables.signers.contains_key(&grant.signer_id) {
            return Err(StorageError::NotFound(format!("signer {}", grant.signer_id)));
        }
        info!(
            signer_id = grant.signer_id,
            network = %grant.network,
            permissions = grant.permissions.bits(),
            active = grant.active,
            "Upserting grant"
        );
        tables
            .grants
            .insert((grant.signer_id, grant.network.clone()), grant.clone());
        Ok(grant)
    }

    async fn set_grant_active(
        &self,
        signer_id: i64,
        network: &str,
        active: bool,
    ) -> Result<bool, StorageError> {
        let mut tables = self.tables.write().unwrap();
        match tables.grants.get_mut(&(signer_id, network.to_string())) {
            Some(grant) => {
                grant.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn active_grants(
        &self,
        network: &str,
    ) -> Result<Vec<(SignerRecord, GrantRecord)>, StorageError> {
        let tables = self.tables.read().unwrap();
        let mut grants: Vec<_> = tables
            .grants
            .values()
            .filter(|g| g.active && g.network == network)
            .filter_map(|g| {
                tables
                    .signers
                    .get(&g.signer_id)
                    .map(|s| (s.clone(), g.clone()))
            })
            .collect();
        grants.sort_by_key(|(s, _)| s.id);
        Ok(grants)
    }

    // =========================================================================
    // Resources and custody shares
    // =========================================================================

    async fn resource_key_exists(&self, public_key: &PublicKey) -> Result<bool, StorageError> {
        let tables = self.tables.read().unwrap();
        Ok(tables.resources.values().any(|r| &r.public_key == public_key))
    }

    async fn insert_resource_with_shares(
        &self,
        resource: NewResource,
        shares: Vec<KeyShare>,
    ) -> Result<ResourceRecord, StorageError> {
        let mut tables = self.tables.write().unwrap();
        if tables
            .resources
            .values()
            .any(|r| r.public_key == resource.public_key)
        {
            return Err(StorageError::AlreadyExists(format!(
                "resource key {}",
                resource.public_key
            )));
        }
        if tables.resources.values().any(|r| r.job_id == resource.job_id) {
            return Err(StorageError::AlreadyExists(format!(
                "resource for job {}",
                resource.job_id
            )));
        }

        let record = ResourceRecord {
            id: tables.next_id(),
            kind: resource.kind,
            public_key: resource.public_key,
            requester: resource.requester,
            job_id: resource.job_id,
            status: ResourceStatus::Pending,
            network: resource.network,
            params: resource.params,
            transaction_payload: resource.transaction_payload,
            created_at: Utc::now(),
        };

        info!(
            resource_id = record.id,
            job_id = %record.job_id,
            shares = shares.len(),
            "Stored resource with key shares"
        );
        tables.key_shares.insert(record.id, shares);
        tables.resources.insert(record.id, record.clone());
        Ok(record)
    }

    async fn resource_by_job(&self, job_id: &str) -> Result<Option<ResourceRecord>, StorageError> {
        let tables = self.tables.read().unwrap();
        Ok(tables
            .resources
            .values()
            .find(|r| r.job_id == job_id)
            .cloned())
    }

    async fn confirm_resource(&self, job_id: &str) -> Result<ConfirmOutcome, StorageError> {
        let mut tables = self.tables.write().unwrap();
        let record = tables
            .resources
            .values_mut()
            .find(|r| r.job_id == job_id)
            .ok_or_else(|| StorageError::NotFound(format!("resource for job {}", job_id)))?;

        if record.status == ResourceStatus::Confirmed {
            return Ok(ConfirmOutcome::AlreadyConfirmed(record.clone()));
        }
        record.status = ResourceStatus::Confirmed;
        info!(job_id = %job_id, resource_id = record.id, "Confirmed resource");
        Ok(ConfirmOutcome::Confirmed(record.clone()))
    }

    async fn key_shares(&self, resource_id: i64) -> Result<Vec<KeyShare>, StorageError> {
        let tables = self.tables.read().unwrap();
        Ok(tables.key_shares.get(&resource_id).cloned().unwrap_or_default())
    }

    // =========================================================================
    // Multisig approvals
    // =========================================================================

    async fn append_multisig(&self, record: NewMultisig) -> Result<MultisigRecord, StorageError> {
        let mut tables = self.tables.write().unwrap();
        let stored = MultisigRecord {
            id: tables.next_id(),
            signer_id: record.signer_id,
            signature: record.signature,
            data: record.data,
            network: record.network,
            deadline_slot: record.deadline_slot,
            created_at: Utc::now(),
        };
        tables.multisig.push(stored.clone());
        Ok(stored)
    }

    async fn live_multisig(
        &self,
        network: &str,
        slot: u64,
    ) -> Result<Vec<MultisigRecord>, StorageError> {
        let tables = self.tables.read().unwrap();
        Ok(tables
            .multisig
            .iter()
            .filter(|m| m.network == network && m.deadline_slot >= slot)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poolforge_core::{KeyPair, Permissions, ResourceKind, ResourceParams};

    fn new_resource(job_id: &str, public_key: PublicKey) -> NewResource {
        NewResource {
            kind: ResourceKind::Pool,
            public_key,
            requester: "U1".into(),
            job_id: job_id.into(),
            network: "net-1".into(),
            params: ResourceParams::pool("MINA", "TOK"),
            transaction_payload: "payload".into(),
        }
    }

    fn share(a: i64, b: i64) -> KeyShare {
        KeyShare {
            signer1_id: a,
            signer2_id: b,
            ciphertext: vec![1, 2, 3],
            ephemeral_public1: [0u8; 32],
            ephemeral_public2: [1u8; 32],
        }
    }

    #[tokio::test]
    async fn test_signer_public_key_is_unique() {
        let store = MemoryStore::new();
        let pk = KeyPair::generate().public_key();

        store.create_signer(pk).await.unwrap();
        let duplicate = store.create_signer(pk).await;
        assert!(matches!(duplicate, Err(StorageError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_active_grants_filter_network_and_flag() {
        let store = MemoryStore::new();
        let a = store.create_signer(KeyPair::generate().public_key()).await.unwrap();
        let b = store.create_signer(KeyPair::generate().public_key()).await.unwrap();

        for (signer, network) in [(a.id, "net-1"), (b.id, "net-1"), (a.id, "net-2")] {
            store
                .upsert_grant(GrantRecord {
                    signer_id: signer,
                    network: network.into(),
                    permissions: Permissions::FULL,
                    active: true,
                })
                .await
                .unwrap();
        }

        assert_eq!(store.active_grants("net-1").await.unwrap().len(), 2);
        assert!(store.set_grant_active(b.id, "net-1", false).await.unwrap());
        assert_eq!(store.active_grants("net-1").await.unwrap().len(), 1);
        assert!(!store.set_grant_active(b.id, "net-9", false).await.unwrap());
    }

    #[tokio::test]
    async fn test_resource_uniqueness_leaves_no_partial_write() {
        let store = MemoryStore::new();
        let pk = KeyPair::generate().public_key();

        let stored = store
            .insert_resource_with_shares(new_resource("job-1", pk), vec![share(1, 2)])
            .await
            .unwrap();
        assert_eq!(store.key_shares(stored.id).await.unwrap().len(), 1);

        let same_job = store
            .insert_resource_with_shares(
                new_resource("job-1", KeyPair::generate().public_key()),
                vec![share(1, 2), share(1, 3)],
            )
            .await;
        assert!(matches!(same_job, Err(StorageError::AlreadyExists(_))));

        let same_key = store
            .insert_resource_with_shares(new_resource("job-2", pk), vec![share(1, 2)])
            .await;
        assert!(same_key.is_err());
        assert!(store.resource_by_job("job-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_confirm_is_idempotent() {
        let store = MemoryStore::new();
        let pk = KeyPair::generate().public_key();
        store
            .insert_resource_with_shares(new_resource("job-1", pk), Vec::new())
            .await
            .unwrap();

        let first = store.confirm_resource("job-1").await.unwrap();
        assert!(matches!(first, ConfirmOutcome::Confirmed(_)));
        let second = store.confirm_resource("job-1").await.unwrap();
        assert!(matches!(second, ConfirmOutcome::AlreadyConfirmed(_)));

        assert!(matches!(
            store.confirm_resource("missing").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_live_multisig_respects_deadline() {
        let store = MemoryStore::new();
        for deadline in [5, 10, 20] {
            store
                .append_multisig(NewMultisig {
                    signer_id: 1,
                    signature: "sig".into(),
                    data: "{}".into(),
                    network: "net-1".into(),
                    deadline_slot: deadline,
                })
                .await
                .unwrap();
        }

        assert_eq!(store.live_multisig("net-1", 10).await.unwrap().len(), 2);
        assert_eq!(store.live_multisig("net-2", 0).await.unwrap().len(), 0);
    }
}
