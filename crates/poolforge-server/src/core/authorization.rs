//! Per-network authorization state
//!
//! The authorization tree of a network is derived from its active grants.
//! Built trees are cached and dropped whenever a grant on that network
//! changes. A tree built from grants read before such a change is never
//! cached or returned.

use moka::future::Cache;
use poolforge_core::{AuthorizationTree, Custodian, Permissions, PublicKey};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::storage::{SignerRecord, StorageError, Store};

/// Active signer on a network with its permissions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedSigner {
    pub signer: SignerRecord,
    pub permissions: Permissions,
}

/// Authorization tree of a network plus the signers it was built from
#[derive(Debug, Clone)]
pub struct NetworkAuthorization {
    pub network: String,
    pub tree: AuthorizationTree,
    pub signers: Vec<AuthorizedSigner>,
}

impl NetworkAuthorization {
    pub fn build(network: impl Into<String>, signers: Vec<AuthorizedSigner>) -> Self {
        let tree = AuthorizationTree::from_grants(
            signers.iter().map(|s| (s.signer.public_key, s.permissions)),
        );
        Self {
            network: network.into(),
            tree,
            signers,
        }
    }

    /// Full-rights signers, ordered by signer id
    pub fn custodians(&self) -> Vec<Custodian> {
        let mut custodians: Vec<Custodian> = self
            .signers
            .iter()
            .filter(|s| s.permissions.is_full())
            .map(|s| Custodian {
                signer_id: s.signer.id,
                public_key: s.signer.public_key,
            })
            .collect();
        custodians.sort_by_key(|c| c.signer_id);
        custodians
    }

    pub fn signer(&self, public_key: &PublicKey) -> Option<&AuthorizedSigner> {
        self.signers
            .iter()
            .find(|s| &s.signer.public_key == public_key)
    }
}

/// Cached lookup of network authorization state
#[derive(Debug)]
pub struct AuthorizationService {
    store: Arc<dyn Store>,
    cache: Cache<String, Arc<NetworkAuthorization>>,
    /// Invalidation count per network
    generations: Mutex<HashMap<String, u64>>,
}

impl AuthorizationService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            cache: Cache::builder()
                .time_to_live(Duration::from_secs(600))
                .max_capacity(256)
                .build(),
            generations: Mutex::new(HashMap::new()),
        }
    }

    /// Authorization state of a network, built from storage on a cache miss.
    ///
    /// A build that overlaps an invalidation of the same network is thrown
    /// away and redone.
    pub async fn for_network(&self, network: &str) -> Result<Arc<NetworkAuthorization>, StorageError> {
        loop {
            if let Some(cached) = self.cache.get(network).await {
                debug!(network = %network, "Using cached authorization tree");
                return Ok(cached);
            }

            let generation = self.generation(network).await;
            let authorization = self.build(network).await?;

            let generations = self.generations.lock().await;
            if generations.get(network).copied().unwrap_or(0) != generation {
                debug!(network = %network, "Grants changed during build, rebuilding tree");
                continue;
            }
            self.cache
                .insert(network.to_string(), authorization.clone())
                .await;
            return Ok(authorization);
        }
    }

    /// Drop the cached tree of a network
    pub async fn invalidate(&self, network: &str) {
        let mut generations = self.generations.lock().await;
        *generations.entry(network.to_string()).or_insert(0) += 1;
        self.cache.invalidate(network).await;
    }

    async fn generation(&self, network: &str) -> u64 {
        self.generations
            .lock()
            .await
            .get(network)
            .copied()
            .unwrap_or(0)
    }

    async fn build(&self, network: &str) -> Result<Arc<NetworkAuthorization>, StorageError> {
        let signers = self
            .store
            .active_grants(network)
            .await?
            .into_iter()
            .map(|(signer, grant)| AuthorizedSigner {
                signer,
                permissions: grant.permissions,
            })
            .collect();
        let authorization = Arc::new(NetworkAuthorization::build(network, signers));

        debug!(
            network = %network,
            root = %authorization.tree.root_base64(),
            signers = authorization.signers.len(),
            "Built authorization tree"
        );
        Ok(authorization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{
        ConfirmOutcome, GrantRecord, MemoryStore, MultisigRecord, NewMultisig, NewResource,
        ResourceRecord,
    };
    use async_trait::async_trait;
    use poolforge_core::{KeyPair, KeyShare};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    async fn grant(store: &MemoryStore, network: &str, permissions: Permissions) -> SignerRecord {
        let signer = store.create_signer(KeyPair::generate().public_key()).await.unwrap();
        store
            .upsert_grant(GrantRecord {
                signer_id: signer.id,
                network: network.into(),
                permissions,
                active: true,
            })
            .await
            .unwrap();
        signer
    }

    #[tokio::test]
    async fn test_custodians_are_full_rights_only() {
        let store = Arc::new(MemoryStore::new());
        let a = grant(&store, "net-1", Permissions::FULL).await;
        grant(&store, "net-1", Permissions::DEPLOY_POOL).await;
        let c = grant(&store, "net-1", Permissions::FULL).await;

        let service = AuthorizationService::new(store);
        let auth = service.for_network("net-1").await.unwrap();

        let ids: Vec<i64> = auth.custodians().iter().map(|c| c.signer_id).collect();
        assert_eq!(ids, vec![a.id, c.id]);
        assert_eq!(auth.tree.len(), 3);
    }

    #[tokio::test]
    async fn test_invalidate_picks_up_grant_changes() {
        let store = Arc::new(MemoryStore::new());
        let a = grant(&store, "net-1", Permissions::FULL).await;
        grant(&store, "net-1", Permissions::FULL).await;

        let service = AuthorizationService::new(store.clone());
        let before = service.for_network("net-1").await.unwrap().tree.root();

        store.set_grant_active(a.id, "net-1", false).await.unwrap();
        let cached = service.for_network("net-1").await.unwrap().tree.root();
        assert_eq!(before, cached);

        service.invalidate("net-1").await;
        let after = service.for_network("net-1").await.unwrap();
        assert_ne!(before, after.tree.root());
        assert_eq!(after.custodians().len(), 1);
    }

    /// Store whose first `active_grants` call pauses until released
    #[derive(Debug, Default)]
    struct PausingStore {
        inner: MemoryStore,
        paused: AtomicBool,
        reading: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Store for PausingStore {
        async fn create_signer(&self, public_key: PublicKey) -> Result<SignerRecord, StorageError> {
            self.inner.create_signer(public_key).await
        }

        async fn get_signer(&self, id: i64) -> Result<Option<SignerRecord>, StorageError> {
            self.inner.get_signer(id).await
        }

        async fn find_signer(&self, public_key: &PublicKey) -> Result<Option<SignerRecord>, StorageError> {
            self.inner.find_signer(public_key).await
        }

        async fn upsert_grant(&self, grant: GrantRecord) -> Result<GrantRecord, StorageError> {
            self.inner.upsert_grant(grant).await
        }

        async fn set_grant_active(
            &self,
            signer_id: i64,
            network: &str,
            active: bool,
        ) -> Result<bool, StorageError> {
            self.inner.set_grant_active(signer_id, network, active).await
        }

        async fn active_grants(
            &self,
            network: &str,
        ) -> Result<Vec<(SignerRecord, GrantRecord)>, StorageError> {
            let grants = self.inner.active_grants(network).await;
            if !self.paused.swap(true, Ordering::SeqCst) {
                self.reading.notify_one();
                self.release.notified().await;
            }
            grants
        }

        async fn resource_key_exists(&self, public_key: &PublicKey) -> Result<bool, StorageError> {
            self.inner.resource_key_exists(public_key).await
        }

        async fn insert_resource_with_shares(
            &self,
            resource: NewResource,
            shares: Vec<KeyShare>,
        ) -> Result<ResourceRecord, StorageError> {
            self.inner.insert_resource_with_shares(resource, shares).await
        }

        async fn resource_by_job(&self, job_id: &str) -> Result<Option<ResourceRecord>, StorageError> {
            self.inner.resource_by_job(job_id).await
        }

        async fn confirm_resource(&self, job_id: &str) -> Result<ConfirmOutcome, StorageError> {
            self.inner.confirm_resource(job_id).await
        }

        async fn key_shares(&self, resource_id: i64) -> Result<Vec<KeyShare>, StorageError> {
            self.inner.key_shares(resource_id).await
        }

        async fn append_multisig(&self, record: NewMultisig) -> Result<MultisigRecord, StorageError> {
            self.inner.append_multisig(record).await
        }

        async fn live_multisig(
            &self,
            network: &str,
            slot: u64,
        ) -> Result<Vec<MultisigRecord>, StorageError> {
            self.inner.live_multisig(network, slot).await
        }
    }

    #[tokio::test]
    async fn test_revocation_during_build_is_not_cached() {
        let store = Arc::new(PausingStore::default());
        let revoked = grant(&store.inner, "net-1", Permissions::FULL).await;
        let kept = grant(&store.inner, "net-1", Permissions::FULL).await;
        grant(&store.inner, "net-1", Permissions::FULL).await;

        let service = Arc::new(AuthorizationService::new(store.clone()));
        let building = tokio::spawn({
            let service = service.clone();
            async move { service.for_network("net-1").await.unwrap() }
        });

        // The build has read all three grants; revoke one before it finishes
        store.reading.notified().await;
        store.set_grant_active(revoked.id, "net-1", false).await.unwrap();
        service.invalidate("net-1").await;
        store.release.notify_one();

        let built = building.await.unwrap();
        let ids: Vec<i64> = built.custodians().iter().map(|c| c.signer_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(!ids.contains(&revoked.id));
        assert!(ids.contains(&kept.id));

        let cached = service.for_network("net-1").await.unwrap();
        assert_eq!(cached.tree.root(), built.tree.root());
        assert!(cached.signer(&revoked.public_key).is_none());
    }
}
