//! One-time attestation setup, memoized per network class
//!
//! Concurrent first callers for the same class wait on a single setup run
//! instead of racing duplicate work.

use poolforge_core::{NetworkClass, Prover, ProvingKey};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use crate::service::ServiceError;

pub struct SetupCache {
    prover: Arc<dyn Prover>,
    mainnet: OnceCell<Arc<ProvingKey>>,
    testnet: OnceCell<Arc<ProvingKey>>,
    runs: AtomicUsize,
}

impl SetupCache {
    pub fn new(prover: Arc<dyn Prover>) -> Self {
        Self {
            prover,
            mainnet: OnceCell::new(),
            testnet: OnceCell::new(),
            runs: AtomicUsize::new(0),
        }
    }

    pub fn prover(&self) -> Arc<dyn Prover> {
        self.prover.clone()
    }

    /// Proving key for a class, running setup on first use
    pub async fn proving_key(&self, class: NetworkClass) -> Result<Arc<ProvingKey>, ServiceError> {
        let cell = match class {
            NetworkClass::Mainnet => &self.mainnet,
            NetworkClass::Testnet => &self.testnet,
        };

        cell.get_or_try_init(|| async {
            self.runs.fetch_add(1, Ordering::SeqCst);
            info!(class = %class, "Running attestation setup");

            let prover = self.prover.clone();
            let key = tokio::task::spawn_blocking(move || prover.setup(class))
                .await
                .map_err(|e| ServiceError::Infrastructure(format!("Setup task failed: {}", e)))??;

            info!(class = %class, key_id = %key.key_id(), "Cached proving key");
            Ok::<_, ServiceError>(Arc::new(key))
        })
        .await
        .cloned()
    }

    /// Number of setup runs started so far
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for SetupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupCache")
            .field("mainnet_ready", &self.mainnet.initialized())
            .field("testnet_ready", &self.testnet.initialized())
            .field("runs", &self.runs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poolforge_core::WorkProver;

    #[tokio::test]
    async fn test_concurrent_first_callers_share_one_setup() {
        let cache = Arc::new(SetupCache::new(Arc::new(WorkProver::new(64))));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.proving_key(NetworkClass::Testnet).await.unwrap() })
            })
            .collect();

        let mut keys = Vec::new();
        for handle in handles {
            keys.push(handle.await.unwrap());
        }

        assert_eq!(cache.runs(), 1);
        assert!(keys.windows(2).all(|w| w[0].key_id() == w[1].key_id()));
    }

    #[tokio::test]
    async fn test_classes_are_set_up_separately() {
        let cache = SetupCache::new(Arc::new(WorkProver::new(16)));
        let main = cache.proving_key(NetworkClass::Mainnet).await.unwrap();
        let test = cache.proving_key(NetworkClass::Testnet).await.unwrap();

        assert_eq!(cache.runs(), 2);
        assert_ne!(main.key_id(), test.key_id());
    }
}
