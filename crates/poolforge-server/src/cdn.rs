//! Post-confirmation manifest refresh
//!
//! After a resource is confirmed, downstream caches that list deployed
//! resources are asked to refresh. A failed refresh never fails the
//! confirmation.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Body posted to the refresh endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub network: &'a str,
    pub resource_public_key: &'a str,
}

#[derive(Debug, thiserror::Error)]
#[error("Manifest refresh failed: {0}")]
pub struct RefreshError(pub String);

#[async_trait]
pub trait ManifestRefresher: Send + Sync + std::fmt::Debug {
    async fn refresh(&self, network: &str, resource_public_key: &str) -> Result<(), RefreshError>;
}

/// Refresher for deployments without a CDN
#[derive(Debug, Default)]
pub struct NoopRefresher;

#[async_trait]
impl ManifestRefresher for NoopRefresher {
    async fn refresh(&self, network: &str, resource_public_key: &str) -> Result<(), RefreshError> {
        debug!(network = %network, resource = %resource_public_key, "No manifest endpoint configured");
        Ok(())
    }
}

/// Refresher that POSTs to an HTTP endpoint
#[derive(Debug, Clone)]
pub struct HttpManifestRefresher {
    client: reqwest::Client,
    url: String,
}

impl HttpManifestRefresher {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ManifestRefresher for HttpManifestRefresher {
    async fn refresh(&self, network: &str, resource_public_key: &str) -> Result<(), RefreshError> {
        debug!(url = %self.url, network = %network, "Refreshing manifest");
        self.client
            .post(&self.url)
            .json(&RefreshRequest {
                network,
                resource_public_key,
            })
            .send()
            .await
            .map_err(|e| RefreshError(e.to_string()))?
            .error_for_status()
            .map_err(|e| RefreshError(e.to_string()))?;
        Ok(())
    }
}
