//! ---
//! dro_section: "05-external-interfaces"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Collaborator API adapters and retry policy."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::{debug, info};

use crate::retry::{retry_idempotent, RetryPolicy};
use crate::{AdapterError, Result};

/// Seam over the scaling API: desired-replica-count command plus a query.
#[async_trait]
pub trait ScalingApi: Send + Sync {
    async fn replicas(&self, region_id: &str) -> Result<u32>;
    async fn set_replicas(&self, region_id: &str, count: u32) -> Result<()>;
}

/// Production scaling client speaking HTTP+JSON.
#[derive(Debug, Clone)]
pub struct HttpScalingApi {
    client: reqwest::Client,
    urls: IndexMap<String, String>,
    timeout: Duration,
}

impl HttpScalingApi {
    pub fn new(client: reqwest::Client, urls: IndexMap<String, String>, timeout: Duration) -> Self {
        Self {
            client,
            urls,
            timeout,
        }
    }

    fn base(&self, region_id: &str) -> Result<&str> {
        self.urls
            .get(region_id)
            .map(|url| url.trim_end_matches('/'))
            .ok_or_else(|| AdapterError::UnknownRegion(region_id.to_owned()))
    }
}

#[async_trait]
impl ScalingApi for HttpScalingApi {
    async fn replicas(&self, region_id: &str) -> Result<u32> {
        let url = format!("{}/replicas", self.base(region_id)?);
        let body: serde_json::Value = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|err| AdapterError::MalformedBody(err.to_string()))?;
        body.get("replicas")
            .and_then(|v| v.as_u64())
            .map(|n| n as u32)
            .ok_or_else(|| AdapterError::MalformedBody("missing replicas field".into()))
    }

    async fn set_replicas(&self, region_id: &str, count: u32) -> Result<()> {
        let url = format!("{}/replicas", self.base(region_id)?);
        self.client
            .put(&url)
            .timeout(self.timeout)
            .json(&serde_json::json!({ "replicas": count }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Adjusts a region's replica counts to absorb shifted load.
///
/// Scale-up is monotonic and always allowed; scale-down is a plain command
/// here, and the coordinator only invokes it in `Stable`.
pub struct CapacityScaler {
    api: Arc<dyn ScalingApi>,
    retry: RetryPolicy,
}

impl CapacityScaler {
    pub fn new(api: Arc<dyn ScalingApi>) -> Self {
        Self {
            api,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Raise the region to at least `minimum` replicas and return the
    /// resulting count. Never shrinks.
    pub async fn ensure_at_least(&self, region_id: &str, minimum: u32) -> Result<u32> {
        let current = retry_idempotent("scale.replicas", &self.retry, || async {
            self.api.replicas(region_id).await
        })
        .await?;
        let target = current.max(minimum);
        if target == current {
            debug!(region = region_id, replicas = current, "capacity already sufficient");
            return Ok(current);
        }
        retry_idempotent("scale.set_replicas", &self.retry, || async {
            self.api.set_replicas(region_id, target).await
        })
        .await?;
        info!(region = region_id, from = current, to = target, "capacity raised");
        Ok(target)
    }

    /// Set an explicit replica count, shrinking included.
    pub async fn scale_to(&self, region_id: &str, desired: u32) -> Result<()> {
        retry_idempotent("scale.set_replicas", &self.retry, || async {
            self.api.set_replicas(region_id, desired).await
        })
        .await?;
        info!(region = region_id, replicas = desired, "capacity set");
        Ok(())
    }
}
