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
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::retry::{retry_idempotent, RetryPolicy};
use crate::{AdapterError, Result};

/// Validated traffic-weight assignment for one logical endpoint.
///
/// Weights always sum to exactly 100; the constructor refuses anything else,
/// so a value of this type is proof of the invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficWeights {
    weights: IndexMap<String, u8>,
}

impl TrafficWeights {
    pub fn new(weights: IndexMap<String, u8>) -> Result<Self> {
        let sum: u32 = weights.values().map(|w| u32::from(*w)).sum();
        if sum != 100 {
            return Err(AdapterError::Validation(format!(
                "traffic weights must sum to 100, got {sum}"
            )));
        }
        Ok(Self { weights })
    }

    /// All traffic to `active`, zero to every other listed region.
    pub fn exclusive<'a>(
        active: &str,
        all_regions: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self> {
        let mut weights = IndexMap::new();
        let mut seen_active = false;
        for region in all_regions {
            let weight = if region == active { 100 } else { 0 };
            seen_active |= region == active;
            weights.insert(region.to_owned(), weight);
        }
        if !seen_active {
            return Err(AdapterError::UnknownRegion(active.to_owned()));
        }
        Self::new(weights)
    }

    /// Canary split: `weight` percent to `canary`, the remainder to `active`.
    pub fn split(canary: &str, weight: u8, active: &str) -> Result<Self> {
        if weight > 100 {
            return Err(AdapterError::Validation(format!(
                "canary weight {weight} exceeds 100"
            )));
        }
        let mut weights = IndexMap::new();
        weights.insert(canary.to_owned(), weight);
        weights.insert(active.to_owned(), 100 - weight);
        Self::new(weights)
    }

    pub fn get(&self, region: &str) -> u8 {
        self.weights.get(region).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u8)> {
        self.weights.iter().map(|(region, w)| (region.as_str(), *w))
    }
}

impl std::fmt::Display for TrafficWeights {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (region, weight) in &self.weights {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{region}={weight}%")?;
            first = false;
        }
        Ok(())
    }
}

/// Seam over the DNS provider's weighted-record API.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Upsert the full weight set for one record as a single logical unit.
    async fn upsert(&self, record: &str, weights: &TrafficWeights) -> Result<()>;
    /// Read back the currently applied weight set, if any.
    async fn current(&self, record: &str) -> Result<Option<TrafficWeights>>;
}

/// Production DNS provider speaking HTTP+JSON.
#[derive(Debug, Clone)]
pub struct HttpDnsProvider {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpDnsProvider {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    fn record_url(&self, record: &str) -> String {
        format!("{}/records/{}", self.base_url.trim_end_matches('/'), record)
    }
}

#[async_trait]
impl DnsProvider for HttpDnsProvider {
    async fn upsert(&self, record: &str, weights: &TrafficWeights) -> Result<()> {
        self.client
            .put(self.record_url(record))
            .timeout(self.timeout)
            .json(weights)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn current(&self, record: &str) -> Result<Option<TrafficWeights>> {
        let response = self
            .client
            .get(self.record_url(record))
            .timeout(self.timeout)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        let weights: TrafficWeights = response
            .json()
            .await
            .map_err(|err| AdapterError::MalformedBody(err.to_string()))?;
        Ok(Some(weights))
    }
}

/// Applies weight sets atomically (from the caller's point of view) and
/// remembers the last set it successfully applied.
pub struct DnsWeightManager {
    provider: Arc<dyn DnsProvider>,
    record: String,
    retry: RetryPolicy,
    last_applied: Mutex<Option<TrafficWeights>>,
}

impl DnsWeightManager {
    pub fn new(provider: Arc<dyn DnsProvider>, record: impl Into<String>) -> Self {
        Self {
            provider,
            record: record.into(),
            retry: RetryPolicy::default(),
            last_applied: Mutex::new(None),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Apply a validated weight set. The upsert is idempotent, so transient
    /// failures are retried to completion; a final failure is reported to the
    /// caller rather than left half-applied.
    pub async fn set_weights(&self, weights: TrafficWeights) -> Result<()> {
        retry_idempotent("dns.upsert", &self.retry, || {
            let weights = weights.clone();
            async move { self.provider.upsert(&self.record, &weights).await }
        })
        .await?;
        info!(record = %self.record, weights = %weights, "traffic weights applied");
        *self.last_applied.lock() = Some(weights);
        Ok(())
    }

    /// Weight set as the provider reports it right now.
    pub async fn current(&self) -> Result<Option<TrafficWeights>> {
        retry_idempotent("dns.current", &self.retry, || async {
            self.provider.current(&self.record).await
        })
        .await
    }

    /// Last weight set this process successfully applied.
    pub fn last_applied(&self) -> Option<TrafficWeights> {
        self.last_applied.lock().clone()
    }
}
