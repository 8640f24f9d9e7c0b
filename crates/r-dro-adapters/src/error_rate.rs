//! ---
//! dro_section: "05-external-interfaces"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Collaborator API adapters and retry policy."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::{AdapterError, Result};

/// Queryable per-region error-rate signal (trailing 5xx fraction), consumed
/// only during canary failback.
#[async_trait]
pub trait ErrorRateSignal: Send + Sync {
    /// Trailing error rate for the region as a fraction in `0.0..=1.0`.
    async fn sample(&self, region_id: &str) -> Result<f64>;
}

/// Production signal querying an HTTP time-series endpoint.
#[derive(Debug, Clone)]
pub struct HttpErrorRateSignal {
    client: reqwest::Client,
    urls: IndexMap<String, String>,
    timeout: Duration,
}

impl HttpErrorRateSignal {
    pub fn new(client: reqwest::Client, urls: IndexMap<String, String>, timeout: Duration) -> Self {
        Self {
            client,
            urls,
            timeout,
        }
    }
}

#[async_trait]
impl ErrorRateSignal for HttpErrorRateSignal {
    async fn sample(&self, region_id: &str) -> Result<f64> {
        let url = self
            .urls
            .get(region_id)
            .ok_or_else(|| AdapterError::UnknownRegion(region_id.to_owned()))?;
        let body: serde_json::Value = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|err| AdapterError::MalformedBody(err.to_string()))?;
        let rate = body
            .get("error_rate")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| AdapterError::MalformedBody("missing error_rate field".into()))?;
        if !(0.0..=1.0).contains(&rate) {
            return Err(AdapterError::MalformedBody(format!(
                "error_rate {rate} outside 0..=1"
            )));
        }
        Ok(rate)
    }
}
