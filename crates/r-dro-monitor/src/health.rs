//! ---
//! dro_section: "02-monitoring"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Region health probing and replication-lag monitoring."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use r_dro_common::config::{ProbeConfig, RegionConfig};
use r_dro_metrics::FailoverMetrics;

use crate::region::{RegionHealth, RegionRegistry};
use crate::{MonitorError, Result};

/// Verdict-producing seam over a region's health-check endpoint.
///
/// Implementations return `true` only for a reachable endpoint answering 2xx
/// with a well-formed body carrying a truthy health indicator. Timeouts,
/// transport errors, non-2xx responses, and malformed bodies are all `false`:
/// one probe failure, never a fatal error.
#[async_trait]
pub trait HealthEndpoint: Send + Sync {
    async fn check(&self, region_id: &str, url: &str, timeout: Duration) -> bool;
}

/// Production health endpoint speaking HTTP+JSON.
#[derive(Debug, Clone, Default)]
pub struct HttpHealthEndpoint {
    client: reqwest::Client,
}

impl HttpHealthEndpoint {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn body_is_healthy(body: &serde_json::Value) -> bool {
        if let Some(flag) = body.get("healthy").and_then(|v| v.as_bool()) {
            return flag;
        }
        matches!(
            body.get("status").and_then(|v| v.as_str()),
            Some("ok") | Some("healthy") | Some("pass")
        )
    }
}

#[async_trait]
impl HealthEndpoint for HttpHealthEndpoint {
    async fn check(&self, region_id: &str, url: &str, timeout: Duration) -> bool {
        let response = match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(region = region_id, error = %err, "health probe transport failure");
                return false;
            }
        };
        if !response.status().is_success() {
            debug!(region = region_id, status = %response.status(), "health probe non-2xx");
            return false;
        }
        match response.json::<serde_json::Value>().await {
            Ok(body) => Self::body_is_healthy(&body),
            Err(err) => {
                debug!(region = region_id, error = %err, "health probe malformed body");
                false
            }
        }
    }
}

/// Outcome of a single probe, raw verdict plus post-hysteresis health.
#[derive(Debug, Clone)]
pub struct HealthResult {
    pub region: String,
    pub verdict: bool,
    pub health: RegionHealth,
    pub observed_at: DateTime<Utc>,
}

/// Probes each region on its own independent periodic timer and feeds the
/// shared registry. A slow probe for one region never delays another.
pub struct HealthProber {
    endpoint: Arc<dyn HealthEndpoint>,
    registry: Arc<RegionRegistry>,
    urls: IndexMap<String, String>,
    config: ProbeConfig,
    metrics: Option<FailoverMetrics>,
}

impl HealthProber {
    pub fn new(
        endpoint: Arc<dyn HealthEndpoint>,
        registry: Arc<RegionRegistry>,
        regions: &IndexMap<String, RegionConfig>,
        config: ProbeConfig,
    ) -> Self {
        let urls = regions
            .iter()
            .map(|(id, cfg)| (id.clone(), cfg.health_url.clone()))
            .collect();
        Self {
            endpoint,
            registry,
            urls,
            config,
            metrics: None,
        }
    }

    /// Attach a metrics family; failed probes are counted from then on.
    pub fn with_metrics(mut self, metrics: FailoverMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Probe one region once and record the verdict.
    pub async fn probe(&self, region_id: &str) -> Result<HealthResult> {
        let url = self
            .urls
            .get(region_id)
            .ok_or_else(|| MonitorError::UnknownRegion(region_id.to_owned()))?;
        let verdict = self
            .endpoint
            .check(region_id, url, self.config.timeout)
            .await;
        if !verdict {
            if let Some(metrics) = &self.metrics {
                metrics.record_probe_failure(region_id);
            }
        }
        let observed_at = Utc::now();
        let health = self
            .registry
            .apply_probe(region_id, verdict, &self.config, observed_at);
        Ok(HealthResult {
            region: region_id.to_owned(),
            verdict,
            health,
            observed_at,
        })
    }

    /// Spawn one periodic probe task per region. Tasks stop when the
    /// shutdown channel fires.
    pub fn spawn_tasks(self: Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for region_id in self.urls.keys().cloned().collect::<Vec<_>>() {
            let prober = self.clone();
            let mut shutdown_rx = shutdown.subscribe();
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(prober.config.interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            debug!(region = %region_id, "probe task shutdown");
                            break;
                        }
                        _ = ticker.tick() => {
                            match prober.probe(&region_id).await {
                                Ok(result) => {
                                    debug!(
                                        region = %region_id,
                                        verdict = result.verdict,
                                        health = ?result.health,
                                        "probe completed"
                                    );
                                }
                                Err(err) => {
                                    warn!(region = %region_id, error = %err, "probe task error");
                                }
                            }
                        }
                    }
                }
            });
            handles.push(handle);
        }
        handles
    }
}
