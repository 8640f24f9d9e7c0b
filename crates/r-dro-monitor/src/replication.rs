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
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use r_dro_metrics::FailoverMetrics;

use crate::{MonitorError, Result};

/// Seam over a region's data store exposing its last committed write timestamp.
#[async_trait]
pub trait CommitTimestampSource: Send + Sync {
    async fn last_commit(&self, region_id: &str) -> Result<DateTime<Utc>>;
}

/// Production source querying the database control API over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCommitTimestampSource {
    client: reqwest::Client,
    urls: IndexMap<String, String>,
    timeout: Duration,
}

impl HttpCommitTimestampSource {
    pub fn new(client: reqwest::Client, urls: IndexMap<String, String>, timeout: Duration) -> Self {
        Self {
            client,
            urls,
            timeout,
        }
    }
}

#[async_trait]
impl CommitTimestampSource for HttpCommitTimestampSource {
    async fn last_commit(&self, region_id: &str) -> Result<DateTime<Utc>> {
        let base = self
            .urls
            .get(region_id)
            .ok_or_else(|| MonitorError::UnknownRegion(region_id.to_owned()))?;
        let url = format!("{}/last-commit", base.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()
            .map_err(|err| MonitorError::Transport(err.to_string()))?;
        let body: serde_json::Value = response.json().await?;
        let raw = body
            .get("timestamp")
            .and_then(|v| v.as_str())
            .ok_or_else(|| MonitorError::MalformedBody("missing timestamp field".into()))?;
        DateTime::parse_from_rfc3339(raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|err| MonitorError::MalformedBody(err.to_string()))
    }
}

/// Replication lag expressed fail-closed: anything short of a measured value
/// is `Unknown` and disqualifies the region as a failover target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "seconds")]
pub enum LagSample {
    Seconds(u64),
    Unknown,
}

/// Computed replication status between a primary and one secondary region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationStatus {
    pub primary: String,
    pub secondary: String,
    pub lag: LagSample,
    /// Set when the secondary's clock was ahead of the primary's and the lag
    /// was clamped to zero.
    pub skew_flagged: bool,
    pub updated_at: DateTime<Utc>,
}

impl ReplicationStatus {
    /// Failover eligibility gate: a lag is acceptable only when measured and
    /// at or below `max_lag`.
    pub fn within(&self, max_lag: Duration) -> bool {
        match self.lag {
            LagSample::Seconds(lag) => lag <= max_lag.as_secs(),
            LagSample::Unknown => false,
        }
    }
}

/// Computes and caches replication lag between region pairs.
pub struct ReplicationMonitor {
    source: Arc<dyn CommitTimestampSource>,
    latest: Mutex<IndexMap<String, ReplicationStatus>>,
    metrics: Option<FailoverMetrics>,
}

impl ReplicationMonitor {
    pub fn new(source: Arc<dyn CommitTimestampSource>) -> Self {
        Self {
            source,
            latest: Mutex::new(IndexMap::new()),
            metrics: None,
        }
    }

    /// Attach a metrics family; lag samples update the gauge from then on.
    pub fn with_metrics(mut self, metrics: FailoverMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Compare last committed write timestamps and cache the result keyed by
    /// the secondary region. Unreachable stores yield `LagSample::Unknown`.
    pub async fn compute_lag(&self, primary: &str, secondary: &str) -> ReplicationStatus {
        let status = match (
            self.source.last_commit(primary).await,
            self.source.last_commit(secondary).await,
        ) {
            (Ok(primary_ts), Ok(secondary_ts)) => {
                let delta = (primary_ts - secondary_ts).num_seconds();
                let skew = delta < 0;
                if skew {
                    warn!(
                        primary,
                        secondary,
                        skew_seconds = -delta,
                        "secondary commit timestamp ahead of primary; clamping lag to 0"
                    );
                }
                ReplicationStatus {
                    primary: primary.to_owned(),
                    secondary: secondary.to_owned(),
                    lag: LagSample::Seconds(delta.max(0) as u64),
                    skew_flagged: skew,
                    updated_at: Utc::now(),
                }
            }
            (primary_result, secondary_result) => {
                for (region, result) in [(primary, &primary_result), (secondary, &secondary_result)]
                {
                    if let Err(err) = result {
                        debug!(region, error = %err, "commit timestamp unavailable");
                    }
                }
                ReplicationStatus {
                    primary: primary.to_owned(),
                    secondary: secondary.to_owned(),
                    lag: LagSample::Unknown,
                    skew_flagged: false,
                    updated_at: Utc::now(),
                }
            }
        };
        if let Some(metrics) = &self.metrics {
            let lag = match status.lag {
                LagSample::Seconds(secs) => Some(Duration::from_secs(secs)),
                LagSample::Unknown => None,
            };
            metrics.set_replication_lag(secondary, lag);
        }
        self.latest
            .lock()
            .insert(secondary.to_owned(), status.clone());
        status
    }

    /// Most recent status computed for the given secondary region.
    pub fn latest(&self, secondary: &str) -> Option<ReplicationStatus> {
        self.latest.lock().get(secondary).cloned()
    }

    /// Spawn a periodic lag computation for each (primary, secondary) pair.
    pub fn spawn_tasks(
        self: Arc<Self>,
        pairs: Vec<(String, String)>,
        poll_interval: Duration,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for (primary, secondary) in pairs {
            let monitor = self.clone();
            let mut shutdown_rx = shutdown.subscribe();
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(poll_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            debug!(primary = %primary, secondary = %secondary, "replication task shutdown");
                            break;
                        }
                        _ = ticker.tick() => {
                            let status = monitor.compute_lag(&primary, &secondary).await;
                            debug!(
                                primary = %primary,
                                secondary = %secondary,
                                lag = ?status.lag,
                                "replication lag sampled"
                            );
                        }
                    }
                }
            });
            handles.push(handle);
        }
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClocks {
        clocks: IndexMap<String, Option<DateTime<Utc>>>,
    }

    #[async_trait]
    impl CommitTimestampSource for FixedClocks {
        async fn last_commit(&self, region_id: &str) -> Result<DateTime<Utc>> {
            match self.clocks.get(region_id) {
                Some(Some(ts)) => Ok(*ts),
                Some(None) => Err(MonitorError::Transport("store unreachable".into())),
                None => Err(MonitorError::UnknownRegion(region_id.to_owned())),
            }
        }
    }

    fn monitor_with(clocks: IndexMap<String, Option<DateTime<Utc>>>) -> ReplicationMonitor {
        ReplicationMonitor::new(Arc::new(FixedClocks { clocks }))
    }

    #[tokio::test]
    async fn lag_is_primary_minus_secondary() {
        let now = Utc::now();
        let mut clocks = IndexMap::new();
        clocks.insert("us-east".to_string(), Some(now));
        clocks.insert(
            "eu-west".to_string(),
            Some(now - chrono::Duration::seconds(90)),
        );
        let monitor = monitor_with(clocks);

        let status = monitor.compute_lag("us-east", "eu-west").await;
        assert_eq!(status.lag, LagSample::Seconds(90));
        assert!(!status.skew_flagged);
        assert!(status.within(Duration::from_secs(300)));
        assert!(!status.within(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn clock_skew_clamps_to_zero_and_flags() {
        let now = Utc::now();
        let mut clocks = IndexMap::new();
        clocks.insert("us-east".to_string(), Some(now));
        clocks.insert(
            "eu-west".to_string(),
            Some(now + chrono::Duration::seconds(30)),
        );
        let monitor = monitor_with(clocks);

        let status = monitor.compute_lag("us-east", "eu-west").await;
        assert_eq!(status.lag, LagSample::Seconds(0));
        assert!(status.skew_flagged);
    }

    #[tokio::test]
    async fn lag_samples_feed_the_gauge_with_unknown_as_negative() {
        let now = Utc::now();
        let mut clocks = IndexMap::new();
        clocks.insert("us-east".to_string(), Some(now));
        clocks.insert(
            "eu-west".to_string(),
            Some(now - chrono::Duration::seconds(90)),
        );
        clocks.insert("ap-south".to_string(), None);
        let metrics_registry = r_dro_metrics::new_registry();
        let metrics = FailoverMetrics::new(metrics_registry.clone()).unwrap();
        let monitor =
            ReplicationMonitor::new(Arc::new(FixedClocks { clocks })).with_metrics(metrics);

        monitor.compute_lag("us-east", "eu-west").await;
        monitor.compute_lag("us-east", "ap-south").await;

        let families = metrics_registry.gather();
        let gauge = families
            .iter()
            .find(|family| family.get_name() == "r_dro_replication_lag_seconds")
            .unwrap();
        assert_eq!(gauge.get_metric().len(), 2);
        for metric in gauge.get_metric() {
            match metric.get_label()[0].get_value() {
                "eu-west" => assert_eq!(metric.get_gauge().get_value(), 90.0),
                "ap-south" => assert_eq!(metric.get_gauge().get_value(), -1.0),
                other => panic!("unexpected region label {other}"),
            }
        }
    }

    #[tokio::test]
    async fn unreachable_store_fails_closed() {
        let mut clocks = IndexMap::new();
        clocks.insert("us-east".to_string(), Some(Utc::now()));
        clocks.insert("eu-west".to_string(), None);
        let monitor = monitor_with(clocks);

        let status = monitor.compute_lag("us-east", "eu-west").await;
        assert_eq!(status.lag, LagSample::Unknown);
        assert!(!status.within(Duration::from_secs(u64::MAX)));
        assert_eq!(
            monitor.latest("eu-west").map(|s| s.lag),
            Some(LagSample::Unknown)
        );
    }
}
