//! ---
//! dro_section: "02-monitoring"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Region health probing and replication-lag monitoring."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use r_dro_common::config::{ProbeConfig, RegionConfig, RegionRole};

/// Last observed health of a region, after hysteresis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegionHealth {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

/// Runtime state for one region, written only by the health prober.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionState {
    pub id: String,
    pub role: RegionRole,
    pub health: RegionHealth,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_probe: Option<DateTime<Utc>>,
    /// Start of the current uninterrupted healthy streak.
    pub healthy_since: Option<DateTime<Utc>>,
}

impl RegionState {
    pub fn new(id: impl Into<String>, role: RegionRole) -> Self {
        Self {
            id: id.into(),
            role,
            health: RegionHealth::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_probe: None,
            healthy_since: None,
        }
    }

    fn record_success(&mut self, config: &ProbeConfig, now: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.consecutive_successes += 1;
        self.last_probe = Some(now);
        let flip = self.health != RegionHealth::Healthy
            && self.consecutive_successes >= config.success_threshold;
        if flip {
            self.health = RegionHealth::Healthy;
            self.healthy_since = Some(now);
            info!(region = %self.id, "region flipped to healthy");
        }
    }

    fn record_failure(&mut self, config: &ProbeConfig, now: DateTime<Utc>) {
        self.consecutive_successes = 0;
        self.consecutive_failures += 1;
        self.last_probe = Some(now);
        self.healthy_since = None;
        let flip = self.health != RegionHealth::Unhealthy
            && self.consecutive_failures >= config.failure_threshold;
        if flip {
            self.health = RegionHealth::Unhealthy;
            info!(region = %self.id, failures = self.consecutive_failures, "region flipped to unhealthy");
        }
    }

    /// Whether the region has been continuously healthy for at least `window`.
    pub fn healthy_for(&self, window: Duration, now: DateTime<Utc>) -> bool {
        match (self.health, self.healthy_since) {
            (RegionHealth::Healthy, Some(since)) => {
                (now - since).num_milliseconds() >= window.as_millis() as i64
            }
            _ => false,
        }
    }
}

/// Shared view of all regions' observed state.
///
/// Health fields are written only through [`RegionRegistry::apply_probe`];
/// roles change only as the result of a completed promotion.
#[derive(Debug)]
pub struct RegionRegistry {
    inner: Mutex<IndexMap<String, RegionState>>,
}

impl RegionRegistry {
    pub fn from_config(regions: &IndexMap<String, RegionConfig>) -> Self {
        let inner = regions
            .iter()
            .map(|(id, cfg)| (id.clone(), RegionState::new(id.clone(), cfg.role)))
            .collect();
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Record a probe verdict for one region and return its post-hysteresis health.
    pub fn apply_probe(
        &self,
        region_id: &str,
        success: bool,
        config: &ProbeConfig,
        now: DateTime<Utc>,
    ) -> RegionHealth {
        let mut inner = self.inner.lock();
        let Some(state) = inner.get_mut(region_id) else {
            debug!(region = region_id, "probe verdict for unknown region dropped");
            return RegionHealth::Unknown;
        };
        if success {
            state.record_success(config, now);
        } else {
            state.record_failure(config, now);
        }
        state.health
    }

    pub fn get(&self, region_id: &str) -> Option<RegionState> {
        self.inner.lock().get(region_id).cloned()
    }

    pub fn health(&self, region_id: &str) -> RegionHealth {
        self.inner
            .lock()
            .get(region_id)
            .map(|state| state.health)
            .unwrap_or(RegionHealth::Unknown)
    }

    /// Whether the region has been continuously healthy for at least `window`.
    pub fn healthy_for(&self, region_id: &str, window: Duration) -> bool {
        self.inner
            .lock()
            .get(region_id)
            .map(|state| state.healthy_for(window, Utc::now()))
            .unwrap_or(false)
    }

    /// Reassign a region's declared role after a completed promotion.
    pub fn set_role(&self, region_id: &str, role: RegionRole) {
        if let Some(state) = self.inner.lock().get_mut(region_id) {
            state.role = role;
        }
    }

    /// Clone the full set of region states for reporting.
    pub fn snapshot(&self) -> Vec<RegionState> {
        self.inner.lock().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_config() -> ProbeConfig {
        ProbeConfig {
            failure_threshold: 3,
            success_threshold: 2,
            ..ProbeConfig::default()
        }
    }

    fn registry_with(id: &str) -> RegionRegistry {
        let mut regions = IndexMap::new();
        regions.insert(
            id.to_string(),
            RegionConfig {
                role: RegionRole::Secondary,
                description: None,
                health_url: "https://gw/healthz".into(),
                db_control_url: "https://db".into(),
                scaling_url: "https://scale".into(),
                error_rate_url: "https://metrics".into(),
                baseline_replicas: 2,
            },
        );
        RegionRegistry::from_config(&regions)
    }

    #[test]
    fn unknown_until_success_threshold_met() {
        let registry = registry_with("eu-west");
        let config = probe_config();
        let now = Utc::now();
        assert_eq!(
            registry.apply_probe("eu-west", true, &config, now),
            RegionHealth::Unknown
        );
        assert_eq!(
            registry.apply_probe("eu-west", true, &config, now),
            RegionHealth::Healthy
        );
    }

    #[test]
    fn three_failures_flip_to_unhealthy() {
        let registry = registry_with("eu-west");
        let config = probe_config();
        let now = Utc::now();
        registry.apply_probe("eu-west", true, &config, now);
        registry.apply_probe("eu-west", true, &config, now);
        assert_eq!(registry.health("eu-west"), RegionHealth::Healthy);

        registry.apply_probe("eu-west", false, &config, now);
        registry.apply_probe("eu-west", false, &config, now);
        assert_eq!(registry.health("eu-west"), RegionHealth::Healthy);
        registry.apply_probe("eu-west", false, &config, now);
        assert_eq!(registry.health("eu-west"), RegionHealth::Unhealthy);
    }

    #[test]
    fn failure_resets_healthy_streak() {
        let registry = registry_with("eu-west");
        let config = probe_config();
        let now = Utc::now();
        registry.apply_probe("eu-west", true, &config, now);
        registry.apply_probe("eu-west", true, &config, now);
        assert!(registry.get("eu-west").unwrap().healthy_since.is_some());

        registry.apply_probe("eu-west", false, &config, now);
        assert!(registry.get("eu-west").unwrap().healthy_since.is_none());
        assert!(!registry.healthy_for("eu-west", Duration::from_secs(0)));
    }

    #[test]
    fn healthy_for_respects_window() {
        let config = probe_config();
        let registry = registry_with("eu-west");
        let earlier = Utc::now() - chrono::Duration::seconds(400);
        registry.apply_probe("eu-west", true, &config, earlier);
        registry.apply_probe("eu-west", true, &config, earlier);
        assert!(registry.healthy_for("eu-west", Duration::from_secs(300)));
        assert!(!registry.healthy_for("eu-west", Duration::from_secs(500)));
    }
}
