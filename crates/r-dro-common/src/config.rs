//! ---
//! dro_section: "01-core-functionality"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Shared primitives and utilities for the orchestrator runtime."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_probe_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_success_threshold() -> u32 {
    2
}

fn default_replication_poll() -> Duration {
    Duration::from_secs(30)
}

fn default_max_lag() -> Duration {
    Duration::from_secs(300)
}

fn default_verify_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_verify_poll() -> Duration {
    Duration::from_secs(5)
}

fn default_promote_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_promote_poll() -> Duration {
    Duration::from_secs(5)
}

fn default_canary_steps() -> Vec<u8> {
    vec![10, 25, 50, 75, 100]
}

fn default_canary_dwell() -> Duration {
    Duration::from_secs(300)
}

fn default_error_rate_ceiling() -> f64 {
    0.01
}

fn default_failback_health_window() -> Duration {
    Duration::from_secs(300)
}

fn default_failover_min_replicas() -> u32 {
    2
}

fn default_rto_target() -> Duration {
    Duration::from_secs(900)
}

fn default_rpo_target() -> Duration {
    Duration::from_secs(300)
}

fn default_state_directory() -> PathBuf {
    PathBuf::from("target/state")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    "0.0.0.0:9898"
        .parse()
        .expect("valid default metrics address")
}

/// Primary configuration object for the R-DRO runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Endpoint identifier used when upserting weighted DNS records.
    pub endpoint: String,
    #[serde(default)]
    pub regions: IndexMap<String, RegionConfig>,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub drill: DrillConfig,
    pub dns: DnsConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "R_DRO_CONFIG";

    /// Load configuration from disk, respecting the `R_DRO_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Retrieve a region configuration by identifier.
    pub fn region(&self, region_id: &str) -> Option<&RegionConfig> {
        self.regions.get(region_id)
    }

    /// Identifier of the region declared primary in configuration.
    pub fn declared_primary(&self) -> Option<&str> {
        self.regions
            .iter()
            .find(|(_, region)| matches!(region.role, RegionRole::Primary))
            .map(|(id, _)| id.as_str())
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.regions.len() < 2 {
            return Err(anyhow!(
                "configuration must declare at least two regions (got {})",
                self.regions.len()
            ));
        }
        let primaries = self
            .regions
            .values()
            .filter(|r| matches!(r.role, RegionRole::Primary))
            .count();
        if primaries != 1 {
            return Err(anyhow!(
                "configuration must declare exactly one primary region (got {})",
                primaries
            ));
        }
        for (region_id, region) in &self.regions {
            region.validate(region_id)?;
        }
        self.probe.validate()?;
        self.coordinator.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Declared role of a region within the deployment topology.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegionRole {
    Primary,
    #[default]
    Secondary,
}

/// Static description of one region and its collaborator endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    #[serde(default)]
    pub role: RegionRole,
    #[serde(default)]
    pub description: Option<String>,
    /// Health-check URL for the region's gateway endpoint.
    pub health_url: String,
    /// Database control API base URL (promote command + role query).
    pub db_control_url: String,
    /// Scaling API base URL for the region's services.
    pub scaling_url: String,
    /// Error-rate time-series query URL (trailing 5xx rate).
    pub error_rate_url: String,
    /// Replica count the region runs with under normal load.
    #[serde(default = "default_failover_min_replicas")]
    pub baseline_replicas: u32,
}

impl RegionConfig {
    pub fn validate(&self, region_id: &str) -> Result<()> {
        for (field, value) in [
            ("health_url", &self.health_url),
            ("db_control_url", &self.db_control_url),
            ("scaling_url", &self.scaling_url),
            ("error_rate_url", &self.error_rate_url),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("region '{}' has an empty {}", region_id, field));
            }
        }
        if self.baseline_replicas == 0 {
            return Err(anyhow!(
                "region '{}' must run at least one replica",
                region_id
            ));
        }
        Ok(())
    }
}

/// Health prober timings and hysteresis thresholds.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
    #[serde(default = "default_probe_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
    /// Consecutive failures before a healthy region flips to unhealthy.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive successes before an unhealthy region flips back.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

impl ProbeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err(anyhow!("probe thresholds must be at least 1"));
        }
        Ok(())
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval: default_probe_interval(),
            timeout: default_probe_timeout(),
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
        }
    }
}

/// Replication monitor timings and the failover eligibility lag ceiling.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    #[serde(default = "default_replication_poll")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub poll_interval: Duration,
    /// Maximum tolerated replication lag for a failover target.
    #[serde(default = "default_max_lag")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub max_lag: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_replication_poll(),
            max_lag: default_max_lag(),
        }
    }
}

/// Coordinator sequencing timings, canary plan, and rollback policy knobs.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_verify_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub verify_timeout: Duration,
    #[serde(default = "default_verify_poll")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub verify_poll: Duration,
    #[serde(default = "default_promote_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub promote_timeout: Duration,
    #[serde(default = "default_promote_poll")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub promote_poll: Duration,
    /// Traffic percentages walked during canary failback. Must end at 100.
    #[serde(default = "default_canary_steps")]
    pub canary_steps: Vec<u8>,
    #[serde(default = "default_canary_dwell")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub canary_dwell: Duration,
    /// Error-rate ceiling (fraction, not percent) that aborts a canary.
    #[serde(default = "default_error_rate_ceiling")]
    pub error_rate_ceiling: f64,
    /// How long a recovering region must stay continuously healthy before failback.
    #[serde(default = "default_failback_health_window")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub failback_health_window: Duration,
    /// Floor for the replica count of a region absorbing failed-over load.
    #[serde(default = "default_failover_min_replicas")]
    pub failover_min_replicas: u32,
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.canary_steps.is_empty() {
            return Err(anyhow!("coordinator.canary_steps must not be empty"));
        }
        let mut previous = 0u8;
        for &step in &self.canary_steps {
            if step <= previous || step > 100 {
                return Err(anyhow!(
                    "coordinator.canary_steps must be strictly increasing within 1..=100"
                ));
            }
            previous = step;
        }
        if *self.canary_steps.last().unwrap_or(&0) != 100 {
            return Err(anyhow!("coordinator.canary_steps must end at 100"));
        }
        if !(self.error_rate_ceiling > 0.0 && self.error_rate_ceiling < 1.0) {
            return Err(anyhow!(
                "coordinator.error_rate_ceiling must lie strictly between 0 and 1"
            ));
        }
        Ok(())
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            verify_timeout: default_verify_timeout(),
            verify_poll: default_verify_poll(),
            promote_timeout: default_promote_timeout(),
            promote_poll: default_promote_poll(),
            canary_steps: default_canary_steps(),
            canary_dwell: default_canary_dwell(),
            error_rate_ceiling: default_error_rate_ceiling(),
            failback_health_window: default_failback_health_window(),
            failover_min_replicas: default_failover_min_replicas(),
        }
    }
}

/// Recovery objectives a DR drill is graded against.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrillConfig {
    #[serde(default = "default_rto_target")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub rto_target: Duration,
    #[serde(default = "default_rpo_target")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub rpo_target: Duration,
}

impl Default for DrillConfig {
    fn default() -> Self {
        Self {
            rto_target: default_rto_target(),
            rpo_target: default_rpo_target(),
        }
    }
}

/// DNS provider endpoint for weighted-record upserts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Provider API base URL.
    pub provider_url: String,
    /// Weighted record name updated on traffic shifts.
    pub record_name: String,
}

/// Where the durable failover state, audit log, and drill history live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_state_directory")]
    pub directory: PathBuf,
}

impl PersistenceConfig {
    pub fn state_path(&self) -> PathBuf {
        self.directory.join("failover-state.json")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.directory.join("audit.log")
    }

    pub fn drill_history_path(&self) -> PathBuf {
        self.directory.join("drill-history.log")
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            directory: default_state_directory(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config(extra: &str) -> String {
        format!(
            r#"
endpoint = "gateway.example.com"

[dns]
provider_url = "https://dns.example.com/api"
record_name = "gateway.example.com"

[regions.us-east]
role = "primary"
health_url = "https://gw.us-east.example.com/healthz"
db_control_url = "https://db.us-east.example.com"
scaling_url = "https://scale.us-east.example.com"
error_rate_url = "https://metrics.us-east.example.com/rate"
baseline_replicas = 4

[regions.eu-west]
role = "secondary"
health_url = "https://gw.eu-west.example.com/healthz"
db_control_url = "https://db.eu-west.example.com"
scaling_url = "https://scale.eu-west.example.com"
error_rate_url = "https://metrics.eu-west.example.com/rate"
baseline_replicas = 2
{extra}
"#
        )
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config: AppConfig = sample_config("").parse().unwrap();
        assert_eq!(config.regions.len(), 2);
        assert_eq!(config.declared_primary(), Some("us-east"));
        assert_eq!(config.probe.interval, Duration::from_secs(10));
        assert_eq!(config.probe.failure_threshold, 3);
        assert_eq!(config.replication.max_lag, Duration::from_secs(300));
        assert_eq!(config.coordinator.canary_steps, vec![10, 25, 50, 75, 100]);
        assert_eq!(config.drill.rto_target, Duration::from_secs(900));
    }

    #[test]
    fn rejects_single_region() {
        let toml = r#"
endpoint = "gateway.example.com"

[dns]
provider_url = "https://dns.example.com/api"
record_name = "gateway.example.com"

[regions.only]
role = "primary"
health_url = "https://gw/healthz"
db_control_url = "https://db"
scaling_url = "https://scale"
error_rate_url = "https://metrics"
"#;
        let err = toml.parse::<AppConfig>().unwrap_err();
        assert!(err.to_string().contains("at least two regions"));
    }

    #[test]
    fn rejects_two_primaries() {
        let extra = r#"
[regions.ap-south]
role = "primary"
health_url = "https://gw.ap-south/healthz"
db_control_url = "https://db.ap-south"
scaling_url = "https://scale.ap-south"
error_rate_url = "https://metrics.ap-south"
"#;
        let err = sample_config(extra).parse::<AppConfig>().unwrap_err();
        assert!(err.to_string().contains("exactly one primary"));
    }

    #[test]
    fn rejects_canary_plan_not_ending_at_100() {
        let extra = r#"
[coordinator]
canary_steps = [10, 50]
"#;
        let err = sample_config(extra).parse::<AppConfig>().unwrap_err();
        assert!(err.to_string().contains("end at 100"));
    }

    #[test]
    fn rejects_non_monotonic_canary_plan() {
        let extra = r#"
[coordinator]
canary_steps = [10, 10, 100]
"#;
        let err = sample_config(extra).parse::<AppConfig>().unwrap_err();
        assert!(err.to_string().contains("strictly increasing"));
    }
}
