//! ---
//! dro_section: "05-external-interfaces"
//! dro_subsection: "binary"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Operator CLI for failover, failback, drills, and status."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
//! Wires configuration into live collaborators: HTTP adapters, monitors,
//! durable state, the coordinator, and the optional metrics exporter.
use std::sync::Arc;

use anyhow::Result;
use indexmap::IndexMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use r_dro_adapters::{
    CapacityScaler, DnsWeightManager, HttpDatabaseControl, HttpDnsProvider, HttpErrorRateSignal,
    HttpScalingApi, PromotionController,
};
use r_dro_common::config::AppConfig;
use r_dro_coordinator::{Collaborators, Coordinator};
use r_dro_metrics::{new_registry, spawn_http_server, FailoverMetrics, MetricsServer};
use r_dro_monitor::{
    HealthProber, HttpCommitTimestampSource, HttpHealthEndpoint, RegionRegistry, ReplicationMonitor,
};
use r_dro_persistence::{AuditLogWriter, StateStore};

/// One wired-up orchestrator instance for the duration of a CLI command.
pub struct Runtime {
    pub config: AppConfig,
    pub registry: Arc<RegionRegistry>,
    pub replication: Arc<ReplicationMonitor>,
    pub prober: Arc<HealthProber>,
    pub dns: Arc<DnsWeightManager>,
    pub coordinator: Arc<Coordinator>,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    metrics_server: Option<MetricsServer>,
}

impl Runtime {
    /// Build all collaborators from configuration and start the background
    /// probe and replication tasks.
    pub async fn start(config: AppConfig) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        let timeout = config.probe.timeout;

        let db_urls: IndexMap<String, String> = config
            .regions
            .iter()
            .map(|(id, region)| (id.clone(), region.db_control_url.clone()))
            .collect();
        let scaling_urls: IndexMap<String, String> = config
            .regions
            .iter()
            .map(|(id, region)| (id.clone(), region.scaling_url.clone()))
            .collect();
        let rate_urls: IndexMap<String, String> = config
            .regions
            .iter()
            .map(|(id, region)| (id.clone(), region.error_rate_url.clone()))
            .collect();

        let mut failover_metrics = None;
        let mut metrics_server = None;
        if config.metrics.enabled {
            let metrics_registry = new_registry();
            failover_metrics = Some(FailoverMetrics::new(metrics_registry.clone())?);
            metrics_server = Some(spawn_http_server(metrics_registry, config.metrics.listen)?);
        }

        let registry = Arc::new(RegionRegistry::from_config(&config.regions));
        let mut prober = HealthProber::new(
            Arc::new(HttpHealthEndpoint::new(client.clone())),
            registry.clone(),
            &config.regions,
            config.probe.clone(),
        );
        if let Some(metrics) = &failover_metrics {
            prober = prober.with_metrics(metrics.clone());
        }
        let prober = Arc::new(prober);
        let mut replication = ReplicationMonitor::new(Arc::new(HttpCommitTimestampSource::new(
            client.clone(),
            db_urls.clone(),
            timeout,
        )));
        if let Some(metrics) = &failover_metrics {
            replication = replication.with_metrics(metrics.clone());
        }
        let replication = Arc::new(replication);

        let dns = Arc::new(DnsWeightManager::new(
            Arc::new(HttpDnsProvider::new(
                client.clone(),
                config.dns.provider_url.clone(),
                timeout,
            )),
            config.dns.record_name.clone(),
        ));
        let promotion = Arc::new(PromotionController::new(
            Arc::new(HttpDatabaseControl::new(client.clone(), db_urls, timeout)),
            config.coordinator.promote_timeout,
            config.coordinator.promote_poll,
        ));
        let scaler = Arc::new(CapacityScaler::new(Arc::new(HttpScalingApi::new(
            client.clone(),
            scaling_urls,
            timeout,
        ))));
        let error_rate = Arc::new(HttpErrorRateSignal::new(client, rate_urls, timeout));

        let store = StateStore::new(config.persistence.state_path());
        let audit = AuditLogWriter::open(&config.persistence.audit_path())?;
        let collaborators = Collaborators {
            registry: registry.clone(),
            replication: replication.clone(),
            dns: dns.clone(),
            promotion,
            scaler,
            error_rate,
        };
        let mut coordinator = Coordinator::open(&config, collaborators, store, audit)?;
        if let Some(metrics) = failover_metrics {
            coordinator = coordinator.with_metrics(metrics);
        }
        let coordinator = Arc::new(coordinator);

        let (shutdown, _) = broadcast::channel(1);
        let mut tasks = prober.clone().spawn_tasks(&shutdown);
        let active = coordinator.state().active_region;
        let pairs: Vec<(String, String)> = config
            .regions
            .keys()
            .filter(|id| **id != active)
            .map(|id| (active.clone(), id.clone()))
            .collect();
        tasks.extend(replication.clone().spawn_tasks(
            pairs,
            config.replication.poll_interval,
            &shutdown,
        ));

        Ok(Self {
            config,
            registry,
            replication,
            prober,
            dns,
            coordinator,
            shutdown,
            tasks,
            metrics_server,
        })
    }

    /// Take enough direct readings for the coordinator's guards to have
    /// fresh data: a full hysteresis round of probes per region plus one lag
    /// sample per secondary.
    pub async fn warm_up(&self) {
        for _ in 0..self.config.probe.success_threshold {
            for region in self.config.regions.keys() {
                if let Err(err) = self.prober.probe(region).await {
                    debug!(region = %region, error = %err, "warm-up probe failed");
                }
            }
        }
        let active = self.coordinator.state().active_region;
        for region in self.config.regions.keys().filter(|id| **id != active) {
            self.replication.compute_lag(&active, region).await;
        }
    }

    /// Stop background tasks and the metrics exporter.
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.shutdown.send(());
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        if let Some(server) = self.metrics_server.take() {
            server.shutdown().await?;
        }
        Ok(())
    }
}
