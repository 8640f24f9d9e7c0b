//! ---
//! dro_section: "03-persistence-logging"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Metrics collection and export utilities."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::response::{IntoResponse, Response};
use axum::Router;
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint. Returns `text/plain` metrics even on large registries.
async fn metrics_handler(registry: SharedRegistry) -> Response {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the failover coordinator and its monitors.
#[derive(Clone, Debug)]
pub struct FailoverMetrics {
    registry: SharedRegistry,
    phase: IntGaugeVec,
    transitions: IntCounterVec,
    probe_failures: IntCounterVec,
    replication_lag: GaugeVec,
    drill_rto_seconds: Histogram,
}

impl FailoverMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let phase = IntGaugeVec::new(
            Opts::new(
                "r_dro_phase",
                "Indicator (0/1) for the coordinator's current phase",
            ),
            &["phase"],
        )?;
        registry.register(Box::new(phase.clone()))?;

        let transitions = IntCounterVec::new(
            Opts::new(
                "r_dro_transitions_total",
                "Count of coordinator state transitions by source and target phase",
            ),
            &["from", "to"],
        )?;
        registry.register(Box::new(transitions.clone()))?;

        let probe_failures = IntCounterVec::new(
            Opts::new(
                "r_dro_probe_failures_total",
                "Count of failed health probes by region",
            ),
            &["region"],
        )?;
        registry.register(Box::new(probe_failures.clone()))?;

        let replication_lag = GaugeVec::new(
            Opts::new(
                "r_dro_replication_lag_seconds",
                "Most recent measured replication lag per secondary region (-1 when unknown)",
            ),
            &["region"],
        )?;
        registry.register(Box::new(replication_lag.clone()))?;

        let buckets = prometheus::exponential_buckets(1.0, 2.0, 12)
            .context("failed to construct histogram buckets")?;
        let drill_rto_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "r_dro_drill_rto_seconds",
                "Measured recovery time objective per DR drill",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(drill_rto_seconds.clone()))?;

        Ok(Self {
            registry,
            phase,
            transitions,
            probe_failures,
            replication_lag,
            drill_rto_seconds,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Mark `phase` as current; all other phase labels should be cleared by
    /// the caller recording the transition.
    pub fn set_phase(&self, phase: &str, active: bool) {
        self.phase
            .with_label_values(&[phase])
            .set(if active { 1 } else { 0 });
    }

    pub fn record_transition(&self, from: &str, to: &str) {
        self.transitions.with_label_values(&[from, to]).inc();
        self.set_phase(from, false);
        self.set_phase(to, true);
    }

    pub fn record_probe_failure(&self, region: &str) {
        self.probe_failures.with_label_values(&[region]).inc();
    }

    pub fn set_replication_lag(&self, region: &str, lag: Option<Duration>) {
        let value = lag.map(|d| d.as_secs_f64()).unwrap_or(-1.0);
        self.replication_lag.with_label_values(&[region]).set(value);
    }

    pub fn observe_drill_rto(&self, rto: Duration) {
        self.drill_rto_seconds.observe(rto.as_secs_f64());
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_updates_counter_and_phase_gauges() {
        let registry = new_registry();
        let metrics = FailoverMetrics::new(registry.clone()).unwrap();

        metrics.record_transition("stable", "detecting");
        metrics.record_transition("detecting", "promoting");

        let families = registry.gather();
        let transitions = families
            .iter()
            .find(|fam| fam.get_name() == "r_dro_transitions_total")
            .expect("transition counter registered");
        assert_eq!(transitions.get_metric().len(), 2);

        let phase = families
            .iter()
            .find(|fam| fam.get_name() == "r_dro_phase")
            .expect("phase gauge registered");
        let active: Vec<_> = phase
            .get_metric()
            .iter()
            .filter(|m| m.get_gauge().get_value() == 1.0)
            .collect();
        assert_eq!(active.len(), 1);
    }
}
