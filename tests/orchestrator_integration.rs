//! ---
//! dro_section: "07-testing-qa"
//! dro_subsection: "integration-tests"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "End-to-end failover, reconciliation, and drill tests."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
//! Full-stack scenarios driven against in-process fakes: real coordinator,
//! real persistence on disk, real drill grading; only the collaborator HTTP
//! edges are substituted.
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;

use r_dro_adapters::{
    AdapterError, CapacityScaler, DatabaseControl, DbRole, DnsProvider, DnsWeightManager,
    ErrorRateSignal, PromotionController, RetryPolicy, ScalingApi, TrafficWeights,
};
use r_dro_common::config::AppConfig;
use r_dro_coordinator::{Collaborators, Coordinator, FailoverState, Phase};
use r_dro_drill::DrillVerifier;
use r_dro_monitor::{CommitTimestampSource, RegionRegistry, ReplicationMonitor};
use r_dro_persistence::{replay_audit_log, AuditEvent, AuditLogWriter, DrillHistory, StateStore};

struct FakeDns {
    current: Mutex<Option<TrafficWeights>>,
    history: Mutex<Vec<TrafficWeights>>,
}

impl FakeDns {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(None),
            history: Mutex::new(Vec::new()),
        })
    }

    fn weight_of(&self, region: &str) -> u8 {
        self.current
            .lock()
            .as_ref()
            .map(|weights| weights.get(region))
            .unwrap_or(0)
    }
}

#[async_trait]
impl DnsProvider for FakeDns {
    async fn upsert(&self, _record: &str, weights: &TrafficWeights) -> r_dro_adapters::Result<()> {
        *self.current.lock() = Some(weights.clone());
        self.history.lock().push(weights.clone());
        Ok(())
    }

    async fn current(&self, _record: &str) -> r_dro_adapters::Result<Option<TrafficWeights>> {
        Ok(self.current.lock().clone())
    }
}

struct FakeDb {
    roles: Mutex<IndexMap<String, DbRole>>,
    promote_calls: AtomicU32,
    /// Role queries a started promotion takes to converge.
    converge_after: AtomicU32,
}

impl FakeDb {
    fn new(primary: &str, replica: &str) -> Arc<Self> {
        Arc::new(Self {
            roles: Mutex::new(IndexMap::from([
                (primary.to_owned(), DbRole::Primary),
                (replica.to_owned(), DbRole::Replica),
            ])),
            promote_calls: AtomicU32::new(0),
            converge_after: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl DatabaseControl for FakeDb {
    async fn role(&self, region: &str) -> r_dro_adapters::Result<DbRole> {
        let mut roles = self.roles.lock();
        let role = roles
            .get(region)
            .copied()
            .ok_or_else(|| AdapterError::UnknownRegion(region.to_owned()))?;
        if role == DbRole::Replica && self.promote_calls.load(Ordering::SeqCst) > 0 {
            let remaining = self.converge_after.load(Ordering::SeqCst);
            if remaining == 0 {
                roles.insert(region.to_owned(), DbRole::Primary);
                return Ok(DbRole::Primary);
            }
            self.converge_after.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(role)
    }

    async fn begin_promotion(&self, _region: &str) -> r_dro_adapters::Result<()> {
        self.promote_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeScaling {
    counts: Mutex<IndexMap<String, u32>>,
}

#[async_trait]
impl ScalingApi for FakeScaling {
    async fn replicas(&self, region: &str) -> r_dro_adapters::Result<u32> {
        self.counts
            .lock()
            .get(region)
            .copied()
            .ok_or_else(|| AdapterError::UnknownRegion(region.to_owned()))
    }

    async fn set_replicas(&self, region: &str, count: u32) -> r_dro_adapters::Result<()> {
        self.counts.lock().insert(region.to_owned(), count);
        Ok(())
    }
}

struct FakeRates {
    script: Mutex<VecDeque<r_dro_adapters::Result<f64>>>,
}

#[async_trait]
impl ErrorRateSignal for FakeRates {
    async fn sample(&self, _region: &str) -> r_dro_adapters::Result<f64> {
        self.script.lock().pop_front().unwrap_or(Ok(0.0))
    }
}

struct FakeClocks {
    clocks: Mutex<IndexMap<String, DateTime<Utc>>>,
}

#[async_trait]
impl CommitTimestampSource for FakeClocks {
    async fn last_commit(&self, region: &str) -> r_dro_monitor::Result<DateTime<Utc>> {
        self.clocks
            .lock()
            .get(region)
            .copied()
            .ok_or_else(|| r_dro_monitor::MonitorError::UnknownRegion(region.to_owned()))
    }
}

struct World {
    coordinator: Arc<Coordinator>,
    dns: Arc<FakeDns>,
    db: Arc<FakeDb>,
    scaling: Arc<FakeScaling>,
    clocks: Arc<FakeClocks>,
    registry: Arc<RegionRegistry>,
    replication: Arc<ReplicationMonitor>,
    config: AppConfig,
}

fn test_config() -> AppConfig {
    let mut config: AppConfig = r#"
endpoint = "gateway.example.com"

[dns]
provider_url = "https://dns.example.com/api"
record_name = "gateway.example.com"

[regions.us-east]
role = "primary"
health_url = "https://gw.us-east/healthz"
db_control_url = "https://db.us-east"
scaling_url = "https://scale.us-east"
error_rate_url = "https://metrics.us-east"
baseline_replicas = 4

[regions.eu-west]
role = "secondary"
health_url = "https://gw.eu-west/healthz"
db_control_url = "https://db.eu-west"
scaling_url = "https://scale.eu-west"
error_rate_url = "https://metrics.eu-west"
baseline_replicas = 2
"#
    .parse()
    .unwrap();
    config.coordinator.verify_timeout = Duration::from_millis(200);
    config.coordinator.verify_poll = Duration::from_millis(5);
    config.coordinator.promote_timeout = Duration::from_millis(500);
    config.coordinator.promote_poll = Duration::from_millis(20);
    config.coordinator.canary_dwell = Duration::from_millis(2);
    config.coordinator.failback_health_window = Duration::from_millis(50);
    config
}

/// Build a live world over `dir`; state and audit files persist there, so a
/// second build over the same directory is a process restart.
fn build_world(dir: &Path, rates: Vec<r_dro_adapters::Result<f64>>) -> World {
    let config = test_config();
    let dns = FakeDns::new();
    let db = FakeDb::new("us-east", "eu-west");
    let scaling = Arc::new(FakeScaling {
        counts: Mutex::new(IndexMap::from([
            ("us-east".to_owned(), 4u32),
            ("eu-west".to_owned(), 2u32),
        ])),
    });
    let clocks = Arc::new(FakeClocks {
        clocks: Mutex::new(IndexMap::new()),
    });

    let fast = RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    };
    let registry = Arc::new(RegionRegistry::from_config(&config.regions));
    let replication = Arc::new(ReplicationMonitor::new(clocks.clone()));
    let collaborators = Collaborators {
        registry: registry.clone(),
        replication: replication.clone(),
        dns: Arc::new(
            DnsWeightManager::new(dns.clone(), config.dns.record_name.clone())
                .with_retry(fast.clone()),
        ),
        promotion: Arc::new(
            PromotionController::new(
                db.clone(),
                config.coordinator.promote_timeout,
                config.coordinator.promote_poll,
            )
            .with_retry(fast.clone()),
        ),
        scaler: Arc::new(CapacityScaler::new(scaling.clone()).with_retry(fast)),
        error_rate: Arc::new(FakeRates {
            script: Mutex::new(rates.into()),
        }),
    };

    let store = StateStore::new(dir.join("failover-state.json"));
    let audit = AuditLogWriter::open(&dir.join("audit.log")).unwrap();
    let coordinator =
        Arc::new(Coordinator::open(&config, collaborators, store, audit).unwrap());

    World {
        coordinator,
        dns,
        db,
        scaling,
        clocks,
        registry,
        replication,
        config,
    }
}

fn mark_healthy(world: &World, region: &str, since_secs_ago: i64) {
    let when = Utc::now() - chrono::Duration::seconds(since_secs_ago);
    world.registry.apply_probe(region, true, &world.config.probe, when);
    world.registry.apply_probe(region, true, &world.config.probe, when);
}

async fn seed_lag(world: &World, primary: &str, secondary: &str, lag_secs: i64) {
    let now = Utc::now();
    {
        let mut clocks = world.clocks.clocks.lock();
        clocks.insert(primary.to_owned(), now);
        clocks.insert(secondary.to_owned(), now - chrono::Duration::seconds(lag_secs));
    }
    world.replication.compute_lag(primary, secondary).await;
}

fn drill_verifier(world: &World, dir: &Path) -> DrillVerifier {
    DrillVerifier::new(
        world.coordinator.clone(),
        world.replication.clone(),
        DrillHistory::new(dir.join("drill-history.log")),
        world.config.drill.clone(),
    )
}

#[tokio::test]
async fn full_failover_persists_state_and_audit_trail() {
    let dir = tempfile::tempdir().unwrap();
    let world = build_world(dir.path(), Vec::new());
    mark_healthy(&world, "eu-west", 0);
    seed_lag(&world, "us-east", "eu-west", 30).await;

    let state = world.coordinator.failover("eu-west").await.unwrap();
    assert_eq!(state.phase, Phase::FailedOver);
    assert_eq!(world.dns.weight_of("eu-west"), 100);
    assert_eq!(world.scaling.counts.lock().get("eu-west"), Some(&2));

    // durable state survives independently of the in-memory coordinator
    let reloaded: FailoverState = StateStore::new(dir.path().join("failover-state.json"))
        .load()
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.phase, Phase::FailedOver);
    assert_eq!(reloaded.active_region, "eu-west");

    let mut transitions = Vec::new();
    let mut guards = Vec::new();
    replay_audit_log(&dir.path().join("audit.log"), |record| {
        match record.event {
            AuditEvent::Transition { from, to, .. } => transitions.push((from, to)),
            AuditEvent::GuardEvaluated { guard, passed, .. } => guards.push((guard, passed)),
            _ => {}
        }
        Ok(())
    })
    .unwrap();
    assert_eq!(transitions.first().unwrap(), &("stable".into(), "detecting".into()));
    assert_eq!(
        transitions.last().unwrap(),
        &("verifying".into(), "failed_over".into())
    );
    assert!(guards.contains(&("standby_healthy".into(), true)));
    assert!(guards.contains(&("replication_lag".into(), true)));
}

#[tokio::test]
async fn restart_mid_scaling_completes_without_rerunning_promotion() {
    let dir = tempfile::tempdir().unwrap();

    // A previous process died after shifting DNS, mid-scaling.
    let mut interrupted = FailoverState::initial("us-east", "eu-west");
    interrupted.phase = Phase::Scaling;
    StateStore::new(dir.path().join("failover-state.json"))
        .save(&interrupted)
        .unwrap();

    let world = build_world(dir.path(), Vec::new());
    *world.dns.current.lock() =
        Some(TrafficWeights::exclusive("eu-west", ["us-east", "eu-west"]).unwrap());
    mark_healthy(&world, "eu-west", 0);

    let state = world.coordinator.resume().await.unwrap();
    assert_eq!(state.phase, Phase::FailedOver);
    assert_eq!(state.active_region, "eu-west");
    assert_eq!(world.db.promote_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn drill_grades_measured_rto_and_rpo() {
    let dir = tempfile::tempdir().unwrap();
    let world = build_world(dir.path(), Vec::new());
    mark_healthy(&world, "eu-west", 0);
    // primary committed at T, secondary at T-90s
    seed_lag(&world, "us-east", "eu-west", 90).await;
    // promotion converges after 4 role polls at 20ms: a known recovery delay
    world.db.converge_after.store(4, Ordering::SeqCst);

    let verifier = drill_verifier(&world, dir.path());
    let result = verifier.run("eu-west", false).await.unwrap();

    assert_eq!(result.rpo_seconds, Some(90));
    assert!(result.rpo_met);
    let rto = result.rto_seconds.unwrap();
    assert!(rto >= 0.06, "rto {rto} should include the convergence delay");
    assert!(rto < 2.0, "rto {rto} should stay near the synthetic delay");
    assert!(result.rto_met);
    assert!(result.passed);

    let history: Vec<r_dro_drill::DrillResult> =
        DrillHistory::new(dir.path().join("drill-history.log"))
            .read_all()
            .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].drill_id, result.drill_id);
}

#[tokio::test]
async fn drill_with_unknown_lag_yields_failed_result_not_error() {
    let dir = tempfile::tempdir().unwrap();
    let world = build_world(dir.path(), Vec::new());
    mark_healthy(&world, "eu-west", 0);
    // no replication sample at all: the failover guard fails closed

    let verifier = drill_verifier(&world, dir.path());
    let result = verifier.run("eu-west", false).await.unwrap();

    assert!(!result.passed);
    assert_eq!(result.rpo_seconds, None);
    assert_eq!(result.rto_seconds, None);
    assert!(result.narrative.contains("did not complete"));
    assert_eq!(world.coordinator.state().phase, Phase::Stable);
}

#[tokio::test]
async fn drill_with_failback_reports_secondary_duration() {
    let dir = tempfile::tempdir().unwrap();
    let world = build_world(dir.path(), Vec::new());
    mark_healthy(&world, "eu-west", 10);
    mark_healthy(&world, "us-east", 100);
    seed_lag(&world, "us-east", "eu-west", 30).await;
    // reverse direction, consulted by the failback guard after roles swap
    seed_lag(&world, "eu-west", "us-east", 10).await;

    let verifier = drill_verifier(&world, dir.path());
    let result = verifier.run("eu-west", true).await.unwrap();

    assert!(result.passed);
    assert!(result.failback_seconds.is_some());
    let state = world.coordinator.state();
    assert_eq!(state.phase, Phase::Stable);
    assert_eq!(state.active_region, "us-east");
}

#[tokio::test]
async fn canary_breach_ends_with_recovering_region_at_zero() {
    let dir = tempfile::tempdir().unwrap();
    // clean samples at 10% and 25%, breach at 50%
    let world = build_world(dir.path(), vec![Ok(0.002), Ok(0.003), Ok(0.05)]);
    mark_healthy(&world, "eu-west", 10);
    mark_healthy(&world, "us-east", 100);
    seed_lag(&world, "us-east", "eu-west", 30).await;

    world.coordinator.failover("eu-west").await.unwrap();
    seed_lag(&world, "eu-west", "us-east", 5).await;

    let err = world.coordinator.failback().await.unwrap_err();
    assert!(err.to_string().contains("above ceiling"));
    assert_eq!(world.coordinator.state().phase, Phase::Aborted);
    assert_eq!(world.dns.weight_of("us-east"), 0);
    assert_eq!(world.dns.weight_of("eu-west"), 100);
}
