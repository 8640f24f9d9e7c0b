//! ---
//! dro_section: "04-failover-coordination"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Failover coordinator state machine and rollback policy."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use r_dro_adapters::{
    CapacityScaler, DnsWeightManager, ErrorRateSignal, PromotionController, TrafficWeights,
};
use r_dro_common::config::{AppConfig, CoordinatorConfig, RegionConfig, RegionRole, ReplicationConfig};
use r_dro_metrics::FailoverMetrics;
use r_dro_monitor::{RegionHealth, RegionRegistry, ReplicationMonitor};
use r_dro_persistence::{AuditEvent, AuditLogWriter, StateStore};

use crate::{CoordinatorError, FailoverState, Phase, Result};

/// The adapters and monitors a [`Coordinator`] drives. Trait objects sit at
/// every seam so tests can substitute in-process fakes.
pub struct Collaborators {
    pub registry: Arc<RegionRegistry>,
    pub replication: Arc<ReplicationMonitor>,
    pub dns: Arc<DnsWeightManager>,
    pub promotion: Arc<PromotionController>,
    pub scaler: Arc<CapacityScaler>,
    pub error_rate: Arc<dyn ErrorRateSignal>,
}

/// Which step of the failover sequence to start from. Reconciliation after
/// a restart may skip steps whose effects are already visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SequenceStart {
    Promote,
    Scale,
}

/// Sequences failover and failback, owns the durable [`FailoverState`], and
/// records every decision in the audit log.
pub struct Coordinator {
    coordinator_cfg: CoordinatorConfig,
    replication_cfg: ReplicationConfig,
    regions: IndexMap<String, RegionConfig>,
    collaborators: Collaborators,
    store: StateStore,
    audit: Mutex<AuditLogWriter>,
    state: Mutex<FailoverState>,
    abort: Notify,
    metrics: Option<FailoverMetrics>,
}

impl Coordinator {
    /// Bind the coordinator to its durable state, loading a previously
    /// persisted `FailoverState` or initialising one from the declared
    /// topology. Call [`Coordinator::resume`] afterwards to reconcile an
    /// interrupted sequence.
    pub fn open(
        config: &AppConfig,
        collaborators: Collaborators,
        store: StateStore,
        audit: AuditLogWriter,
    ) -> Result<Self> {
        let state = match store.load::<FailoverState>()? {
            Some(state) => {
                info!(phase = %state.phase, active = %state.active_region, "restored persisted state");
                state
            }
            None => {
                let active = config.declared_primary().ok_or(CoordinatorError::Guard {
                    guard: "topology",
                    detail: "no primary region declared".into(),
                })?;
                let standby = config
                    .regions
                    .keys()
                    .find(|id| id.as_str() != active)
                    .ok_or(CoordinatorError::Guard {
                        guard: "topology",
                        detail: "no standby region declared".into(),
                    })?;
                let state = FailoverState::initial(active, standby.clone());
                store.save(&state)?;
                state
            }
        };
        Ok(Self {
            coordinator_cfg: config.coordinator.clone(),
            replication_cfg: config.replication.clone(),
            regions: config.regions.clone(),
            collaborators,
            store,
            audit: Mutex::new(audit),
            state: Mutex::new(state),
            abort: Notify::new(),
            metrics: None,
        })
    }

    /// Attach a metrics family; transitions are recorded from then on.
    pub fn with_metrics(mut self, metrics: FailoverMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Snapshot of the current state for reporting.
    pub fn state(&self) -> FailoverState {
        self.state.lock().clone()
    }

    /// Cancel an in-flight canary dwell; the attempt ends `Aborted` with the
    /// recovering region's weight reverted to zero.
    pub fn request_abort(&self) {
        self.abort.notify_waiters();
    }

    /// Fail over to `target`. Returns once the machine reaches `FailedOver`,
    /// or with the error that ended the attempt.
    pub async fn failover(&self, target: &str) -> Result<FailoverState> {
        if !self.regions.contains_key(target) {
            return Err(CoordinatorError::UnknownRegion(target.to_owned()));
        }

        // Claim the machine in one critical section: the phase moves to
        // `Detecting` before the lock drops, so a concurrent request can
        // never also observe a claimable phase.
        let (prior, snapshot, attempt) = {
            let mut state = self.state.lock();
            match state.phase {
                Phase::Stable => {}
                Phase::Aborted | Phase::RolledBack if !state.failed_over => {}
                phase if phase.is_terminal() => {
                    return Err(CoordinatorError::BadPhase {
                        required: "stable",
                        actual: phase,
                    })
                }
                phase => return Err(CoordinatorError::InProgress { phase }),
            }
            if state.active_region == target {
                return Err(CoordinatorError::Guard {
                    guard: "target",
                    detail: format!("region '{target}' is already active"),
                });
            }
            let prior = state.clone();
            let attempt = Uuid::new_v4();
            state.phase = Phase::Detecting;
            state.phase_entered_at = Utc::now();
            state.attempt = Some(attempt);
            state.standby_region = target.to_owned();
            (prior, state.clone(), attempt)
        };
        let from_region = prior.active_region.clone();
        self.finish_transition(prior.phase, snapshot, None)?;
        info!(attempt = %attempt, from = %from_region, to = target, "failover attempt started");

        // Structural guards. Refusal has no external side effects; the
        // machine returns to the phase it was claimed from.
        let health = self.collaborators.registry.health(target);
        let standby_healthy = health == RegionHealth::Healthy;
        self.record(AuditEvent::GuardEvaluated {
            guard: "standby_healthy".into(),
            passed: standby_healthy,
            detail: format!("region '{target}' health is {health:?}"),
        });
        if !standby_healthy {
            return Err(self.refuse(&prior, "standby_healthy", format!(
                "region '{target}' is not healthy ({health:?})"
            ))?);
        }

        let latest = self.collaborators.replication.latest(target);
        let lag_ok = latest
            .as_ref()
            .map(|status| status.within(self.replication_cfg.max_lag))
            .unwrap_or(false);
        let lag_detail = match &latest {
            Some(status) => format!("lag {:?}, maximum {}s", status.lag, self.replication_cfg.max_lag.as_secs()),
            None => "no replication sample available".to_owned(),
        };
        self.record(AuditEvent::GuardEvaluated {
            guard: "replication_lag".into(),
            passed: lag_ok,
            detail: lag_detail.clone(),
        });
        if !lag_ok {
            return Err(self.refuse(&prior, "replication_lag", lag_detail)?);
        }

        self.run_failover_sequence(&from_region, target, SequenceStart::Promote)
            .await
    }

    /// Walk traffic back to the recovering region through the canary plan,
    /// then promote it and return to `Stable`.
    pub async fn failback(&self) -> Result<FailoverState> {
        // Same single-critical-section claim as failover: the machine is in
        // `Detecting` before any other request can look at the phase.
        let (prior, snapshot, attempt) = {
            let mut state = self.state.lock();
            match state.phase {
                Phase::FailedOver => {}
                Phase::Aborted if state.failed_over => {}
                phase if phase.is_terminal() => {
                    return Err(CoordinatorError::BadPhase {
                        required: "failed_over",
                        actual: phase,
                    })
                }
                phase => return Err(CoordinatorError::InProgress { phase }),
            }
            let prior = state.clone();
            let attempt = Uuid::new_v4();
            state.phase = Phase::Detecting;
            state.phase_entered_at = Utc::now();
            state.attempt = Some(attempt);
            (prior, state.clone(), attempt)
        };
        let active = prior.active_region.clone();
        let recovering = prior.standby_region.clone();
        self.finish_transition(prior.phase, snapshot, None)?;
        info!(attempt = %attempt, recovering = %recovering, "failback attempt started");

        let window = self.coordinator_cfg.failback_health_window;
        let healthy_long_enough = self.collaborators.registry.healthy_for(&recovering, window);
        self.record(AuditEvent::GuardEvaluated {
            guard: "recovering_health_window".into(),
            passed: healthy_long_enough,
            detail: format!(
                "region '{recovering}' continuously healthy for {}s required",
                window.as_secs()
            ),
        });
        if !healthy_long_enough {
            return Err(self.refuse(&prior, "recovering_health_window", format!(
                "region '{recovering}' has not been healthy for the last {}s",
                window.as_secs()
            ))?);
        }

        let latest = self.collaborators.replication.latest(&recovering);
        let lag_ok = latest
            .as_ref()
            .map(|status| status.within(self.replication_cfg.max_lag))
            .unwrap_or(false);
        let lag_detail = match &latest {
            Some(status) => format!("reverse lag {:?}, maximum {}s", status.lag, self.replication_cfg.max_lag.as_secs()),
            None => "no reverse replication sample available".to_owned(),
        };
        self.record(AuditEvent::GuardEvaluated {
            guard: "reverse_replication_lag".into(),
            passed: lag_ok,
            detail: lag_detail.clone(),
        });
        if !lag_ok {
            return Err(self.refuse(&prior, "reverse_replication_lag", lag_detail)?);
        }

        let steps = self.coordinator_cfg.canary_steps.clone();
        for step in steps {
            self.transition(Phase::Canary(step), None)?;
            let weights = TrafficWeights::split(&recovering, step, &active)?;
            let outcome = self.collaborators.dns.set_weights(weights).await;
            self.record_call("dns.upsert", Some(&recovering), &outcome);
            if let Err(err) = outcome {
                return Err(self
                    .abort_failback(&active, format!("weight shift to {step}% failed: {err}"))
                    .await);
            }

            let abort_requested = tokio::select! {
                _ = self.abort.notified() => true,
                _ = tokio::time::sleep(self.coordinator_cfg.canary_dwell) => false,
            };
            if abort_requested {
                return Err(self
                    .abort_failback(&active, format!("abort requested during {step}% dwell"))
                    .await);
            }

            let sample = self.collaborators.error_rate.sample(&recovering).await;
            self.record_call("error_rate.sample", Some(&recovering), &sample);
            match sample {
                Ok(rate) if rate <= self.coordinator_cfg.error_rate_ceiling => {
                    debug!(region = %recovering, rate, step, "canary step clean");
                }
                Ok(rate) => {
                    return Err(self
                        .abort_failback(
                            &active,
                            format!(
                                "error rate {rate:.4} above ceiling {:.4} at {step}%",
                                self.coordinator_cfg.error_rate_ceiling
                            ),
                        )
                        .await)
                }
                // A signal that cannot be read cannot prove the canary safe.
                Err(err) => {
                    return Err(self
                        .abort_failback(&active, format!("error-rate sample failed at {step}%: {err}"))
                        .await)
                }
            }
        }

        let outcome = self.collaborators.promotion.promote(&recovering).await;
        self.record_call("db.promote", Some(&recovering), &outcome);
        if let Err(err) = outcome {
            return Err(self
                .abort_failback(&active, format!("promotion of recovering region failed: {err}"))
                .await);
        }

        self.collaborators.registry.set_role(&recovering, RegionRole::Primary);
        self.collaborators.registry.set_role(&active, RegionRole::Secondary);
        {
            let mut state = self.state.lock();
            state.active_region = recovering.clone();
            state.standby_region = active.clone();
            state.failed_over = false;
            state.last_error = None;
        }
        let snapshot = self.transition(Phase::Stable, None)?;
        info!(region = %recovering, "failback complete");
        Ok(snapshot)
    }

    /// Reconcile against reality after a restart.
    ///
    /// A failover interrupted mid-sequence is completed from the earliest
    /// step still outstanding; promotion is never re-driven when the weights
    /// already point at the standby. An interrupted canary is not resumed:
    /// the recovering region's weight is reverted to zero and the machine
    /// parks back in `FailedOver` for the operator to retry.
    pub async fn resume(&self) -> Result<FailoverState> {
        let state = self.state.lock().clone();
        match state.phase {
            phase if phase.is_terminal() => Ok(state),
            Phase::Detecting => {
                let back_to = if state.failed_over {
                    Phase::FailedOver
                } else {
                    Phase::Stable
                };
                info!(phase = %back_to, "interrupted before any external action; attempt discarded");
                self.transition(
                    back_to,
                    Some("restart during detection, attempt discarded".into()),
                )
            }
            Phase::Canary(weight) => {
                warn!(weight, "restart interrupted a canary; reverting recovering region to 0");
                let active = state.active_region.clone();
                match TrafficWeights::exclusive(&active, self.region_ids()) {
                    Ok(weights) => {
                        let outcome = self.collaborators.dns.set_weights(weights).await;
                        self.record_call("dns.upsert", Some(&active), &outcome);
                        if let Err(err) = outcome {
                            error!(error = %err, "failed to revert weights while reconciling");
                        }
                    }
                    Err(err) => error!(error = %err, "failed to build revert weight set"),
                }
                self.transition(
                    Phase::FailedOver,
                    Some(format!("restart interrupted canary at {weight}%; weight reverted to 0")),
                )
            }
            _ => {
                let from_region = state.active_region.clone();
                let target = state.standby_region.clone();
                let current = self.collaborators.dns.current().await;
                self.record_call("dns.current", None, &current);
                let weights_point_at_target =
                    matches!(&current, Ok(Some(weights)) if weights.get(&target) == 100);
                let start = if weights_point_at_target {
                    info!(target = %target, "weights already shifted; skipping promotion and dns steps");
                    SequenceStart::Scale
                } else {
                    SequenceStart::Promote
                };
                self.run_failover_sequence(&from_region, &target, start).await
            }
        }
    }

    /// Explicitly shrink a region's capacity. Refused outside `Stable`.
    pub async fn scale_down(&self, region: &str, desired: u32) -> Result<()> {
        {
            let state = self.state.lock();
            if state.phase != Phase::Stable {
                return Err(CoordinatorError::BadPhase {
                    required: "stable",
                    actual: state.phase,
                });
            }
        }
        if !self.regions.contains_key(region) {
            return Err(CoordinatorError::UnknownRegion(region.to_owned()));
        }
        let outcome = self.collaborators.scaler.scale_to(region, desired).await;
        self.record_call("scale.scale_to", Some(region), &outcome);
        Ok(outcome?)
    }

    /// Record a finished drill in the audit log and, when the failover
    /// completed, its measured recovery time in the RTO histogram.
    pub fn record_drill(&self, drill_id: Uuid, passed: bool, rto: Option<Duration>) {
        self.record(AuditEvent::DrillCompleted { drill_id, passed });
        if let (Some(metrics), Some(rto)) = (&self.metrics, rto) {
            metrics.observe_drill_rto(rto);
        }
    }

    async fn run_failover_sequence(
        &self,
        from_region: &str,
        target: &str,
        start: SequenceStart,
    ) -> Result<FailoverState> {
        if start <= SequenceStart::Promote {
            self.transition(Phase::Promoting, None)?;
            let outcome = self.collaborators.promotion.promote(target).await;
            self.record_call("db.promote", Some(target), &outcome);
            if let Err(err) = outcome {
                // Nothing externally visible has changed yet; abort is free.
                let detail = format!("promotion of '{target}' failed: {err}");
                self.transition(Phase::Aborted, Some(detail.clone()))?;
                return Err(CoordinatorError::Aborted { detail });
            }

            self.transition(Phase::ShiftingDns, None)?;
            let weights = TrafficWeights::exclusive(target, self.region_ids())?;
            let outcome = self.collaborators.dns.set_weights(weights).await;
            self.record_call("dns.upsert", Some(target), &outcome);
            if let Err(err) = outcome {
                return Err(self
                    .rollback_or_escalate(from_region, format!("weight shift to '{target}' failed: {err}"))
                    .await);
            }
        }

        self.transition(Phase::Scaling, None)?;
        let baseline = self
            .regions
            .get(target)
            .map(|region| region.baseline_replicas)
            .ok_or_else(|| CoordinatorError::UnknownRegion(target.to_owned()))?;
        let minimum = baseline.max(self.coordinator_cfg.failover_min_replicas);
        let outcome = self.collaborators.scaler.ensure_at_least(target, minimum).await;
        self.record_call("scale.ensure_at_least", Some(target), &outcome);
        if let Err(err) = outcome {
            return Err(self
                .rollback_or_escalate(from_region, format!("scaling '{target}' to {minimum} failed: {err}"))
                .await);
        }

        self.transition(Phase::Verifying, None)?;
        let deadline = Instant::now() + self.coordinator_cfg.verify_timeout;
        loop {
            if self.collaborators.registry.health(target) == RegionHealth::Healthy {
                break;
            }
            if Instant::now() >= deadline {
                return Err(self
                    .rollback_or_escalate(
                        from_region,
                        format!(
                            "region '{target}' did not verify healthy within {}s",
                            self.coordinator_cfg.verify_timeout.as_secs()
                        ),
                    )
                    .await);
            }
            tokio::time::sleep(self.coordinator_cfg.verify_poll).await;
        }

        self.collaborators.registry.set_role(target, RegionRole::Primary);
        self.collaborators.registry.set_role(from_region, RegionRole::Secondary);
        {
            let mut state = self.state.lock();
            state.active_region = target.to_owned();
            state.standby_region = from_region.to_owned();
            state.failed_over = true;
            state.last_error = None;
        }
        let snapshot = self.transition(Phase::FailedOver, None)?;
        info!(region = target, "failover complete; traffic serving from new region");
        Ok(snapshot)
    }

    /// Rollback policy for failures after the DNS shift: restore the previous
    /// region's weights when it is still healthy, otherwise park in
    /// `Verifying` and hand the decision to an operator.
    async fn rollback_or_escalate(&self, from_region: &str, detail: String) -> CoordinatorError {
        if self.collaborators.registry.health(from_region) == RegionHealth::Healthy {
            // The switchover may have demoted the previous region's store;
            // traffic must not land back on a replica.
            let outcome = self.collaborators.promotion.promote(from_region).await;
            self.record_call("db.promote", Some(from_region), &outcome);
            if let Err(err) = outcome {
                let detail = format!("{detail}; re-promotion of '{from_region}' failed: {err}");
                return self.park_for_escalation(detail);
            }
            match TrafficWeights::exclusive(from_region, self.region_ids()) {
                Ok(weights) => {
                    let outcome = self.collaborators.dns.set_weights(weights).await;
                    self.record_call("dns.upsert", Some(from_region), &outcome);
                    match outcome {
                        Ok(()) => {
                            warn!(restored = from_region, detail = %detail, "rolled back to previous region");
                            if let Err(err) = self.transition(Phase::RolledBack, Some(detail.clone())) {
                                error!(error = %err, "failed to persist rolled-back state");
                            }
                            return CoordinatorError::RolledBack {
                                restored: from_region.to_owned(),
                                detail,
                            };
                        }
                        Err(err) => {
                            let detail = format!("{detail}; weight restore also failed: {err}");
                            return self.park_for_escalation(detail);
                        }
                    }
                }
                Err(err) => {
                    let detail = format!("{detail}; could not build restore weight set: {err}");
                    return self.park_for_escalation(detail);
                }
            }
        }
        self.park_for_escalation(format!(
            "{detail}; previous region '{from_region}' is not healthy either"
        ))
    }

    fn park_for_escalation(&self, detail: String) -> CoordinatorError {
        error!(detail = %detail, "no safe rollback available; operator decision required");
        if let Err(err) = self.transition(Phase::Verifying, Some(detail.clone())) {
            error!(error = %err, "failed to persist escalation state");
        }
        CoordinatorError::Escalation { detail }
    }

    /// Guard refusal: put back the phase, standby, and attempt the claim
    /// overwrote, so a refused attempt leaves the state untouched apart
    /// from `last_error`. Always returns the `Guard` error.
    fn refuse(
        &self,
        prior: &FailoverState,
        guard: &'static str,
        detail: String,
    ) -> Result<CoordinatorError> {
        let text = format!("guard '{guard}': {detail}");
        let (from, snapshot) = {
            let mut state = self.state.lock();
            let from = state.phase;
            state.phase = prior.phase;
            state.phase_entered_at = Utc::now();
            state.standby_region = prior.standby_region.clone();
            state.attempt = prior.attempt;
            state.last_error = Some(text.clone());
            (from, state.clone())
        };
        self.finish_transition(from, snapshot, Some(text))?;
        Ok(CoordinatorError::Guard { guard, detail })
    }

    fn transition(&self, to: Phase, error_text: Option<String>) -> Result<FailoverState> {
        let (from, snapshot) = {
            let mut state = self.state.lock();
            let from = state.phase;
            state.phase = to;
            state.phase_entered_at = Utc::now();
            if error_text.is_some() {
                state.last_error = error_text.clone();
            }
            (from, state.clone())
        };
        self.finish_transition(from, snapshot, error_text)
    }

    /// Persist and announce a phase change already applied under the lock.
    fn finish_transition(
        &self,
        from: Phase,
        snapshot: FailoverState,
        error_text: Option<String>,
    ) -> Result<FailoverState> {
        self.store.save(&snapshot)?;
        self.record(AuditEvent::Transition {
            from: from.to_string(),
            to: snapshot.phase.to_string(),
            attempt: snapshot.attempt,
            error: error_text,
        });
        if let Some(metrics) = &self.metrics {
            metrics.record_transition(&from.to_string(), &snapshot.phase.to_string());
        }
        debug!(from = %from, to = %snapshot.phase, "phase transition");
        Ok(snapshot)
    }

    async fn abort_failback(&self, active: &str, detail: String) -> CoordinatorError {
        warn!(detail = %detail, "failback aborted; reverting recovering region weight to 0");
        match TrafficWeights::exclusive(active, self.region_ids()) {
            Ok(weights) => {
                let outcome = self.collaborators.dns.set_weights(weights).await;
                self.record_call("dns.upsert", Some(active), &outcome);
                if let Err(err) = outcome {
                    error!(error = %err, "failed to revert weights during abort");
                }
            }
            Err(err) => error!(error = %err, "failed to build revert weight set"),
        }
        if let Err(err) = self.transition(Phase::Aborted, Some(detail.clone())) {
            error!(error = %err, "failed to persist aborted state");
        }
        CoordinatorError::Aborted { detail }
    }

    fn region_ids(&self) -> Vec<&str> {
        self.regions.keys().map(String::as_str).collect()
    }

    /// Audit appends are best-effort: a gap in the log is preferable to
    /// stalling a half-finished control action.
    fn record(&self, event: AuditEvent) {
        if let Err(err) = self.audit.lock().append(event) {
            error!(error = %err, "failed to append audit event");
        }
    }

    fn record_call<T>(&self, call: &str, region: Option<&str>, outcome: &r_dro_adapters::Result<T>) {
        let text = match outcome {
            Ok(_) => "ok".to_owned(),
            Err(err) => err.to_string(),
        };
        self.record(AuditEvent::CollaboratorCall {
            call: call.to_owned(),
            region: region.map(str::to_owned),
            outcome: text,
        });
    }
}
