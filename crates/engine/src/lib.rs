//! Tarn engine: one reconciliation tick for one platform instance.
//!
//! A tick is a function of (desired spec, observed child objects, persisted
//! status) to (desired child specs, new status). It runs the version
//! orchestrator, plans the topology against the versions the orchestrator
//! settled on, and refreshes health once there is something deployed.
//! Ticks for the same instance must be serialized by the caller.

#![forbid(unsafe_code)]

pub mod config;
pub mod observed;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{debug, info, warn};

use tarn_core::{ChildSpec, ConditionType, Naming, Platform, PlatformStatus};
use tarn_health::{tracked_keys, HealthMonitor, HttpProbe, ProbeError, StatusProbe};
use tarn_plan::{PlanDefaults, Planner};
use tarn_upgrade::Orchestrator;

pub use config::{EngineConfig, InputLimits};
pub use observed::{load_platform, load_status, LoadError, ObservedObjects};

/// Inputs of one tick.
#[derive(Debug, Clone)]
pub struct TickInput<'a> {
    pub platform: &'a Platform,
    /// Status persisted by the previous tick.
    pub status: PlatformStatus,
    pub observed: &'a ObservedObjects,
    pub now: DateTime<Utc>,
}

impl<'a> TickInput<'a> {
    /// Take the persisted status from the platform object itself.
    pub fn new(platform: &'a Platform, observed: &'a ObservedObjects, now: DateTime<Utc>) -> Self {
        Self { platform, status: platform.status.clone().unwrap_or_default(), observed, now }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub status: PlatformStatus,
    /// Desired children; anything observed but not listed should be removed.
    pub children: Vec<ChildSpec>,
    /// Health recorded this tick; `None` until versions are initialized.
    pub health: Option<ConditionType>,
}

/// A failed tick. `status` is the input status with `ReconcileFailed` set and
/// no other change; no children are produced.
#[derive(Debug, thiserror::Error)]
#[error("reconcile failed: {error}")]
pub struct TickFailure {
    pub status: PlatformStatus,
    #[source]
    pub error: tarn_core::Error,
}

#[derive(Debug)]
pub struct Engine<P = HttpProbe> {
    config: EngineConfig,
    planner: Planner,
    orchestrator: Orchestrator,
    health: HealthMonitor<P>,
}

impl Engine<HttpProbe> {
    pub fn new(config: EngineConfig) -> Result<Self, ProbeError> {
        let probe = HttpProbe::new(config.health_timeout)?;
        Ok(Self::with_probe(config, probe))
    }
}

impl<P: StatusProbe> Engine<P> {
    pub fn with_probe(config: EngineConfig, probe: P) -> Self {
        let defaults = PlanDefaults { storage_size: config.default_storage.clone(), ..PlanDefaults::default() };
        Self {
            planner: Planner::new(tarn_plan::DeploymentPlan::standard(), defaults),
            orchestrator: Orchestrator::new(config.job_failure_limit),
            health: HealthMonitor::new(probe, config.health_timeout),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig { &self.config }

    pub fn planner(&self) -> &Planner { &self.planner }

    pub fn naming(&self, platform: &Platform) -> tarn_core::Result<Naming> { Naming::for_platform(platform, &self.config.resource_prefix) }

    /// Address of the router status API for this instance.
    pub fn router_url(&self, platform: &Platform, naming: &Naming) -> String {
        match &self.config.router_url {
            Some(url) => url.clone(),
            None => format!(
                "http://{}.{}:{}",
                naming.object_name(tarn_core::ServiceKind::Router.name()),
                naming.namespace,
                tarn_plan::router_port(platform)
            ),
        }
    }

    pub async fn reconcile(&self, input: TickInput<'_>) -> Result<TickOutcome, TickFailure> {
        counter!("reconcile_total", 1u64);
        let mut status = input.status.clone();
        match self.run(&input, &mut status).await {
            Ok((children, health)) => {
                status.conditions.clear(ConditionType::ReconcileFailed, input.now);
                debug!(children = children.len(), ?health, phase = ?status.conditions.phase(), "tick complete");
                Ok(TickOutcome { status, children, health })
            }
            Err(error) => {
                counter!("reconcile_err", 1u64);
                warn!(instance = ?input.platform.metadata.name, %error, "tick failed");
                let mut status = input.status;
                status.conditions.set_with_message(ConditionType::ReconcileFailed, error.to_string(), input.now);
                Err(TickFailure { status, error })
            }
        }
    }

    async fn run(&self, input: &TickInput<'_>, status: &mut PlatformStatus) -> tarn_core::Result<(Vec<ChildSpec>, Option<ConditionType>)> {
        let platform = input.platform;
        let naming = self.naming(platform)?;
        let jobs = self.orchestrator.tick(platform, &naming, status, input.observed, input.now)?;
        let mut children = self.planner.plan(platform, &naming, status)?;
        if children.is_empty() {
            info!(instance = %naming.instance, "versions not initialized; skipping health");
            return Ok((jobs, None));
        }
        let router = self.router_url(platform, &naming);
        let tracked = tracked_keys(&platform.spec);
        let health = self.health.refresh(&mut status.conditions, &router, &tracked, input.now).await;
        children.extend(jobs);
        Ok((children, Some(health)))
    }
}
