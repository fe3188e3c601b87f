//! Engine configuration: defaults overridable from `TARN_*` environment variables.

use std::time::Duration;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::warn;

use tarn_core::ExactQuantity;

pub const ENV_RESOURCE_PREFIX: &str = "TARN_RESOURCE_PREFIX";
pub const ENV_JOB_FAILURE_LIMIT: &str = "TARN_JOB_FAILURE_LIMIT";
pub const ENV_HEALTH_TIMEOUT_MS: &str = "TARN_HEALTH_TIMEOUT_MS";
pub const ENV_DEFAULT_STORAGE: &str = "TARN_DEFAULT_STORAGE";
pub const ENV_ROUTER_URL: &str = "TARN_ROUTER_URL";
pub const ENV_MAX_YAML_BYTES: &str = "TARN_MAX_YAML_BYTES";
pub const ENV_MAX_YAML_NODES: &str = "TARN_MAX_YAML_NODES";
/// Log filter directives, read by the binary before the engine is built.
pub const ENV_LOG: &str = "TARN_LOG";
/// `host:port` for the Prometheus scrape endpoint; unset disables export.
pub const ENV_METRICS_ADDR: &str = "TARN_METRICS_ADDR";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Prefix of every child object name and label key.
    pub resource_prefix: String,
    pub job_failure_limit: i32,
    pub health_timeout: Duration,
    pub default_storage: Quantity,
    /// Overrides the router address derived from the instance name.
    pub router_url: Option<String>,
    pub limits: InputLimits,
}

/// Bounds on YAML inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputLimits {
    pub max_bytes: usize,
    pub max_nodes: usize,
}

impl Default for InputLimits {
    fn default() -> Self { Self { max_bytes: 1_000_000, max_nodes: 100_000 } }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resource_prefix: tarn_core::naming::DEFAULT_PREFIX.to_string(),
            job_failure_limit: tarn_upgrade::DEFAULT_JOB_FAILURE_LIMIT,
            health_timeout: tarn_health::DEFAULT_TIMEOUT,
            default_storage: tarn_plan::PlanDefaults::default().storage_size,
            router_url: None,
            limits: InputLimits::default(),
        }
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self { Self::from_lookup(|k| std::env::var(k).ok()) }

    /// Build from an arbitrary key lookup; unset or unparsable keys keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(p) = lookup(ENV_RESOURCE_PREFIX).filter(|s| !s.trim().is_empty()) {
            cfg.resource_prefix = p.trim().to_string();
        }
        if let Some(n) = parsed::<i32>(&lookup, ENV_JOB_FAILURE_LIMIT).filter(|n| *n > 0) {
            cfg.job_failure_limit = n;
        }
        if let Some(ms) = parsed::<u64>(&lookup, ENV_HEALTH_TIMEOUT_MS).filter(|ms| *ms > 0) {
            cfg.health_timeout = Duration::from_millis(ms);
        }
        if let Some(q) = parsed::<ExactQuantity>(&lookup, ENV_DEFAULT_STORAGE).filter(ExactQuantity::is_positive) {
            cfg.default_storage = q.to_k8s();
        }
        cfg.router_url = lookup(ENV_ROUTER_URL).filter(|s| !s.trim().is_empty());
        if let Some(n) = parsed::<usize>(&lookup, ENV_MAX_YAML_BYTES) {
            cfg.limits.max_bytes = n;
        }
        if let Some(n) = parsed::<usize>(&lookup, ENV_MAX_YAML_NODES) {
            cfg.limits.max_nodes = n;
        }
        cfg
    }
}
