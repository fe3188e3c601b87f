//! Tarn health monitor.
//!
//! Classifies a platform as `Ready`, `Unhealthy` or `Unknown` from the
//! router's status endpoints and records the result as the single true health
//! condition. Transport and decode failures mean `Unknown`; anything that
//! decodes but is not fully up means `Unhealthy`.

#![forbid(unsafe_code)]

mod probe;

use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use tracing::{debug, info};

use tarn_core::{ConditionSet, ConditionType, PlatformSpec};

pub use probe::{system_checks, HttpProbe, ProbeError, ProgramRef, ProgramStatus, StatusProbe, SERVICES_STATUS_PATH, SYSTEM_STATUS_PATH};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const SERVICE_OK: &str = "OK";
const HTTP_OK: i64 = 200;

/// Internal service keys that must report OK for the enabled services.
pub fn tracked_keys(spec: &PlatformSpec) -> Vec<&'static str> {
    spec.enabled_services().into_iter().flat_map(|k| k.status_keys().iter().copied()).collect()
}

/// First tracked key that is missing or not OK.
fn first_unhealthy<'a>(statuses: &BTreeMap<String, String>, tracked: &[&'a str]) -> Option<&'a str> {
    tracked.iter().copied().find(|k| statuses.get(*k).map(String::as_str) != Some(SERVICE_OK))
}

fn system_apps_ok(statuses: &[ProgramStatus], expected: usize) -> bool {
    statuses.len() == expected && statuses.iter().all(|s| s.status_code == HTTP_OK)
}

#[derive(Debug, Clone)]
pub struct HealthMonitor<P = HttpProbe> {
    probe: P,
    timeout: Duration,
}

impl HealthMonitor<HttpProbe> {
    pub fn http(timeout: Duration) -> Result<Self, ProbeError> { Ok(Self::new(HttpProbe::new(timeout)?, timeout)) }
}

impl<P: StatusProbe> HealthMonitor<P> {
    /// `timeout` bounds each probe call; a call that overruns counts as a
    /// transport failure.
    pub fn new(probe: P, timeout: Duration) -> Self { Self { probe, timeout } }

    pub fn timeout(&self) -> Duration { self.timeout }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T, ProbeError>>) -> Result<T, ProbeError> {
        tokio::time::timeout(self.timeout, fut).await.map_err(|_| ProbeError::Timeout(self.timeout))?
    }

    /// Classify the platform behind `router` without touching any conditions.
    pub async fn check(&self, router: &str, tracked: &[&str]) -> ConditionType {
        let services = match self.bounded(self.probe.services_status(router)).await {
            Ok(s) => s,
            Err(e) => {
                debug!(router, error = %e, "service status unavailable");
                return ConditionType::Unknown;
            }
        };
        if let Some(key) = first_unhealthy(&services, tracked) {
            debug!(router, service = key, status = ?services.get(key), "service not ok");
            return ConditionType::Unhealthy;
        }

        let checks = system_checks();
        let apps = match self.bounded(self.probe.system_app_status(router, &checks)).await {
            Ok(a) => a,
            Err(e) => {
                debug!(router, error = %e, "system app status unavailable");
                return ConditionType::Unknown;
            }
        };
        if !system_apps_ok(&apps, checks.len()) {
            debug!(router, entries = apps.len(), "system apps not ok");
            return ConditionType::Unhealthy;
        }
        ConditionType::Ready
    }

    /// Check and record the result as the only true health condition.
    pub async fn refresh(&self, conditions: &mut ConditionSet, router: &str, tracked: &[&str], now: DateTime<Utc>) -> ConditionType {
        let started = Instant::now();
        let outcome = self.check(router, tracked).await;
        histogram!("health_check_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("health_check_total", 1u64);
        if conditions.health() != Some(outcome) {
            info!(router, from = ?conditions.health(), to = %outcome, "health changed");
        }
        conditions.set_health(outcome, now);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use tarn_core::ServiceKind;

    #[derive(Default)]
    struct FakeProbe {
        services: Option<BTreeMap<String, String>>,
        apps: Option<Vec<i64>>,
        stall: bool,
    }

    #[async_trait]
    impl StatusProbe for FakeProbe {
        async fn services_status(&self, _router: &str) -> Result<BTreeMap<String, String>, ProbeError> {
            if self.stall {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            self.services.clone().ok_or_else(|| ProbeError::Transport("connection refused".into()))
        }

        async fn system_app_status(&self, _router: &str, _checks: &[ProgramRef]) -> Result<Vec<ProgramStatus>, ProbeError> {
            let codes = self.apps.clone().ok_or_else(|| ProbeError::Decode("bad json".into()))?;
            Ok(codes.into_iter().map(|c| ProgramStatus { status_code: c, status: None, error: None }).collect())
        }
    }

    fn all_ok(keys: &[&str]) -> BTreeMap<String, String> { keys.iter().map(|k| (k.to_string(), "OK".to_string())).collect() }

    const KEYS: [&str; 2] = ["appfabric", "log.saver"];

    fn monitor(p: FakeProbe) -> HealthMonitor<FakeProbe> { HealthMonitor::new(p, Duration::from_millis(50)) }

    #[tokio::test]
    async fn ready_when_everything_is_up() {
        let m = monitor(FakeProbe { services: Some(all_ok(&KEYS)), apps: Some(vec![200, 200]), ..Default::default() });
        assert_eq!(m.check("http://r", &KEYS).await, ConditionType::Ready);
    }

    #[tokio::test]
    async fn missing_or_failing_services_are_unhealthy() {
        let mut services = all_ok(&KEYS[..1]);
        let m = monitor(FakeProbe { services: Some(services.clone()), apps: Some(vec![200, 200]), ..Default::default() });
        assert_eq!(m.check("http://r", &KEYS).await, ConditionType::Unhealthy);
        services.insert("log.saver".into(), "NOTOK".into());
        let m = monitor(FakeProbe { services: Some(services), apps: Some(vec![200, 200]), ..Default::default() });
        assert_eq!(m.check("http://r", &KEYS).await, ConditionType::Unhealthy);
    }

    #[tokio::test]
    async fn system_apps_must_be_exactly_two_oks() {
        for apps in [vec![200], vec![200, 200, 200], vec![200, 404]] {
            let m = monitor(FakeProbe { services: Some(all_ok(&KEYS)), apps: Some(apps.clone()), ..Default::default() });
            assert_eq!(m.check("http://r", &KEYS).await, ConditionType::Unhealthy, "{:?}", apps);
        }
        let m = monitor(FakeProbe { services: Some(all_ok(&KEYS)), apps: None, ..Default::default() });
        assert_eq!(m.check("http://r", &KEYS).await, ConditionType::Unknown);
    }

    #[tokio::test]
    async fn unreachable_or_stalled_router_is_unknown() {
        let m = monitor(FakeProbe::default());
        assert_eq!(m.check("http://r", &KEYS).await, ConditionType::Unknown);
        let m = monitor(FakeProbe { services: Some(all_ok(&KEYS)), apps: Some(vec![200, 200]), stall: true });
        assert_eq!(m.check("http://r", &KEYS).await, ConditionType::Unknown);
    }

    #[tokio::test]
    async fn refresh_keeps_exactly_one_health_condition() {
        let now = Utc.timestamp_opt(1, 0).unwrap();
        let mut set = ConditionSet::new();
        let ready = monitor(FakeProbe { services: Some(all_ok(&KEYS)), apps: Some(vec![200, 200]), ..Default::default() });
        let down = monitor(FakeProbe::default());
        assert_eq!(ready.refresh(&mut set, "http://r", &KEYS, now).await, ConditionType::Ready);
        assert_eq!(down.refresh(&mut set, "http://r", &KEYS, now).await, ConditionType::Unknown);
        let n = ConditionType::HEALTH.into_iter().filter(|c| set.is_true(*c)).count();
        assert_eq!(n, 1);
        assert_eq!(set.health(), Some(ConditionType::Unknown));
    }

    #[test]
    fn tracked_keys_follow_enabled_services() {
        let mut spec = PlatformSpec::default();
        let keys = tracked_keys(&spec);
        assert!(keys.contains(&"dataset.executor"));
        assert!(!keys.contains(&"runtime"));
        spec.runtime = Some(Default::default());
        assert!(tracked_keys(&spec).contains(&"runtime"));
        assert!(ServiceKind::Router.status_keys().is_empty());
    }
}
