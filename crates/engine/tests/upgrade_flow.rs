#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tarn_core::{ChildSpec, ConditionType, JobChild, Platform, PlatformSpec, PlatformStatus, UpgradeJobSpec, VersionPhase};
use tarn_engine::{Engine, EngineConfig, InputLimits, ObservedObjects, TickInput, TickOutcome};
use tarn_health::{ProbeError, ProgramRef, ProgramStatus, StatusProbe};

struct AllUp;

#[async_trait]
impl StatusProbe for AllUp {
    async fn services_status(&self, _router: &str) -> Result<BTreeMap<String, String>, ProbeError> {
        let keys = ["appfabric", "dataset.executor", "log.saver", "messaging.service", "metadata.service", "metrics", "metrics.processor"];
        Ok(keys.iter().map(|k| (k.to_string(), "OK".to_string())).collect())
    }

    async fn system_app_status(&self, _router: &str, checks: &[ProgramRef]) -> Result<Vec<ProgramStatus>, ProbeError> {
        Ok(checks.iter().map(|_| ProgramStatus { status_code: 200, status: Some("RUNNING".into()), error: None }).collect())
    }
}

fn at(secs: i64) -> DateTime<Utc> { Utc.timestamp_opt(secs, 0).unwrap() }

fn platform(image: &str) -> Platform {
    let spec = PlatformSpec { image: image.into(), user_interface_image: "gcr.io/cdap/ui:6.9".into(), num_pods: Some(2), ..Default::default() };
    let mut p = Platform::new("demo", spec);
    p.metadata.namespace = Some("data".into());
    p
}

fn job_yaml(name: &str, succeeded: i32, failed: i32) -> String {
    format!("apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: {name}\nstatus:\n  succeeded: {succeeded}\n  failed: {failed}\n")
}

async fn tick(e: &Engine<AllUp>, p: &Platform, status: PlatformStatus, observed: &ObservedObjects, secs: i64) -> TickOutcome {
    e.reconcile(TickInput { platform: p, status, observed, now: at(secs) }).await.unwrap()
}

fn jobs(out: &TickOutcome) -> Vec<&ChildSpec> { out.children.iter().filter(|c| matches!(c, ChildSpec::Job(_))).collect() }

/// The single job creation request of a tick.
fn created(out: &TickOutcome) -> &UpgradeJobSpec {
    assert_eq!(jobs(out).len(), 1, "expected exactly one job child");
    out.children
        .iter()
        .find_map(|c| match c {
            ChildSpec::Job(JobChild::Create(j)) => Some(j),
            _ => None,
        })
        .expect("job creation request")
}

#[tokio::test]
async fn upgrade_runs_to_completion_across_ticks() {
    let e = Engine::with_probe(EngineConfig::default(), AllUp);
    let none = ObservedObjects::new();
    let old = platform("gcr.io/cdap/sandbox:6.9.0");

    let out = tick(&e, &old, PlatformStatus::default(), &none, 1).await;
    let out = tick(&e, &old, out.status, &none, 2).await;
    assert_eq!(out.health, Some(ConditionType::Ready));
    assert_eq!(out.status.conditions.phase(), VersionPhase::Idle);

    let new = platform("gcr.io/cdap/sandbox:6.10.0");
    let out = tick(&e, &new, out.status, &none, 10).await;
    let pre = created(&out);
    assert_eq!(pre.name, "cdap-demo-pre-upgrade-job-10000");
    // services keep running the old image until the switch
    let group = out.children.iter().find_map(ChildSpec::as_group).unwrap();
    assert_eq!(group.containers[0].image.as_deref(), Some("gcr.io/cdap/sandbox:6.9.0"));

    let seen = ObservedObjects::from_yaml(&job_yaml(&pre.name, 0, 1), &InputLimits::default()).unwrap();
    let out = tick(&e, &new, out.status.clone(), &seen, 11).await;
    assert!(matches!(jobs(&out)[..], [ChildSpec::Job(JobChild::Keep(_))]));

    let seen = ObservedObjects::from_yaml(&job_yaml(&pre.name, 1, 1), &InputLimits::default()).unwrap();
    let out = tick(&e, &new, out.status, &seen, 12).await;
    assert!(jobs(&out).is_empty());
    assert_eq!(out.status.conditions.phase(), VersionPhase::PreUpgradeDone);

    let out = tick(&e, &new, out.status, &none, 13).await;
    assert_eq!(out.status.conditions.phase(), VersionPhase::VersionSwitched);
    let group = out.children.iter().find_map(ChildSpec::as_group).unwrap();
    assert_eq!(group.containers[0].image.as_deref(), Some("gcr.io/cdap/sandbox:6.10.0"));

    let out = tick(&e, &new, out.status, &none, 14).await;
    let post = created(&out);
    assert_eq!(post.name, "cdap-demo-post-upgrade-job-10000");

    let seen = ObservedObjects::from_yaml(&job_yaml(&post.name, 1, 0), &InputLimits::default()).unwrap();
    let out = tick(&e, &new, out.status.clone(), &seen, 15).await;
    let out = tick(&e, &new, out.status, &none, 16).await;
    assert_eq!(out.status.conditions.phase(), VersionPhase::UpgradeSucceeded);
    assert!(!out.status.conditions.is_true(ConditionType::Inprogress));
    assert_eq!(out.health, Some(ConditionType::Ready));
    assert!(!out.status.conditions.is_true(ConditionType::ReconcileFailed));
}

#[tokio::test]
async fn exhausted_pre_upgrade_job_parks_the_upgrade() {
    let cfg = EngineConfig { job_failure_limit: 2, ..Default::default() };
    let e = Engine::with_probe(cfg, AllUp);
    let none = ObservedObjects::new();
    let status = PlatformStatus {
        image_to_use: "gcr.io/cdap/sandbox:6.9.0".into(),
        user_interface_image_to_use: "gcr.io/cdap/ui:6.9".into(),
        ..Default::default()
    };
    let new = platform("gcr.io/cdap/sandbox:6.10.0");
    let out = tick(&e, &new, status, &none, 20).await;
    let pre = created(&out);
    assert_eq!(pre.backoff_limit, 1);

    let seen = ObservedObjects::from_yaml(&job_yaml(&pre.name, 0, 2), &InputLimits::default()).unwrap();
    let mut out = tick(&e, &new, out.status.clone(), &seen, 21).await;
    for t in 22..26 {
        assert_eq!(out.status.conditions.phase(), VersionPhase::PreUpgradeFailed);
        assert!(jobs(&out).is_empty());
        out = tick(&e, &new, out.status, &seen, t).await;
    }
    assert_eq!(out.status.image_to_use, "gcr.io/cdap/sandbox:6.9.0");
}

#[tokio::test]
async fn downgrade_switches_in_one_tick() {
    let e = Engine::with_probe(EngineConfig::default(), AllUp);
    let none = ObservedObjects::new();
    let status = PlatformStatus {
        image_to_use: "gcr.io/cdap/sandbox:6.10.0".into(),
        user_interface_image_to_use: "gcr.io/cdap/ui:6.9".into(),
        ..Default::default()
    };
    let out = tick(&e, &platform("gcr.io/cdap/sandbox:6.9.0"), status, &none, 30).await;
    assert!(jobs(&out).is_empty());
    assert_eq!(out.status.image_to_use, "gcr.io/cdap/sandbox:6.9.0");
    assert_eq!(out.status.conditions.phase(), VersionPhase::DowngradeSucceeded);
}
