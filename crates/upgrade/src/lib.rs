//! Tarn version orchestrator.
//!
//! Drives the applied image of a platform towards the desired one. Upgrades
//! run a pre-upgrade job, switch the version, then run a post-upgrade job;
//! downgrades and UI image changes are direct cut-overs. The condition set on
//! the status is the only state, and each tick advances at most one phase.

#![forbid(unsafe_code)]

mod job;

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{debug, info, warn};

use tarn_core::{
    ChildSpec, ConditionType, JobChild, JobStage, Naming, Platform, PlatformStatus, Result, Version, VersionPhase,
};

pub use job::{job_name, ObservedJobs};
use job::JobState;

pub const DEFAULT_JOB_FAILURE_LIMIT: i32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Orchestrator {
    failure_limit: i32,
}

impl Default for Orchestrator {
    fn default() -> Self { Self { failure_limit: DEFAULT_JOB_FAILURE_LIMIT } }
}

fn transition(status: &mut PlatformStatus, instance: &str, to: VersionPhase, now: DateTime<Utc>) {
    let from = status.conditions.phase();
    status.conditions.enter_phase(to, now);
    info!(instance, ?from, ?to, "version phase transition");
    counter!("upgrade_transition_total", 1u64);
}

impl Orchestrator {
    /// Number of failed runs after which an upgrade job is given up on.
    pub fn new(failure_limit: i32) -> Self { Self { failure_limit: failure_limit.max(1) } }

    pub fn failure_limit(&self) -> i32 { self.failure_limit }

    /// Run one tick. Mutates `status` and returns the upgrade job children to
    /// keep or create; an empty list means no job object should exist.
    pub fn tick(
        &self,
        platform: &Platform,
        naming: &Naming,
        status: &mut PlatformStatus,
        jobs: &dyn ObservedJobs,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChildSpec>> {
        let spec = &platform.spec;
        let instance = naming.instance.as_str();

        if status.user_interface_image_to_use != spec.user_interface_image {
            info!(instance, from = %status.user_interface_image_to_use, to = %spec.user_interface_image, "switching ui image");
            status.user_interface_image_to_use = spec.user_interface_image.clone();
            return Ok(Vec::new());
        }

        let phase = status.conditions.phase();
        if phase.in_progress() {
            return self.advance(platform, naming, status, jobs, now);
        }
        if phase.is_failed() && spec.image == status.upgrade_target_image {
            return Ok(self.failed(naming, status, phase, jobs));
        }

        let desired = Version::parse(&spec.image)?;
        if status.image_to_use.is_empty() {
            info!(instance, image = %spec.image, "initializing applied image");
            status.image_to_use = spec.image.clone();
            return Ok(Vec::new());
        }
        let current = Version::parse(&status.image_to_use)?;

        match desired.cmp(&current) {
            Ordering::Greater => {
                info!(instance, from = %status.image_to_use, to = %spec.image, "starting upgrade");
                status.upgrade_start_time_millis = now.timestamp_millis();
                status.upgrade_target_image = spec.image.clone();
                transition(status, instance, VersionPhase::PreUpgradePending, now);
                self.advance(platform, naming, status, jobs, now)
            }
            Ordering::Less => {
                info!(instance, from = %status.image_to_use, to = %spec.image, "downgrading");
                status.downgrade_start_time_millis = now.timestamp_millis();
                status.image_to_use = spec.image.clone();
                transition(status, instance, VersionPhase::DowngradeSucceeded, now);
                Ok(Vec::new())
            }
            Ordering::Equal => {
                // desired image moved back to the applied one after a failure
                if phase.is_failed() {
                    transition(status, instance, VersionPhase::Idle, now);
                }
                Ok(Vec::new())
            }
        }
    }

    fn target_image<'a>(&self, platform: &'a Platform, status: &'a PlatformStatus) -> &'a str {
        if status.upgrade_target_image.is_empty() {
            &platform.spec.image
        } else {
            &status.upgrade_target_image
        }
    }

    fn advance(
        &self,
        platform: &Platform,
        naming: &Naming,
        status: &mut PlatformStatus,
        jobs: &dyn ObservedJobs,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChildSpec>> {
        let instance = naming.instance.as_str();
        match status.conditions.phase() {
            VersionPhase::PreUpgradePending => Ok(self.run_job(platform, naming, status, jobs, JobStage::PreUpgrade, now)),
            VersionPhase::PreUpgradeDone => {
                let target = self.target_image(platform, status).to_string();
                info!(instance, from = %status.image_to_use, to = %target, "switching applied image");
                status.image_to_use = target;
                transition(status, instance, VersionPhase::VersionSwitched, now);
                Ok(Vec::new())
            }
            VersionPhase::VersionSwitched => Ok(self.run_job(platform, naming, status, jobs, JobStage::PostUpgrade, now)),
            VersionPhase::PostUpgradeDone => {
                transition(status, instance, VersionPhase::UpgradeSucceeded, now);
                Ok(Vec::new())
            }
            other => {
                debug!(instance, phase = ?other, "no upgrade in progress");
                Ok(Vec::new())
            }
        }
    }

    fn run_job(
        &self,
        platform: &Platform,
        naming: &Naming,
        status: &mut PlatformStatus,
        jobs: &dyn ObservedJobs,
        stage: JobStage,
        now: DateTime<Utc>,
    ) -> Vec<ChildSpec> {
        let instance = naming.instance.as_str();
        let start = status.upgrade_start_time_millis;
        let name = job_name(naming, stage, start);
        let observed = jobs.job(&name);
        match job::classify(observed, self.failure_limit) {
            JobState::Absent => {
                debug!(instance, job = %name, "creating upgrade job");
                let image = self.target_image(platform, status).to_string();
                vec![ChildSpec::Job(JobChild::Create(job::job_spec(platform, naming, stage, &image, start, self.failure_limit)))]
            }
            JobState::Succeeded => {
                let done = match stage {
                    JobStage::PreUpgrade => VersionPhase::PreUpgradeDone,
                    JobStage::PostUpgrade => VersionPhase::PostUpgradeDone,
                };
                transition(status, instance, done, now);
                Vec::new()
            }
            JobState::Failed(failed) => {
                warn!(instance, job = %name, failed, limit = self.failure_limit, "upgrade job failed; giving up");
                counter!("upgrade_failed_total", 1u64);
                let (phase, keep) = match stage {
                    JobStage::PreUpgrade => (VersionPhase::PreUpgradeFailed, false),
                    JobStage::PostUpgrade => (VersionPhase::PostUpgradeFailed, true),
                };
                transition(status, instance, phase, now);
                status.conditions.set_with_message(
                    ConditionType::UpgradeFailed,
                    format!("{} job {} failed {} times; change the desired image to retry", stage.as_str(), name, failed),
                    now,
                );
                keep_job(observed.filter(|_| keep))
            }
            JobState::Running => keep_job(observed),
        }
    }

    /// Terminal failure: nothing moves until the desired image changes.
    fn failed(&self, naming: &Naming, status: &PlatformStatus, phase: VersionPhase, jobs: &dyn ObservedJobs) -> Vec<ChildSpec> {
        debug!(instance = %naming.instance, ?phase, target = %status.upgrade_target_image, "upgrade failed; waiting for a new desired image");
        match phase {
            VersionPhase::PostUpgradeFailed => {
                keep_job(jobs.job(&job_name(naming, JobStage::PostUpgrade, status.upgrade_start_time_millis)))
            }
            _ => Vec::new(),
        }
    }
}

fn keep_job(job: Option<&k8s_openapi::api::batch::v1::Job>) -> Vec<ChildSpec> {
    job.map(|j| ChildSpec::Job(JobChild::Keep(Box::new(j.clone())))).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use k8s_openapi::api::batch::v1::{Job, JobStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;
    use tarn_core::{Error, PlatformSpec};

    fn at(secs: i64) -> DateTime<Utc> { Utc.timestamp_opt(secs, 0).unwrap() }

    fn platform(image: &str) -> Platform {
        let spec = PlatformSpec { image: image.into(), user_interface_image: "ui:1".into(), ..Default::default() };
        Platform::new("demo", spec)
    }

    fn status(image: &str) -> PlatformStatus {
        PlatformStatus { image_to_use: image.into(), user_interface_image_to_use: "ui:1".into(), ..Default::default() }
    }

    fn naming() -> Naming { Naming::new("cdap", "demo", "data") }

    fn job(name: &str, succeeded: i32, failed: i32) -> Job {
        Job {
            metadata: ObjectMeta { name: Some(name.to_string()), ..Default::default() },
            status: Some(JobStatus { succeeded: Some(succeeded), failed: Some(failed), ..Default::default() }),
            ..Default::default()
        }
    }

    fn observe(jobs: &[Job]) -> BTreeMap<String, Job> {
        jobs.iter().map(|j| (j.metadata.name.clone().unwrap_or_default(), j.clone())).collect()
    }

    fn created(out: &[ChildSpec]) -> Option<&tarn_core::UpgradeJobSpec> {
        match out {
            [ChildSpec::Job(JobChild::Create(j))] => Some(j),
            _ => None,
        }
    }

    #[test]
    fn ui_switches_first_and_alone() {
        let o = Orchestrator::default();
        let mut p = platform("img:7.0");
        p.spec.user_interface_image = "ui:2".into();
        let mut s = status("img:6.0");
        let out = o.tick(&p, &naming(), &mut s, &observe(&[]), at(1)).unwrap();
        assert!(out.is_empty());
        assert_eq!(s.user_interface_image_to_use, "ui:2");
        assert_eq!(s.conditions.phase(), VersionPhase::Idle);
        assert_eq!(s.image_to_use, "img:6.0");
    }

    #[test]
    fn first_observation_initializes_without_jobs() {
        let o = Orchestrator::default();
        let mut s = PlatformStatus::default();
        let p = platform("img:6.0");
        o.tick(&p, &naming(), &mut s, &observe(&[]), at(1)).unwrap();
        let out = o.tick(&p, &naming(), &mut s, &observe(&[]), at(2)).unwrap();
        assert!(out.is_empty());
        assert_eq!(s.image_to_use, "img:6.0");
        assert!(s.versions_initialized());
        assert_eq!(s.conditions.phase(), VersionPhase::Idle);
    }

    #[test]
    fn full_upgrade_walk() {
        let o = Orchestrator::default();
        let p = platform("img:6.1.0");
        let n = naming();
        let mut s = status("img:6.0.0");

        let out = o.tick(&p, &n, &mut s, &observe(&[]), at(100)).unwrap();
        let pre = created(&out).unwrap();
        assert_eq!(pre.name, "cdap-demo-pre-upgrade-job-100000");
        assert_eq!(pre.image, "img:6.1.0");
        assert!(s.conditions.is_true(ConditionType::Inprogress));
        assert_eq!(s.upgrade_target_image, "img:6.1.0");

        // running job is kept alive
        let running = job(&pre.name, 0, 1);
        let out = o.tick(&p, &n, &mut s, &observe(&[running]), at(101)).unwrap();
        assert!(matches!(out.as_slice(), [ChildSpec::Job(JobChild::Keep(_))]));

        let out = o.tick(&p, &n, &mut s, &observe(&[job(&pre.name, 1, 1)]), at(102)).unwrap();
        assert!(out.is_empty());
        assert!(s.conditions.is_true(ConditionType::PreUpgradeJobDone));
        assert_eq!(s.image_to_use, "img:6.0.0");

        let out = o.tick(&p, &n, &mut s, &observe(&[]), at(103)).unwrap();
        assert!(out.is_empty());
        assert!(s.conditions.is_true(ConditionType::VersionUpdated));
        assert_eq!(s.image_to_use, "img:6.1.0");

        let out = o.tick(&p, &n, &mut s, &observe(&[]), at(104)).unwrap();
        let post = created(&out).unwrap();
        assert_eq!(post.name, "cdap-demo-post-upgrade-job-100000");
        assert_eq!(post.stage, JobStage::PostUpgrade);

        let out = o.tick(&p, &n, &mut s, &observe(&[job(&post.name, 1, 0)]), at(105)).unwrap();
        assert!(out.is_empty());
        assert!(s.conditions.is_true(ConditionType::PostUpgradeJobDone));

        let out = o.tick(&p, &n, &mut s, &observe(&[]), at(106)).unwrap();
        assert!(out.is_empty());
        assert!(s.conditions.is_true(ConditionType::UpgradeSucceeded));
        assert!(!s.conditions.is_true(ConditionType::Inprogress));
        assert_eq!(s.conditions.phase(), VersionPhase::UpgradeSucceeded);

        // steady state
        let before = s.clone();
        let out = o.tick(&p, &n, &mut s, &observe(&[]), at(107)).unwrap();
        assert!(out.is_empty());
        assert_eq!(s, before);
    }

    #[test]
    fn in_progress_upgrade_ignores_spec_drift() {
        let o = Orchestrator::default();
        let n = naming();
        let mut s = status("img:6.0");
        o.tick(&platform("img:6.1"), &n, &mut s, &observe(&[]), at(10)).unwrap();
        // desired image moves mid-upgrade; the attempt keeps its target
        let out = o.tick(&platform("img:5.0"), &n, &mut s, &observe(&[]), at(11)).unwrap();
        assert_eq!(created(&out).unwrap().image, "img:6.1");
        assert_eq!(s.conditions.phase(), VersionPhase::PreUpgradePending);
    }

    #[test]
    fn pre_upgrade_failure_is_terminal() {
        let o = Orchestrator::default();
        let p = platform("img:6.1");
        let n = naming();
        let mut s = status("img:6.0");
        o.tick(&p, &n, &mut s, &observe(&[]), at(10)).unwrap();
        let name = job_name(&n, JobStage::PreUpgrade, 10_000);

        // below the limit the job keeps running
        let out = o.tick(&p, &n, &mut s, &observe(&[job(&name, 0, 3)]), at(11)).unwrap();
        assert_eq!(out.len(), 1);
        assert!(s.conditions.is_true(ConditionType::Inprogress));

        let out = o.tick(&p, &n, &mut s, &observe(&[job(&name, 0, 4)]), at(12)).unwrap();
        assert!(out.is_empty());
        assert_eq!(s.conditions.phase(), VersionPhase::PreUpgradeFailed);
        assert!(!s.conditions.is_true(ConditionType::Inprogress));
        assert!(s.conditions.get(ConditionType::UpgradeFailed).unwrap().message.contains(&name));

        for t in 13..20 {
            let out = o.tick(&p, &n, &mut s, &observe(&[job(&name, 0, 4)]), at(t)).unwrap();
            assert!(out.is_empty());
            assert_eq!(s.conditions.phase(), VersionPhase::PreUpgradeFailed);
            assert_eq!(s.image_to_use, "img:6.0");
        }
    }

    #[test]
    fn post_upgrade_failure_keeps_the_failed_job() {
        let o = Orchestrator::new(2);
        let p = platform("img:6.1");
        let n = naming();
        let mut s = status("img:6.0");
        s.upgrade_start_time_millis = 5;
        s.upgrade_target_image = "img:6.1".into();
        s.conditions.enter_phase(VersionPhase::VersionSwitched, at(1));
        s.image_to_use = "img:6.1".into();

        let name = job_name(&n, JobStage::PostUpgrade, 5);
        let failed = observe(&[job(&name, 0, 2)]);
        let out = o.tick(&p, &n, &mut s, &failed, at(2)).unwrap();
        assert!(matches!(out.as_slice(), [ChildSpec::Job(JobChild::Keep(j))] if j.metadata.name.as_deref() == Some(name.as_str())));
        assert_eq!(s.conditions.phase(), VersionPhase::PostUpgradeFailed);

        let out = o.tick(&p, &n, &mut s, &failed, at(3)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(s.conditions.phase(), VersionPhase::PostUpgradeFailed);
    }

    #[test]
    fn new_desired_image_restarts_after_failure() {
        let o = Orchestrator::default();
        let n = naming();
        let mut s = status("img:6.0");
        s.upgrade_target_image = "img:6.1".into();
        s.conditions.enter_phase(VersionPhase::PreUpgradeFailed, at(1));

        let out = o.tick(&platform("img:6.2"), &n, &mut s, &observe(&[]), at(50)).unwrap();
        assert_eq!(created(&out).unwrap().name, "cdap-demo-pre-upgrade-job-50000");
        assert_eq!(s.conditions.phase(), VersionPhase::PreUpgradePending);
        assert!(!s.conditions.is_true(ConditionType::UpgradeFailed));

        // reverting to the applied image clears the failure instead
        let mut s = status("img:6.0");
        s.upgrade_target_image = "img:6.1".into();
        s.conditions.enter_phase(VersionPhase::PreUpgradeFailed, at(1));
        let out = o.tick(&platform("img:6.0"), &n, &mut s, &observe(&[]), at(60)).unwrap();
        assert!(out.is_empty());
        assert_eq!(s.conditions.phase(), VersionPhase::Idle);
    }

    #[test]
    fn downgrade_is_a_single_tick() {
        let o = Orchestrator::default();
        let mut s = status("img:6.1");
        let out = o.tick(&platform("img:6.0"), &naming(), &mut s, &observe(&[]), at(30)).unwrap();
        assert!(out.is_empty());
        assert_eq!(s.image_to_use, "img:6.0");
        assert_eq!(s.downgrade_start_time_millis, 30_000);
        assert!(s.conditions.is_true(ConditionType::DowngradeSucceeded));
        assert!(!s.conditions.is_true(ConditionType::Inprogress));
    }

    #[test]
    fn equal_versions_are_a_no_op() {
        let o = Orchestrator::default();
        let mut s = status("img:6.0.0");
        let out = o.tick(&platform("img:6"), &naming(), &mut s, &observe(&[]), at(1)).unwrap();
        assert!(out.is_empty());
        assert_eq!(s.image_to_use, "img:6.0.0");
        assert!(s.conditions.iter().next().is_none());
    }

    #[test]
    fn malformed_images_are_errors() {
        let o = Orchestrator::default();
        let mut s = status("img:6.0");
        let e = o.tick(&platform("img"), &naming(), &mut s, &observe(&[]), at(1)).unwrap_err();
        assert!(matches!(e, Error::VersionParse { .. }));
        let mut s = status("img:6:0");
        assert!(o.tick(&platform("img:7"), &naming(), &mut s, &observe(&[]), at(1)).is_err());
    }
}
