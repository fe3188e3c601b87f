//! Upgrade job naming, specs and observed job classification.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::Job;
use tarn_core::{JobStage, Naming, Platform, UpgradeJobSpec};

/// Read access to the jobs observed in the previous tick, by object name.
pub trait ObservedJobs {
    fn job(&self, name: &str) -> Option<&Job>;
}

impl ObservedJobs for BTreeMap<String, Job> {
    fn job(&self, name: &str) -> Option<&Job> { self.get(name) }
}

impl<T: ObservedJobs + ?Sized> ObservedJobs for &T {
    fn job(&self, name: &str) -> Option<&Job> { (**self).job(name) }
}

/// `<prefix>-<instance>-<stage>-job-<startMillis>`; each attempt gets fresh names.
pub fn job_name(naming: &Naming, stage: JobStage, start_millis: i64) -> String {
    naming.object_name(&format!("{}-job-{}", stage.as_str(), start_millis))
}

pub(crate) fn job_spec(
    platform: &Platform,
    naming: &Naming,
    stage: JobStage,
    image: &str,
    start_millis: i64,
    failure_limit: i32,
) -> UpgradeJobSpec {
    let mut labels = naming.instance_labels();
    labels.insert(format!("{}.upgrade-stage", naming.prefix), stage.as_str().to_string());
    UpgradeJobSpec {
        name: job_name(naming, stage, start_millis),
        stage,
        image: image.to_string(),
        args: vec![tarn_core::UPGRADE_JOB_MAIN.to_string(), format!("--phase={}", stage.as_str())],
        backoff_limit: (failure_limit - 1).max(0),
        labels,
        service_account_name: platform.spec.service_account_name.clone().filter(|s| !s.is_empty()),
        config_name: naming.config_name(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobState {
    Absent,
    Succeeded,
    Failed(i32),
    Running,
}

pub(crate) fn classify(job: Option<&Job>, failure_limit: i32) -> JobState {
    let Some(job) = job else { return JobState::Absent };
    let status = job.status.as_ref();
    let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0);
    let failed = status.and_then(|s| s.failed).unwrap_or(0);
    if succeeded >= 1 {
        JobState::Succeeded
    } else if failed >= failure_limit {
        JobState::Failed(failed)
    } else {
        JobState::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::JobStatus;

    fn job(succeeded: Option<i32>, failed: Option<i32>) -> Job {
        Job { status: Some(JobStatus { succeeded, failed, ..Default::default() }), ..Default::default() }
    }

    #[test]
    fn names_carry_stage_and_start_time() {
        let n = Naming::new("cdap", "demo", "data");
        assert_eq!(job_name(&n, JobStage::PreUpgrade, 1700), "cdap-demo-pre-upgrade-job-1700");
        assert_eq!(job_name(&n, JobStage::PostUpgrade, 1700), "cdap-demo-post-upgrade-job-1700");
    }

    #[test]
    fn classification() {
        assert_eq!(classify(None, 4), JobState::Absent);
        assert_eq!(classify(Some(&Job::default()), 4), JobState::Running);
        assert_eq!(classify(Some(&job(Some(1), Some(3))), 4), JobState::Succeeded);
        assert_eq!(classify(Some(&job(None, Some(3))), 4), JobState::Running);
        assert_eq!(classify(Some(&job(None, Some(4))), 4), JobState::Failed(4));
    }

    #[test]
    fn spec_runs_upgrade_main_with_phase() {
        let mut p = Platform::new("demo", Default::default());
        p.spec.service_account_name = Some("sa".into());
        let n = Naming::new("cdap", "demo", "data");
        let j = job_spec(&p, &n, JobStage::PostUpgrade, "img:7", 42, 4);
        assert_eq!(j.args, vec![tarn_core::UPGRADE_JOB_MAIN.to_string(), "--phase=post-upgrade".to_string()]);
        assert_eq!(j.backoff_limit, 3);
        assert_eq!(j.service_account_name.as_deref(), Some("sa"));
        assert_eq!(j.config_name, "cdap-demo-cconf");
        assert_eq!(j.labels.get("cdap.upgrade-stage").map(String::as_str), Some("post-upgrade"));
    }
}
