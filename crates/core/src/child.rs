//! Desired child object specifications produced by a reconciliation tick.
//!
//! These are structured inputs for a manifest renderer; they are rebuilt on
//! every tick and never persisted.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::Serialize;

use crate::service::ServiceKind;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageClaim {
    pub storage_class_name: Option<String>,
    pub size: Quantity,
}

/// A set of colocated services sharing one pod template.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadGroupSpec {
    /// Object name (`<prefix>-<instance>-<group>`).
    pub name: String,
    /// Group name from the deployment plan.
    pub group: String,
    pub services: Vec<ServiceKind>,
    pub replicas: i32,
    pub labels: BTreeMap<String, String>,
    pub service_account_name: Option<String>,
    pub node_selector: BTreeMap<String, String>,
    pub runtime_class_name: Option<String>,
    pub priority_class_name: Option<String>,
    pub init_containers: Vec<Container>,
    pub containers: Vec<Container>,
    /// Persistent claim; only set for stateful groups.
    pub storage: Option<StorageClaim>,
    /// Config bundle mounted into every container.
    pub config_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkServiceSpec {
    pub name: String,
    pub endpoint: String,
    pub target: ServiceKind,
    pub service_type: String,
    pub port: i32,
    pub labels: BTreeMap<String, String>,
    pub selector: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStage {
    PreUpgrade,
    PostUpgrade,
}

impl JobStage {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStage::PreUpgrade => "pre-upgrade",
            JobStage::PostUpgrade => "post-upgrade",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeJobSpec {
    pub name: String,
    pub stage: JobStage,
    pub image: String,
    pub args: Vec<String>,
    pub backoff_limit: i32,
    pub labels: BTreeMap<String, String>,
    pub service_account_name: Option<String>,
    pub config_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum JobChild {
    /// Job to create.
    Create(UpgradeJobSpec),
    /// Observed job kept alive unchanged.
    Keep(Box<Job>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigBundleSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "spec")]
pub enum ChildSpec {
    Stateful(WorkloadGroupSpec),
    Stateless(WorkloadGroupSpec),
    Network(NetworkServiceSpec),
    Job(JobChild),
    Config(ConfigBundleSpec),
}

impl ChildSpec {
    pub fn name(&self) -> &str {
        match self {
            ChildSpec::Stateful(g) | ChildSpec::Stateless(g) => &g.name,
            ChildSpec::Network(n) => &n.name,
            ChildSpec::Job(JobChild::Create(j)) => &j.name,
            ChildSpec::Job(JobChild::Keep(j)) => j.metadata.name.as_deref().unwrap_or(""),
            ChildSpec::Config(c) => &c.name,
        }
    }

    /// Identifier of the template a renderer uses for this child.
    pub fn template_id(&self) -> &'static str {
        match self {
            ChildSpec::Stateful(_) => "cdap-sts.yaml",
            ChildSpec::Stateless(_) => "cdap-deployment.yaml",
            ChildSpec::Network(_) => "cdap-service.yaml",
            ChildSpec::Job(_) => "upgrade-job.yaml",
            ChildSpec::Config(_) => "cdap-conf.yaml",
        }
    }

    pub fn as_group(&self) -> Option<&WorkloadGroupSpec> {
        match self {
            ChildSpec::Stateful(g) | ChildSpec::Stateless(g) => Some(g),
            _ => None,
        }
    }
}
