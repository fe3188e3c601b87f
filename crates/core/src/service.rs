//! Service catalogue and per-service settings.
//!
//! Each service kind has a fixed capability. Settings are read through the
//! [`ServiceSettings`] trait, so callers ask for storage or exposure settings
//! and get `None` for kinds that do not have them.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceKind {
    AppFabric,
    Logs,
    Messaging,
    Metadata,
    Metrics,
    Preview,
    Router,
    UserInterface,
    Runtime,
    SupportBundle,
    TetheringAgent,
    ArtifactCache,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Stateless,
    Stateful,
    /// Stateless and reachable through a network endpoint.
    External,
}

const MAIN_CLASS_PREFIX: &str = "io.cdap.cdap.master.environment.k8s.";

impl ServiceKind {
    pub const ALL: [ServiceKind; 12] = [
        ServiceKind::AppFabric,
        ServiceKind::Logs,
        ServiceKind::Messaging,
        ServiceKind::Metadata,
        ServiceKind::Metrics,
        ServiceKind::Preview,
        ServiceKind::Router,
        ServiceKind::UserInterface,
        ServiceKind::Runtime,
        ServiceKind::SupportBundle,
        ServiceKind::TetheringAgent,
        ServiceKind::ArtifactCache,
    ];

    pub fn capability(self) -> Capability {
        match self {
            ServiceKind::AppFabric | ServiceKind::Metadata => Capability::Stateless,
            ServiceKind::Router | ServiceKind::UserInterface => Capability::External,
            ServiceKind::Logs
            | ServiceKind::Messaging
            | ServiceKind::Metrics
            | ServiceKind::Preview
            | ServiceKind::Runtime
            | ServiceKind::SupportBundle
            | ServiceKind::TetheringAgent
            | ServiceKind::ArtifactCache => Capability::Stateful,
        }
    }

    /// Optional services only run when their section is present on the platform.
    pub fn is_optional(self) -> bool {
        matches!(self, ServiceKind::Runtime | ServiceKind::SupportBundle | ServiceKind::TetheringAgent | ServiceKind::ArtifactCache)
    }

    pub fn name(self) -> &'static str {
        match self {
            ServiceKind::AppFabric => "appfabric",
            ServiceKind::Logs => "logs",
            ServiceKind::Messaging => "messaging",
            ServiceKind::Metadata => "metadata",
            ServiceKind::Metrics => "metrics",
            ServiceKind::Preview => "preview",
            ServiceKind::Router => "router",
            ServiceKind::UserInterface => "userinterface",
            ServiceKind::Runtime => "runtime",
            ServiceKind::SupportBundle => "supportbundle",
            ServiceKind::TetheringAgent => "tetheringagent",
            ServiceKind::ArtifactCache => "artifactcache",
        }
    }

    /// Name of the service's main class, passed as the first container argument.
    /// The UI is a node application and has none.
    pub fn main_class(self) -> Option<String> {
        let simple = match self {
            ServiceKind::AppFabric => "AppFabricServiceMain",
            ServiceKind::Logs => "LogsServiceMain",
            ServiceKind::Messaging => "MessagingServiceMain",
            ServiceKind::Metadata => "MetadataServiceMain",
            ServiceKind::Metrics => "MetricsServiceMain",
            ServiceKind::Preview => "PreviewServiceMain",
            ServiceKind::Router => "RouterServiceMain",
            ServiceKind::Runtime => "RuntimeServiceMain",
            ServiceKind::SupportBundle => "SupportBundleServiceMain",
            ServiceKind::TetheringAgent => "TetheringAgentServiceMain",
            ServiceKind::ArtifactCache => "ArtifactCacheServiceMain",
            ServiceKind::UserInterface => return None,
        };
        Some(format!("{}{}", MAIN_CLASS_PREFIX, simple))
    }

    /// Keys this service reports under the platform's service-status endpoint.
    pub fn status_keys(self) -> &'static [&'static str] {
        match self {
            ServiceKind::AppFabric => &["appfabric", "dataset.executor"],
            ServiceKind::Logs => &["log.saver"],
            ServiceKind::Messaging => &["messaging.service"],
            ServiceKind::Metadata => &["metadata.service"],
            ServiceKind::Metrics => &["metrics", "metrics.processor"],
            ServiceKind::Runtime => &["runtime"],
            ServiceKind::Preview
            | ServiceKind::Router
            | ServiceKind::UserInterface
            | ServiceKind::SupportBundle
            | ServiceKind::TetheringAgent
            | ServiceKind::ArtifactCache => &[],
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.name()) }
}

/// Settings every service kind accepts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonServiceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_size: Option<Quantity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_port: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatelessServiceSpec {
    #[serde(flatten)]
    pub common: CommonServiceSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatefulServiceSpec {
    #[serde(flatten)]
    pub common: CommonServiceSpec,
    #[serde(flatten)]
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalServiceSpec {
    #[serde(flatten)]
    pub common: CommonServiceSpec,
    #[serde(flatten)]
    pub exposure: ExposureSettings,
}

/// Typed access to a service's settings by capability.
pub trait ServiceSettings {
    fn common(&self) -> &CommonServiceSpec;
    fn storage(&self) -> Option<&StorageSettings> { None }
    fn exposure(&self) -> Option<&ExposureSettings> { None }
}

impl ServiceSettings for StatelessServiceSpec {
    fn common(&self) -> &CommonServiceSpec { &self.common }
}

impl ServiceSettings for StatefulServiceSpec {
    fn common(&self) -> &CommonServiceSpec { &self.common }
    fn storage(&self) -> Option<&StorageSettings> { Some(&self.storage) }
}

impl ServiceSettings for ExternalServiceSpec {
    fn common(&self) -> &CommonServiceSpec { &self.common }
    fn exposure(&self) -> Option<&ExposureSettings> { Some(&self.exposure) }
}
