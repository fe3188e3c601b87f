//! The `Platform` custom resource: desired spec and persisted status.

use std::collections::BTreeMap;

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::condition::ConditionSet;
use crate::service::{ExternalServiceSpec, ServiceKind, ServiceSettings, StatefulServiceSpec, StatelessServiceSpec};

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "tarn.io",
    version = "v1alpha1",
    kind = "Platform",
    plural = "platforms",
    namespaced,
    status = "PlatformStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSpec {
    /// Image for every service except the UI.
    pub image: String,
    pub user_interface_image: String,
    /// Selects a row of the deployment plan table. Defaults to 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_pods: Option<i32>,
    /// Account used by groups whose services name none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    /// Platform configuration properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,

    #[serde(default)]
    pub app_fabric: StatelessServiceSpec,
    #[serde(default)]
    pub logs: StatefulServiceSpec,
    #[serde(default)]
    pub messaging: StatefulServiceSpec,
    #[serde(default)]
    pub metadata: StatelessServiceSpec,
    #[serde(default)]
    pub metrics: StatefulServiceSpec,
    #[serde(default)]
    pub preview: StatefulServiceSpec,
    #[serde(default)]
    pub router: ExternalServiceSpec,
    #[serde(default)]
    pub user_interface: ExternalServiceSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<StatefulServiceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_bundle: Option<StatefulServiceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tethering_agent: Option<StatefulServiceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_cache: Option<StatefulServiceSpec>,
}

impl PlatformSpec {
    /// Settings for `kind`; `None` when an optional service is not enabled.
    pub fn service(&self, kind: ServiceKind) -> Option<&dyn ServiceSettings> {
        match kind {
            ServiceKind::AppFabric => Some(&self.app_fabric),
            ServiceKind::Logs => Some(&self.logs),
            ServiceKind::Messaging => Some(&self.messaging),
            ServiceKind::Metadata => Some(&self.metadata),
            ServiceKind::Metrics => Some(&self.metrics),
            ServiceKind::Preview => Some(&self.preview),
            ServiceKind::Router => Some(&self.router),
            ServiceKind::UserInterface => Some(&self.user_interface),
            ServiceKind::Runtime => self.runtime.as_ref().map(|s| s as &dyn ServiceSettings),
            ServiceKind::SupportBundle => self.support_bundle.as_ref().map(|s| s as &dyn ServiceSettings),
            ServiceKind::TetheringAgent => self.tethering_agent.as_ref().map(|s| s as &dyn ServiceSettings),
            ServiceKind::ArtifactCache => self.artifact_cache.as_ref().map(|s| s as &dyn ServiceSettings),
        }
    }

    pub fn is_enabled(&self, kind: ServiceKind) -> bool { self.service(kind).is_some() }

    pub fn enabled_services(&self) -> Vec<ServiceKind> {
        ServiceKind::ALL.into_iter().filter(|k| self.is_enabled(*k)).collect()
    }

    pub fn pods(&self) -> i32 { self.num_pods.unwrap_or(0) }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    /// Image currently applied to the services; empty until initialized.
    #[serde(default)]
    pub image_to_use: String,
    #[serde(default)]
    pub user_interface_image_to_use: String,
    #[serde(default)]
    pub upgrade_start_time_millis: i64,
    #[serde(default)]
    pub downgrade_start_time_millis: i64,
    /// Desired image of the current or most recent upgrade attempt.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub upgrade_target_image: String,
    #[serde(default)]
    pub conditions: ConditionSet,
}

impl PlatformStatus {
    pub fn versions_initialized(&self) -> bool {
        !self.image_to_use.is_empty() && !self.user_interface_image_to_use.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
apiVersion: tarn.io/v1alpha1
kind: Platform
metadata:
  name: demo
  namespace: data
spec:
  image: gcr.io/cdap/sandbox:6.10.0
  userInterfaceImage: gcr.io/cdap/ui:6.10.0
  numPods: 2
  config:
    explore.enabled: "false"
  logs:
    storageSize: 10Gi
  router:
    serviceType: LoadBalancer
    servicePort: 443
  runtime: {}
"#;

    #[test]
    fn parses_platform_manifest() {
        let p: Platform = serde_yaml::from_str(YAML).unwrap();
        assert_eq!(p.spec.pods(), 2);
        assert!(p.status.is_none());
        assert!(p.spec.is_enabled(ServiceKind::Runtime));
        assert!(!p.spec.is_enabled(ServiceKind::ArtifactCache));
        assert_eq!(p.spec.enabled_services().len(), 9);
        let router = p.spec.service(ServiceKind::Router).unwrap();
        assert_eq!(router.exposure().unwrap().service_port, Some(443));
        let logs = p.spec.service(ServiceKind::Logs).unwrap();
        assert_eq!(logs.storage().unwrap().storage_size.as_ref().map(|q| q.0.as_str()), Some("10Gi"));
    }

    #[test]
    fn empty_status_is_uninitialized() {
        let s = PlatformStatus::default();
        assert!(!s.versions_initialized());
    }
}
