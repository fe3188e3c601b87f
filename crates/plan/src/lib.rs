//! Tarn planner: maps a platform spec onto workload groups, network
//! endpoints and the configuration bundle, using a [`DeploymentPlan`] row.
//!
//! Planning is pure; it never talks to the cluster.

#![forbid(unsafe_code)]

mod config;
mod container;
mod table;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use metrics::counter;
use tracing::{debug, warn};

use tarn_core::{
    Capability, ChildSpec, Error, ExactQuantity, GroupField, Naming, NetworkServiceSpec, Platform, PlatformStatus, Result,
    ServiceKind, ServiceSettings, StorageClaim, WorkloadGroupSpec,
};

pub use config::render_site_xml;
pub use container::{max_heap_bytes, JAVA_HEAP_ENV};
pub use table::{DeploymentPlan, EndpointDef, GroupDef, PlanEntry};

pub const DEFAULT_ROUTER_PORT: i32 = 11015;
pub const DEFAULT_UI_PORT: i32 = 11011;

/// Fixed values the planner falls back to.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDefaults {
    /// Claim size of a stateful group when no member sets one.
    pub storage_size: Quantity,
    pub reserved_non_heap_bytes: i128,
    pub min_heap_ratio: f64,
    pub service_type: String,
}

impl Default for PlanDefaults {
    fn default() -> Self {
        Self {
            storage_size: Quantity("200Gi".to_string()),
            reserved_non_heap_bytes: 768 * 1024 * 1024,
            min_heap_ratio: 0.6,
            service_type: "NodePort".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupKind {
    Stateful,
    Stateless,
}

/// Port an external service listens on unless overridden.
pub fn default_port(kind: ServiceKind) -> i32 {
    match kind {
        ServiceKind::UserInterface => DEFAULT_UI_PORT,
        _ => DEFAULT_ROUTER_PORT,
    }
}

/// Port the router is exposed on for a given spec.
pub fn router_port(platform: &Platform) -> i32 {
    platform
        .spec
        .router
        .exposure
        .service_port
        .unwrap_or(DEFAULT_ROUTER_PORT)
}

#[derive(Debug, Clone, Default)]
pub struct Planner {
    plan: DeploymentPlan,
    defaults: PlanDefaults,
}

/// The single non-empty value all members agree on, if any.
fn agree<'a>(group: &str, field: GroupField, values: impl IntoIterator<Item = Option<&'a str>>) -> Result<Option<String>> {
    let mut found: Option<&str> = None;
    for v in values.into_iter().flatten().filter(|v| !v.is_empty()) {
        match found {
            None => found = Some(v),
            Some(f) if f == v => {}
            Some(f) => {
                counter!("plan_conflict_total", 1u64);
                warn!(group, %field, first = f, second = v, "conflicting group setting");
                return Err(Error::Conflict { group: group.to_string(), field, first: f.to_string(), second: v.to_string() });
            }
        }
    }
    Ok(found.map(str::to_string))
}

impl Planner {
    pub fn new(plan: DeploymentPlan, defaults: PlanDefaults) -> Self { Self { plan, defaults } }

    pub fn table(&self) -> &DeploymentPlan { &self.plan }

    pub fn defaults(&self) -> &PlanDefaults { &self.defaults }

    /// Build the desired workloads for `platform` at the versions recorded in
    /// `status`. Returns an empty list until both versions are initialized.
    pub fn plan(&self, platform: &Platform, naming: &Naming, status: &PlatformStatus) -> Result<Vec<ChildSpec>> {
        let pods = platform.spec.pods();
        let entry = self.plan.lookup(pods)?;
        if !status.versions_initialized() {
            debug!(instance = %naming.instance, "versions not initialized; deferring plan");
            return Ok(Vec::new());
        }

        let config_name = naming.config_name();
        let mut out = vec![ChildSpec::Config(config::bundle(platform, naming, &config_name))];

        for g in &entry.stateful {
            if let Some(spec) = self.group(platform, naming, status, g, GroupKind::Stateful, &config_name)? {
                out.push(ChildSpec::Stateful(spec));
            }
        }
        for g in &entry.stateless {
            if let Some(spec) = self.group(platform, naming, status, g, GroupKind::Stateless, &config_name)? {
                out.push(ChildSpec::Stateless(spec));
            }
        }
        for e in &entry.endpoints {
            match self.endpoint(platform, naming, entry, e) {
                Some(n) => out.push(ChildSpec::Network(n)),
                None => warn!(endpoint = %e.name, target = %e.target, "endpoint target not deployed; skipping"),
            }
        }
        debug!(instance = %naming.instance, pods, children = out.len(), "planned topology");
        Ok(out)
    }

    fn group(
        &self,
        platform: &Platform,
        naming: &Naming,
        status: &PlatformStatus,
        def: &GroupDef,
        kind: GroupKind,
        config_name: &str,
    ) -> Result<Option<WorkloadGroupSpec>> {
        let spec = &platform.spec;
        let members: Vec<(ServiceKind, &dyn ServiceSettings)> =
            def.services.iter().filter_map(|k| spec.service(*k).map(|s| (*k, s))).collect();
        if members.is_empty() {
            return Ok(None);
        }
        let name = def.name.as_str();
        let commons = || members.iter().map(|(_, s)| s.common());

        let mut node_selector = BTreeMap::new();
        for c in commons() {
            node_selector.extend(c.node_selector.clone());
        }
        let runtime_class_name = agree(name, GroupField::RuntimeClassName, commons().map(|c| c.runtime_class_name.as_deref()))?;
        let priority_class_name = agree(name, GroupField::PriorityClassName, commons().map(|c| c.priority_class_name.as_deref()))?;
        let service_account_name = agree(name, GroupField::ServiceAccountName, commons().map(|c| c.service_account_name.as_deref()))?
            .or_else(|| spec.service_account_name.clone().filter(|s| !s.is_empty()));
        let replicas = commons().filter_map(|c| c.replicas).max().unwrap_or(1);

        let storage = match kind {
            GroupKind::Stateless => None,
            GroupKind::Stateful => {
                let storages: Vec<_> = members.iter().filter_map(|(_, s)| s.storage()).collect();
                let storage_class_name = agree(name, GroupField::StorageClassName, storages.iter().map(|s| s.storage_class_name.as_deref()))?;
                let sizes = storages
                    .iter()
                    .filter_map(|s| s.storage_size.as_ref())
                    .map(|q| {
                        let size = ExactQuantity::from_k8s(q)?;
                        if size.is_negative() {
                            return Err(Error::Quantity { value: q.0.clone(), reason: "negative storage size".into() });
                        }
                        Ok(size)
                    })
                    .collect::<Result<Vec<_>>>()?;
                let size = match ExactQuantity::sum(sizes) {
                    Some(total) => total?.to_k8s(),
                    None => self.defaults.storage_size.clone(),
                };
                Some(StorageClaim { storage_class_name, size })
            }
        };

        let stateful = kind == GroupKind::Stateful;
        let mut containers = Vec::with_capacity(members.len());
        for (k, s) in &members {
            let image = if *k == ServiceKind::UserInterface { &status.user_interface_image_to_use } else { &status.image_to_use };
            containers.push(container::service_container(*k, *s, image, stateful, &self.defaults)?);
        }
        let init_containers = if stateful { vec![container::storage_init_container(&status.image_to_use)] } else { Vec::new() };

        let services: Vec<ServiceKind> = members.iter().map(|(k, _)| *k).collect();
        Ok(Some(WorkloadGroupSpec {
            name: naming.object_name(name),
            group: name.to_string(),
            labels: naming.group_labels(name, &services),
            services,
            replicas,
            service_account_name,
            node_selector,
            runtime_class_name,
            priority_class_name,
            init_containers,
            containers,
            storage,
            config_name: config_name.to_string(),
        }))
    }

    fn endpoint(&self, platform: &Platform, naming: &Naming, entry: &PlanEntry, def: &EndpointDef) -> Option<NetworkServiceSpec> {
        debug_assert_eq!(def.target.capability(), Capability::External);
        let settings = platform.spec.service(def.target)?;
        let group = entry.group_of(def.target)?;
        let exposure = settings.exposure().cloned().unwrap_or_default();
        Some(NetworkServiceSpec {
            name: naming.object_name(&def.name),
            endpoint: def.name.clone(),
            target: def.target,
            service_type: exposure.service_type.filter(|s| !s.is_empty()).unwrap_or_else(|| self.defaults.service_type.clone()),
            port: exposure.service_port.unwrap_or_else(|| default_port(def.target)),
            labels: naming.instance_labels(),
            selector: naming.service_selector(def.target, group),
        })
    }
}
