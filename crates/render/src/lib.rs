//! Tarn manifest renderer: child specs to typed Kubernetes objects.
//!
//! The engine treats rendering as an opaque pure function behind
//! [`ManifestRenderer`]. [`StructuralRenderer`] builds the objects directly
//! from the child fields; every object carries the instance labels and, when the
//! owner has a uid, a controller reference to the platform.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec,
    Service, ServicePort, ServiceSpec, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::Resource;
use serde::Serialize;
use tracing::debug;

use tarn_core::{
    ChildSpec, ConfigBundleSpec, Error, JobChild, Naming, NetworkServiceSpec, Platform, Result, UpgradeJobSpec, WorkloadGroupSpec,
};

/// A rendered object ready to be applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Manifest {
    StatefulSet(Box<StatefulSet>),
    Deployment(Box<Deployment>),
    Service(Box<Service>),
    Job(Box<Job>),
    ConfigMap(Box<ConfigMap>),
}

impl Manifest {
    pub fn kind(&self) -> &'static str {
        match self {
            Manifest::StatefulSet(_) => "StatefulSet",
            Manifest::Deployment(_) => "Deployment",
            Manifest::Service(_) => "Service",
            Manifest::Job(_) => "Job",
            Manifest::ConfigMap(_) => "ConfigMap",
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Manifest::StatefulSet(o) => &o.metadata,
            Manifest::Deployment(o) => &o.metadata,
            Manifest::Service(o) => &o.metadata,
            Manifest::Job(o) => &o.metadata,
            Manifest::ConfigMap(o) => &o.metadata,
        }
    }

    pub fn name(&self) -> &str { self.metadata().name.as_deref().unwrap_or("") }
}

/// Per-instance inputs shared by every rendered object.
#[derive(Debug, Clone)]
pub struct RenderContext<'a> {
    pub naming: &'a Naming,
    pub owner: Option<OwnerReference>,
}

impl<'a> RenderContext<'a> {
    pub fn for_platform(platform: &Platform, naming: &'a Naming) -> Self {
        let owner = platform.controller_owner_ref(&());
        if owner.is_none() {
            debug!(instance = %naming.instance, "platform has no uid; rendering without owner reference");
        }
        Self { naming, owner }
    }

    fn meta(&self, name: &str, labels: &BTreeMap<String, String>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.naming.namespace.clone()),
            labels: Some(labels.clone()),
            owner_references: self.owner.clone().map(|o| vec![o]),
            ..Default::default()
        }
    }

    fn group_selector(&self, group: &str) -> BTreeMap<String, String> {
        let mut sel = self.naming.instance_labels();
        sel.insert(self.naming.group_label_key(), group.to_string());
        sel
    }
}

pub trait ManifestRenderer {
    /// Render `child` with the template named `template`.
    fn render(&self, ctx: &RenderContext<'_>, template: &str, child: &ChildSpec) -> Result<Vec<Manifest>>;
}

/// Render every child with its own template, in order.
pub fn render_all<R: ManifestRenderer + ?Sized>(renderer: &R, ctx: &RenderContext<'_>, children: &[ChildSpec]) -> Result<Vec<Manifest>> {
    let mut out = Vec::with_capacity(children.len());
    for child in children {
        out.extend(renderer.render(ctx, child.template_id(), child)?);
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralRenderer;

fn non_empty<T>(v: Vec<T>) -> Option<Vec<T>> { if v.is_empty() { None } else { Some(v) } }

fn non_empty_map(m: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    if m.is_empty() { None } else { Some(m.clone()) }
}

fn config_volume(config_name: &str) -> Volume {
    Volume {
        name: tarn_core::CONFIG_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource { name: Some(config_name.to_string()), ..Default::default() }),
        ..Default::default()
    }
}

fn pod_template(g: &WorkloadGroupSpec) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta { labels: Some(g.labels.clone()), ..Default::default() }),
        spec: Some(PodSpec {
            containers: g.containers.clone(),
            init_containers: non_empty(g.init_containers.clone()),
            service_account_name: g.service_account_name.clone(),
            node_selector: non_empty_map(&g.node_selector),
            runtime_class_name: g.runtime_class_name.clone(),
            priority_class_name: g.priority_class_name.clone(),
            volumes: Some(vec![config_volume(&g.config_name)]),
            ..Default::default()
        }),
    }
}

impl StructuralRenderer {
    fn stateful(&self, ctx: &RenderContext<'_>, g: &WorkloadGroupSpec) -> Result<Vec<Manifest>> {
        let storage = g.storage.as_ref().ok_or_else(|| Error::Render(format!("stateful group {} has no storage claim", g.group)))?;
        let selector = ctx.group_selector(&g.group);
        let claim = PersistentVolumeClaim {
            metadata: ObjectMeta { name: Some(tarn_core::DATA_VOLUME.to_string()), ..Default::default() },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                storage_class_name: storage.storage_class_name.clone(),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([("storage".to_string(), storage.size.clone())])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let sts = StatefulSet {
            metadata: ctx.meta(&g.name, &g.labels),
            spec: Some(StatefulSetSpec {
                replicas: Some(g.replicas),
                service_name: g.name.clone(),
                selector: LabelSelector { match_labels: Some(selector.clone()), ..Default::default() },
                template: pod_template(g),
                volume_claim_templates: Some(vec![claim]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let headless = Service {
            metadata: ctx.meta(&g.name, &ctx.naming.instance_labels()),
            spec: Some(ServiceSpec {
                cluster_ip: Some("None".to_string()),
                selector: Some(selector),
                ..Default::default()
            }),
            ..Default::default()
        };
        Ok(vec![Manifest::StatefulSet(Box::new(sts)), Manifest::Service(Box::new(headless))])
    }

    fn stateless(&self, ctx: &RenderContext<'_>, g: &WorkloadGroupSpec) -> Manifest {
        Manifest::Deployment(Box::new(Deployment {
            metadata: ctx.meta(&g.name, &g.labels),
            spec: Some(DeploymentSpec {
                replicas: Some(g.replicas),
                selector: LabelSelector { match_labels: Some(ctx.group_selector(&g.group)), ..Default::default() },
                template: pod_template(g),
                ..Default::default()
            }),
            ..Default::default()
        }))
    }

    fn network(&self, ctx: &RenderContext<'_>, n: &NetworkServiceSpec) -> Manifest {
        Manifest::Service(Box::new(Service {
            metadata: ctx.meta(&n.name, &n.labels),
            spec: Some(ServiceSpec {
                type_: Some(n.service_type.clone()),
                selector: Some(n.selector.clone()),
                ports: Some(vec![ServicePort {
                    name: Some(n.endpoint.clone()),
                    port: n.port,
                    target_port: Some(IntOrString::Int(n.port)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }))
    }

    fn job(&self, ctx: &RenderContext<'_>, j: &UpgradeJobSpec) -> Manifest {
        let container = Container {
            name: j.stage.as_str().to_string(),
            image: Some(j.image.clone()),
            command: Some(vec![tarn_core::ENTRYPOINT.to_string()]),
            args: Some(j.args.clone()),
            volume_mounts: Some(vec![VolumeMount {
                name: tarn_core::CONFIG_VOLUME.to_string(),
                mount_path: tarn_core::CONFIG_MOUNT_PATH.to_string(),
                read_only: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        };
        Manifest::Job(Box::new(Job {
            metadata: ctx.meta(&j.name, &j.labels),
            spec: Some(JobSpec {
                backoff_limit: Some(j.backoff_limit),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta { labels: Some(j.labels.clone()), ..Default::default() }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        restart_policy: Some("Never".to_string()),
                        service_account_name: j.service_account_name.clone(),
                        volumes: Some(vec![config_volume(&j.config_name)]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }))
    }

    fn config(&self, ctx: &RenderContext<'_>, c: &ConfigBundleSpec) -> Manifest {
        Manifest::ConfigMap(Box::new(ConfigMap {
            metadata: ctx.meta(&c.name, &c.labels),
            data: Some(c.data.clone()),
            ..Default::default()
        }))
    }
}

impl ManifestRenderer for StructuralRenderer {
    fn render(&self, ctx: &RenderContext<'_>, template: &str, child: &ChildSpec) -> Result<Vec<Manifest>> {
        if template != child.template_id() {
            return Err(Error::Render(format!("template {} does not render {}", template, child.name())));
        }
        Ok(match child {
            ChildSpec::Stateful(g) => self.stateful(ctx, g)?,
            ChildSpec::Stateless(g) => vec![self.stateless(ctx, g)],
            ChildSpec::Network(n) => vec![self.network(ctx, n)],
            ChildSpec::Job(JobChild::Create(j)) => vec![self.job(ctx, j)],
            ChildSpec::Job(JobChild::Keep(j)) => vec![Manifest::Job(j.clone())],
            ChildSpec::Config(c) => vec![self.config(ctx, c)],
        })
    }
}
