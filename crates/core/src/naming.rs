//! Object names and labels derived from a platform instance.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::service::ServiceKind;

pub const DEFAULT_PREFIX: &str = "cdap";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    pub prefix: String,
    pub instance: String,
    pub namespace: String,
}

impl Naming {
    pub fn new(prefix: impl Into<String>, instance: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), instance: instance.into(), namespace: namespace.into() }
    }

    pub fn for_platform(platform: &Platform, prefix: &str) -> Result<Self> {
        let instance = platform.metadata.name.clone().ok_or(Error::MissingMetadata("name"))?;
        let namespace = platform.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
        Ok(Self::new(prefix, instance, namespace))
    }

    /// `<prefix>-<instance>-<suffix>`
    pub fn object_name(&self, suffix: &str) -> String { format!("{}-{}-{}", self.prefix, self.instance, suffix) }

    /// Name of the configuration bundle shared by all groups and jobs.
    pub fn config_name(&self) -> String { self.object_name("cconf") }

    pub fn instance_label_key(&self) -> String { format!("{}.instance", self.prefix) }

    pub fn group_label_key(&self) -> String { format!("{}.group", self.prefix) }

    /// Label carried by pods running `service`, whatever group they are in.
    pub fn container_label_key(&self, service: ServiceKind) -> String { format!("{}.container.{}", self.prefix, service.name()) }

    pub fn instance_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(self.instance_label_key(), self.instance.clone())])
    }

    pub fn group_labels(&self, group: &str, services: &[ServiceKind]) -> BTreeMap<String, String> {
        let mut labels = self.instance_labels();
        labels.insert(self.group_label_key(), group.to_string());
        for s in services {
            labels.insert(self.container_label_key(*s), group.to_string());
        }
        labels
    }

    /// Selector matching the pods that run `service`.
    pub fn service_selector(&self, service: ServiceKind, group: &str) -> BTreeMap<String, String> {
        let mut sel = self.instance_labels();
        sel.insert(self.container_label_key(service), group.to_string());
        sel
    }
}
