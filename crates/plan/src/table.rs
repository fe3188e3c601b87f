//! Deployment plan table: how many pods, which services share them.

use std::collections::BTreeMap;

use serde::Serialize;
use tarn_core::{Capability, Error, Result, ServiceKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupDef {
    pub name: String,
    pub services: Vec<ServiceKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointDef {
    pub name: String,
    pub target: ServiceKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub stateful: Vec<GroupDef>,
    pub stateless: Vec<GroupDef>,
    pub endpoints: Vec<EndpointDef>,
}

impl PlanEntry {
    /// Name of the group that hosts `service`.
    pub fn group_of(&self, service: ServiceKind) -> Option<&str> {
        self.stateful
            .iter()
            .chain(self.stateless.iter())
            .find(|g| g.services.contains(&service))
            .map(|g| g.name.as_str())
    }
}

/// Immutable table keyed by the desired pod count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentPlan {
    entries: BTreeMap<i32, PlanEntry>,
}

fn group(name: &str, services: impl IntoIterator<Item = ServiceKind>) -> GroupDef {
    GroupDef { name: name.to_string(), services: services.into_iter().collect() }
}

fn endpoints() -> Vec<EndpointDef> {
    vec![
        EndpointDef { name: ServiceKind::Router.name().to_string(), target: ServiceKind::Router },
        EndpointDef { name: ServiceKind::UserInterface.name().to_string(), target: ServiceKind::UserInterface },
    ]
}

fn of(cap: Capability) -> impl Iterator<Item = ServiceKind> {
    ServiceKind::ALL.into_iter().filter(move |k| k.capability() == cap)
}

impl DeploymentPlan {
    pub fn new(entries: BTreeMap<i32, PlanEntry>) -> Self { Self { entries } }

    /// The built-in table for 0 to 3 pods.
    pub fn standard() -> Self {
        let mut entries = BTreeMap::new();

        // 0: one group per service
        entries.insert(0, PlanEntry {
            stateful: of(Capability::Stateful).map(|k| group(k.name(), [k])).collect(),
            stateless: of(Capability::Stateless).chain(of(Capability::External)).map(|k| group(k.name(), [k])).collect(),
            endpoints: endpoints(),
        });

        entries.insert(1, PlanEntry {
            stateful: vec![group("standalone", ServiceKind::ALL)],
            stateless: vec![],
            endpoints: endpoints(),
        });

        entries.insert(2, PlanEntry {
            stateful: vec![group("backend", of(Capability::Stateful).chain(of(Capability::Stateless)))],
            stateless: vec![group("frontend", of(Capability::External))],
            endpoints: endpoints(),
        });

        entries.insert(3, PlanEntry {
            stateful: vec![group("backend", of(Capability::Stateful))],
            stateless: vec![group("processing", of(Capability::Stateless)), group("frontend", of(Capability::External))],
            endpoints: endpoints(),
        });

        Self { entries }
    }

    pub fn lookup(&self, pods: i32) -> Result<&PlanEntry> { self.entries.get(&pods).ok_or(Error::UnsupportedPlan(pods)) }

    pub fn supported(&self) -> impl Iterator<Item = i32> + '_ { self.entries.keys().copied() }

    /// Check that every service is placed in exactly one group of every entry
    /// and that every endpoint targets an external service.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (pods, entry) in &self.entries {
            for kind in ServiceKind::ALL {
                let n = entry.stateful.iter().chain(entry.stateless.iter()).filter(|g| g.services.contains(&kind)).count();
                if n != 1 {
                    return Err(format!("plan {}: service {} placed in {} groups", pods, kind, n));
                }
            }
            for e in &entry.endpoints {
                if e.target.capability() != Capability::External {
                    return Err(format!("plan {}: endpoint {} targets non-external {}", pods, e.name, e.target));
                }
            }
        }
        Ok(())
    }
}

impl Default for DeploymentPlan {
    fn default() -> Self { Self::standard() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_is_consistent() {
        let plan = DeploymentPlan::standard();
        plan.validate().unwrap();
        assert_eq!(plan.supported().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn unsupported_counts_fail() {
        let plan = DeploymentPlan::standard();
        assert_eq!(plan.lookup(4).unwrap_err(), Error::UnsupportedPlan(4));
        assert!(plan.lookup(-1).is_err());
    }

    #[test]
    fn group_lookup_by_service() {
        let plan = DeploymentPlan::standard();
        assert_eq!(plan.lookup(3).unwrap().group_of(ServiceKind::Router), Some("frontend"));
        assert_eq!(plan.lookup(1).unwrap().group_of(ServiceKind::Logs), Some("standalone"));
        assert_eq!(plan.lookup(0).unwrap().group_of(ServiceKind::Metrics), Some("metrics"));
    }
}
