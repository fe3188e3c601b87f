//! Error taxonomy shared by the planner, orchestrator and engine.

use serde::{Deserialize, Serialize};

/// A per-group setting that must agree across colocated services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupField {
    StorageClassName,
    RuntimeClassName,
    PriorityClassName,
    ServiceAccountName,
}

impl std::fmt::Display for GroupField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GroupField::StorageClassName => "storageClassName",
            GroupField::RuntimeClassName => "runtimeClassName",
            GroupField::PriorityClassName => "priorityClassName",
            GroupField::ServiceAccountName => "serviceAccountName",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("unsupported plan: no deployment plan for {0} pods")]
    UnsupportedPlan(i32),
    #[error("conflict in group {group}: {field} set to both {first:?} and {second:?}")]
    Conflict { group: String, field: GroupField, first: String, second: String },
    #[error("invalid version in image {image:?}: {reason}")]
    VersionParse { image: String, reason: String },
    #[error("invalid quantity {value:?}: {reason}")]
    Quantity { value: String, reason: String },
    #[error("platform is missing metadata.{0}")]
    MissingMetadata(&'static str),
    #[error("render: {0}")]
    Render(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
