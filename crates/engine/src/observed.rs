//! Observed child objects and bounded YAML loading.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::Job;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as Json;
use tracing::debug;

use tarn_core::{Platform, PlatformStatus};
use tarn_upgrade::ObservedJobs;

use crate::config::InputLimits;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("YAML payload too large (>{0} bytes)")]
    TooLarge(usize),
    #[error("YAML document too complex (>{0} nodes)")]
    TooComplex(usize),
    #[error("parsing YAML: {0}")]
    Yaml(String),
    #[error("YAML missing {0}")]
    Missing(&'static str),
    #[error("decoding {kind}: {reason}")]
    Decode { kind: String, reason: String },
    #[error("expected a {expected}, found {found}")]
    WrongKind { expected: &'static str, found: String },
}

/// Count JSON nodes, stopping once `cap` is reached.
fn node_count(doc: &Json, cap: usize) -> usize {
    let mut seen = 0usize;
    let mut pending = vec![doc];
    while let Some(v) = pending.pop() {
        seen += 1;
        if seen >= cap {
            break;
        }
        match v {
            Json::Object(map) => pending.extend(map.values()),
            Json::Array(items) => pending.extend(items),
            _ => {}
        }
    }
    seen
}

/// Parse every document of a multi-document YAML stream into JSON values,
/// skipping empty documents.
pub fn parse_documents(yaml: &str, limits: &InputLimits) -> Result<Vec<Json>, LoadError> {
    if yaml.len() > limits.max_bytes {
        return Err(LoadError::TooLarge(limits.max_bytes));
    }
    let mut docs = Vec::new();
    for de in serde_yaml::Deserializer::from_str(yaml) {
        let val = serde_yaml::Value::deserialize(de).map_err(|e| LoadError::Yaml(e.to_string()))?;
        if val.is_null() {
            continue;
        }
        let json = serde_json::to_value(val).map_err(|e| LoadError::Yaml(e.to_string()))?;
        if node_count(&json, limits.max_nodes) >= limits.max_nodes {
            return Err(LoadError::TooComplex(limits.max_nodes));
        }
        docs.push(json);
    }
    Ok(docs)
}

fn kind_of(doc: &Json) -> Result<&str, LoadError> {
    doc.get("apiVersion").and_then(Json::as_str).ok_or(LoadError::Missing("apiVersion"))?;
    let kind = doc.get("kind").and_then(Json::as_str).ok_or(LoadError::Missing("kind"))?;
    doc.get("metadata").and_then(|m| m.get("name")).and_then(Json::as_str).ok_or(LoadError::Missing("metadata.name"))?;
    Ok(kind)
}

fn decode<T: DeserializeOwned>(kind: &str, doc: Json) -> Result<T, LoadError> {
    serde_json::from_value(doc).map_err(|e| LoadError::Decode { kind: kind.to_string(), reason: e.to_string() })
}

/// Load a single `Platform` document.
pub fn load_platform(yaml: &str, limits: &InputLimits) -> Result<Platform, LoadError> {
    let mut docs = parse_documents(yaml, limits)?;
    if docs.is_empty() {
        return Err(LoadError::Missing("document"));
    }
    let doc = docs.swap_remove(0);
    let kind = kind_of(&doc)?.to_string();
    if kind != "Platform" {
        return Err(LoadError::WrongKind { expected: "Platform", found: kind });
    }
    decode(&kind, doc)
}

/// Load a bare status document (the `status` block of a platform).
pub fn load_status(yaml: &str, limits: &InputLimits) -> Result<PlatformStatus, LoadError> {
    let mut docs = parse_documents(yaml, limits)?;
    match docs.len() {
        0 => Ok(PlatformStatus::default()),
        _ => decode("status", docs.swap_remove(0)),
    }
}

/// Child objects seen in the cluster during the previous tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedObjects {
    jobs: BTreeMap<String, Job>,
}

impl ObservedObjects {
    pub fn new() -> Self { Self::default() }

    pub fn insert_job(&mut self, job: Job) {
        let name = job.metadata.name.clone().unwrap_or_default();
        self.jobs.insert(name, job);
    }

    pub fn with_job(mut self, job: Job) -> Self {
        self.insert_job(job);
        self
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> { self.jobs.values() }

    pub fn is_empty(&self) -> bool { self.jobs.is_empty() }

    /// Load from a multi-document stream. Kinds the engine does not consult
    /// are skipped.
    pub fn from_yaml(yaml: &str, limits: &InputLimits) -> Result<Self, LoadError> {
        let mut out = Self::new();
        for doc in parse_documents(yaml, limits)? {
            let kind = kind_of(&doc)?.to_string();
            match kind.as_str() {
                "Job" => out.insert_job(decode(&kind, doc)?),
                other => debug!(kind = other, "ignoring observed object"),
            }
        }
        Ok(out)
    }
}

impl ObservedJobs for ObservedObjects {
    fn job(&self, name: &str) -> Option<&Job> { self.jobs.get(name) }
}
