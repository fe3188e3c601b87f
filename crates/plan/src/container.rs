//! Container construction for a service inside a workload group.

use k8s_openapi::api::core::v1::{Container, EnvVar, ResourceRequirements, VolumeMount};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tarn_core::{ExactQuantity, Result, ServiceKind, ServiceSettings};

use crate::PlanDefaults;

/// Environment variable carrying the JVM max-heap flag.
pub const JAVA_HEAP_ENV: &str = "JAVA_HEAPMAX";

const UI_WORKING_DIR: &str = "/opt/cdap/ui";
const UI_COMMAND: &str = "bin/node";
const UI_ARGS: [&str; 2] = ["index.js", "start"];

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar { name: name.to_string(), value: Some(value.into()), value_from: None }
}

/// Memory limit if set, otherwise the memory request.
fn memory_of(resources: Option<&ResourceRequirements>) -> Option<&Quantity> {
    let r = resources?;
    r.limits
        .as_ref()
        .and_then(|l| l.get("memory"))
        .or_else(|| r.requests.as_ref().and_then(|q| q.get("memory")))
}

/// Max heap in bytes for a container with `memory` bytes available:
/// `max(memory - reserved, memory * ratio)`.
pub fn max_heap_bytes(memory: i128, reserved_non_heap: i128, min_heap_ratio: f64) -> i128 {
    let by_reserve = memory - reserved_non_heap;
    let by_ratio = (memory as f64 * min_heap_ratio).floor() as i128;
    by_reserve.max(by_ratio)
}

fn mounts(stateful: bool) -> Vec<VolumeMount> {
    let mut m = vec![VolumeMount {
        name: tarn_core::CONFIG_VOLUME.to_string(),
        mount_path: tarn_core::CONFIG_MOUNT_PATH.to_string(),
        read_only: Some(true),
        ..Default::default()
    }];
    if stateful {
        m.push(VolumeMount { name: tarn_core::DATA_VOLUME.to_string(), mount_path: tarn_core::DATA_MOUNT_PATH.to_string(), ..Default::default() });
    }
    m
}

pub(crate) fn service_container(
    kind: ServiceKind,
    settings: &dyn ServiceSettings,
    image: &str,
    stateful_group: bool,
    defaults: &PlanDefaults,
) -> Result<Container> {
    let common = settings.common();
    let mut envs = common.env.clone();
    let mut c = Container {
        name: kind.name().to_string(),
        image: Some(image.to_string()),
        resources: common.resources.clone(),
        volume_mounts: Some(mounts(stateful_group)),
        ..Default::default()
    };

    match kind.main_class() {
        Some(main) => {
            c.command = Some(vec![tarn_core::ENTRYPOINT.to_string()]);
            c.args = Some(vec![main, "--env=k8s".to_string()]);
            if !envs.iter().any(|e| e.name == JAVA_HEAP_ENV) {
                if let Some(mem) = memory_of(common.resources.as_ref()) {
                    let mem = ExactQuantity::from_k8s(mem)?;
                    if mem.is_positive() {
                        let heap = max_heap_bytes(mem.units(), defaults.reserved_non_heap_bytes, defaults.min_heap_ratio);
                        envs.push(env(JAVA_HEAP_ENV, format!("-Xmx{}", heap)));
                    }
                }
            }
        }
        None => {
            c.working_dir = Some(UI_WORKING_DIR.to_string());
            c.command = Some(vec![UI_COMMAND.to_string()]);
            c.args = Some(UI_ARGS.iter().map(|s| s.to_string()).collect());
            if !envs.iter().any(|e| e.name == "NODE_ENV") {
                envs.push(env("NODE_ENV", "production"));
            }
        }
    }

    if !envs.is_empty() {
        c.env = Some(envs);
    }
    Ok(c)
}

/// Init container that bootstraps storage before the service containers start.
pub(crate) fn storage_init_container(image: &str) -> Container {
    Container {
        name: "storageinit".to_string(),
        image: Some(image.to_string()),
        command: Some(vec![tarn_core::ENTRYPOINT.to_string()]),
        args: Some(vec![tarn_core::STORAGE_INIT_MAIN.to_string()]),
        volume_mounts: Some(mounts(true)),
        ..Default::default()
    }
}
