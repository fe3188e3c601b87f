//! Tarn core types: the `Platform` resource, service catalogue, versions,
//! conditions, exact quantities and child object specs.

#![forbid(unsafe_code)]

pub mod child;
pub mod condition;
pub mod error;
pub mod naming;
pub mod platform;
pub mod quantity;
pub mod service;
pub mod version;

pub use child::{ChildSpec, ConfigBundleSpec, JobChild, JobStage, NetworkServiceSpec, StorageClaim, UpgradeJobSpec, WorkloadGroupSpec};
pub use condition::{Condition, ConditionSet, ConditionStatus, ConditionType, VersionPhase};
pub use error::{Error, GroupField, Result};
pub use naming::Naming;
pub use platform::{Platform, PlatformSpec, PlatformStatus};
pub use quantity::ExactQuantity;
pub use service::{Capability, CommonServiceSpec, ExposureSettings, ExternalServiceSpec, ServiceKind, ServiceSettings, StatefulServiceSpec, StatelessServiceSpec, StorageSettings};
pub use version::Version;

/// Platform entry point every service image ships.
pub const ENTRYPOINT: &str = "/opt/cdap/master/bin/cdap";

/// Main class that bootstraps persistent storage before services start.
pub const STORAGE_INIT_MAIN: &str = "io.cdap.cdap.master.environment.k8s.StorageMain";

/// Main class run by the pre- and post-upgrade jobs.
pub const UPGRADE_JOB_MAIN: &str = "io.cdap.cdap.master.upgrade.UpgradeJobMain";

/// Volume holding the platform configuration bundle, and where it is mounted.
pub const CONFIG_VOLUME: &str = "cdap-conf";
pub const CONFIG_MOUNT_PATH: &str = "/etc/cdap/conf";

/// Key of the configuration document inside the bundle.
pub const CONFIG_FILE: &str = "cdap-site.xml";

/// Persistent data claim of stateful groups, and where it is mounted.
pub const DATA_VOLUME: &str = "data";
pub const DATA_MOUNT_PATH: &str = "/data";

pub mod prelude {
    pub use super::{ChildSpec, ConditionSet, ConditionType, Error, Naming, Platform, PlatformSpec, PlatformStatus, Result, ServiceKind, Version, VersionPhase};
}
