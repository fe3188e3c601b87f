//! Typed condition set persisted on the platform status.
//!
//! Conditions are the only state carried between reconciliation ticks. The
//! version family encodes the upgrade state machine (see [`VersionPhase`]); the
//! health family holds exactly one true member once health has been checked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConditionType {
    Inprogress,
    PreUpgradeJobDone,
    VersionUpdated,
    PostUpgradeJobDone,
    UpgradeSucceeded,
    UpgradeFailed,
    DowngradeSucceeded,
    Ready,
    Unhealthy,
    Unknown,
    ReconcileFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionFamily {
    Version,
    Health,
    Reconcile,
}

impl ConditionType {
    pub const ALL: [ConditionType; 11] = [
        ConditionType::Inprogress,
        ConditionType::PreUpgradeJobDone,
        ConditionType::VersionUpdated,
        ConditionType::PostUpgradeJobDone,
        ConditionType::UpgradeSucceeded,
        ConditionType::UpgradeFailed,
        ConditionType::DowngradeSucceeded,
        ConditionType::Ready,
        ConditionType::Unhealthy,
        ConditionType::Unknown,
        ConditionType::ReconcileFailed,
    ];

    pub const VERSION: [ConditionType; 7] = [
        ConditionType::Inprogress,
        ConditionType::PreUpgradeJobDone,
        ConditionType::VersionUpdated,
        ConditionType::PostUpgradeJobDone,
        ConditionType::UpgradeSucceeded,
        ConditionType::UpgradeFailed,
        ConditionType::DowngradeSucceeded,
    ];

    pub const HEALTH: [ConditionType; 3] = [ConditionType::Ready, ConditionType::Unhealthy, ConditionType::Unknown];

    pub fn family(self) -> ConditionFamily {
        match self {
            ConditionType::Ready | ConditionType::Unhealthy | ConditionType::Unknown => ConditionFamily::Health,
            ConditionType::ReconcileFailed => ConditionFamily::Reconcile,
            _ => ConditionFamily::Version,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConditionType::Inprogress => "Inprogress",
            ConditionType::PreUpgradeJobDone => "PreUpgradeJobDone",
            ConditionType::VersionUpdated => "VersionUpdated",
            ConditionType::PostUpgradeJobDone => "PostUpgradeJobDone",
            ConditionType::UpgradeSucceeded => "UpgradeSucceeded",
            ConditionType::UpgradeFailed => "UpgradeFailed",
            ConditionType::DowngradeSucceeded => "DowngradeSucceeded",
            ConditionType::Ready => "Ready",
            ConditionType::Unhealthy => "Unhealthy",
            ConditionType::Unknown => "Unknown",
            ConditionType::ReconcileFailed => "ReconcileFailed",
        }
    }

    /// Reason and message recorded when the condition becomes true.
    fn describe(self) -> (&'static str, &'static str) {
        match self {
            ConditionType::Inprogress => ("Start", "Image version change in progress"),
            ConditionType::PreUpgradeJobDone => ("Start", "Pre-upgrade job completed"),
            ConditionType::VersionUpdated => ("Start", "Applied image version switched"),
            ConditionType::PostUpgradeJobDone => ("Start", "Post-upgrade job completed"),
            ConditionType::UpgradeSucceeded => ("Start", "Upgrade succeeded"),
            ConditionType::UpgradeFailed => ("Start", "Upgrade failed; change the desired image to retry"),
            ConditionType::DowngradeSucceeded => ("Start", "Downgrade succeeded"),
            ConditionType::Ready => ("ServicesReady", "All services and system applications are healthy"),
            ConditionType::Unhealthy => ("ServicesUnhealthy", "One or more services or system applications are not healthy"),
            ConditionType::Unknown => ("StatusUnavailable", "Service status could not be retrieved"),
            ConditionType::ReconcileFailed => ("ReconcileError", "Reconciliation failed"),
        }
    }
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    pub fn is_true(&self) -> bool { self.status == ConditionStatus::True }
}

/// Ordered set of conditions addressed by type. Never shrinks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionSet(Vec<Condition>);

impl ConditionSet {
    pub fn new() -> Self { Self(Vec::new()) }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> { self.0.iter() }

    pub fn get(&self, ty: ConditionType) -> Option<&Condition> { self.0.iter().find(|c| c.type_ == ty) }

    pub fn is_true(&self, ty: ConditionType) -> bool { self.get(ty).map(|c| c.is_true()).unwrap_or(false) }

    pub fn set(&mut self, ty: ConditionType, now: DateTime<Utc>) {
        let (reason, message) = ty.describe();
        self.put(ty, ConditionStatus::True, reason, message.to_string(), now);
    }

    /// Set with a caller-provided message (e.g. an error string).
    pub fn set_with_message(&mut self, ty: ConditionType, message: impl Into<String>, now: DateTime<Utc>) {
        let (reason, _) = ty.describe();
        self.put(ty, ConditionStatus::True, reason, message.into(), now);
    }

    pub fn clear(&mut self, ty: ConditionType, now: DateTime<Utc>) {
        if self.get(ty).is_none() {
            return;
        }
        self.put(ty, ConditionStatus::False, "", String::new(), now);
    }

    /// Make `ty` the only true member of the health family.
    pub fn set_health(&mut self, ty: ConditionType, now: DateTime<Utc>) {
        debug_assert_eq!(ty.family(), ConditionFamily::Health);
        for other in ConditionType::HEALTH {
            if other != ty {
                self.clear(other, now);
            }
        }
        self.set(ty, now);
    }

    /// Health condition currently true, if any.
    pub fn health(&self) -> Option<ConditionType> { ConditionType::HEALTH.into_iter().find(|t| self.is_true(*t)) }

    pub fn phase(&self) -> VersionPhase { VersionPhase::from_conditions(self) }

    /// Transition the version family to exactly the conditions of `phase`.
    pub fn enter_phase(&mut self, phase: VersionPhase, now: DateTime<Utc>) {
        let want = phase.conditions();
        for ty in ConditionType::VERSION {
            if want.contains(&ty) {
                if !self.is_true(ty) {
                    self.set(ty, now);
                }
            } else {
                self.clear(ty, now);
            }
        }
    }

    fn put(&mut self, ty: ConditionType, status: ConditionStatus, reason: &str, message: String, now: DateTime<Utc>) {
        match self.0.iter_mut().find(|c| c.type_ == ty) {
            Some(c) => {
                if c.status != status {
                    c.last_transition_time = Some(now);
                }
                c.status = status;
                c.reason = reason.to_string();
                c.message = message;
            }
            None => self.0.push(Condition {
                type_: ty,
                status,
                reason: reason.to_string(),
                message,
                last_transition_time: Some(now),
            }),
        }
    }
}

/// Version state machine position, derived from the version conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionPhase {
    Idle,
    PreUpgradePending,
    PreUpgradeDone,
    VersionSwitched,
    PostUpgradeDone,
    UpgradeSucceeded,
    PreUpgradeFailed,
    PostUpgradeFailed,
    DowngradeSucceeded,
}

impl VersionPhase {
    pub const ALL: [VersionPhase; 9] = [
        VersionPhase::Idle,
        VersionPhase::PreUpgradePending,
        VersionPhase::PreUpgradeDone,
        VersionPhase::VersionSwitched,
        VersionPhase::PostUpgradeDone,
        VersionPhase::UpgradeSucceeded,
        VersionPhase::PreUpgradeFailed,
        VersionPhase::PostUpgradeFailed,
        VersionPhase::DowngradeSucceeded,
    ];

    /// Transition table: the version conditions that are true in each phase.
    pub fn conditions(self) -> &'static [ConditionType] {
        use ConditionType::*;
        match self {
            VersionPhase::Idle => &[],
            VersionPhase::PreUpgradePending => &[Inprogress],
            VersionPhase::PreUpgradeDone => &[Inprogress, PreUpgradeJobDone],
            VersionPhase::VersionSwitched => &[Inprogress, PreUpgradeJobDone, VersionUpdated],
            VersionPhase::PostUpgradeDone => &[Inprogress, PreUpgradeJobDone, VersionUpdated, PostUpgradeJobDone],
            VersionPhase::UpgradeSucceeded => &[PreUpgradeJobDone, VersionUpdated, PostUpgradeJobDone, UpgradeSucceeded],
            VersionPhase::PreUpgradeFailed => &[UpgradeFailed],
            VersionPhase::PostUpgradeFailed => &[PreUpgradeJobDone, VersionUpdated, UpgradeFailed],
            VersionPhase::DowngradeSucceeded => &[DowngradeSucceeded],
        }
    }

    pub fn from_conditions(set: &ConditionSet) -> Self {
        use ConditionType::*;
        let t = |ty| set.is_true(ty);
        if t(Inprogress) {
            return if t(PostUpgradeJobDone) {
                VersionPhase::PostUpgradeDone
            } else if t(VersionUpdated) {
                VersionPhase::VersionSwitched
            } else if t(PreUpgradeJobDone) {
                VersionPhase::PreUpgradeDone
            } else {
                VersionPhase::PreUpgradePending
            };
        }
        if t(UpgradeFailed) {
            return if t(VersionUpdated) { VersionPhase::PostUpgradeFailed } else { VersionPhase::PreUpgradeFailed };
        }
        if t(UpgradeSucceeded) {
            return VersionPhase::UpgradeSucceeded;
        }
        if t(DowngradeSucceeded) {
            return VersionPhase::DowngradeSucceeded;
        }
        VersionPhase::Idle
    }

    pub fn in_progress(self) -> bool { self.conditions().contains(&ConditionType::Inprogress) }

    pub fn is_failed(self) -> bool { matches!(self, VersionPhase::PreUpgradeFailed | VersionPhase::PostUpgradeFailed) }
}
