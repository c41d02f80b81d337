//! Deployment packages, gateway reports and the deployment descriptor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

use super::status::DeploymentStatus;
use super::target::TargetSystem;
use super::unit::{ComponentKind, GeneratedUnit};

/// Identifies one component on the target system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    /// Component kind.
    pub kind: ComponentKind,
    /// `Container.Member` name.
    pub full_name: String,
}

impl ComponentDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(kind: ComponentKind, full_name: impl Into<String>) -> Self {
        Self {
            kind,
            full_name: full_name.into(),
        }
    }
}

/// One `types` entry of a package manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Component kind.
    pub kind: ComponentKind,
    /// Member full names, in submission order.
    pub members: Vec<String>,
}

/// Whether a package adds or removes components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageKind {
    /// Create or update the listed components.
    Deploy,
    /// Delete the listed components.
    Destroy,
}

/// What gets submitted to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPackage {
    /// Additive or destructive.
    pub kind: PackageKind,
    /// API version of the target's metadata format.
    pub api_version: String,
    /// Components grouped by kind. Kinds appear in first-seen order.
    pub manifest: Vec<ManifestEntry>,
    /// Definitions for an additive package; empty for a destructive one.
    #[serde(default)]
    pub units: Vec<GeneratedUnit>,
}

impl DeploymentPackage {
    /// Builds an additive package from generated units.
    #[must_use]
    pub fn from_units(units: &[GeneratedUnit], api_version: impl Into<String>) -> Self {
        let components: Vec<_> = units.iter().map(GeneratedUnit::component).collect();
        Self {
            kind: PackageKind::Deploy,
            api_version: api_version.into(),
            manifest: group_by_kind(&components),
            units: units.to_vec(),
        }
    }

    /// Builds a destructive package deleting exactly `components`.
    #[must_use]
    pub fn destructive(components: &[ComponentDescriptor], api_version: impl Into<String>) -> Self {
        Self {
            kind: PackageKind::Destroy,
            api_version: api_version.into(),
            manifest: group_by_kind(components),
            units: Vec::new(),
        }
    }

    /// Flattens the manifest back into a component list.
    #[must_use]
    pub fn components(&self) -> Vec<ComponentDescriptor> {
        self.manifest
            .iter()
            .flat_map(|entry| {
                entry
                    .members
                    .iter()
                    .map(move |member| ComponentDescriptor::new(entry.kind, member.clone()))
            })
            .collect()
    }

    /// Number of components in the manifest.
    #[must_use]
    pub fn len(&self) -> usize {
        self.manifest.iter().map(|entry| entry.members.len()).sum()
    }

    /// Returns true when the manifest lists nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// SHA-256 fingerprint of the package contents.
    #[must_use]
    pub fn checksum(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

fn group_by_kind(components: &[ComponentDescriptor]) -> Vec<ManifestEntry> {
    let mut manifest: Vec<ManifestEntry> = Vec::new();
    for component in components {
        match manifest.iter_mut().find(|entry| entry.kind == component.kind) {
            Some(entry) => entry.members.push(component.full_name.clone()),
            None => manifest.push(ManifestEntry {
                kind: component.kind,
                members: vec![component.full_name.clone()],
            }),
        }
    }
    manifest
}

/// Options passed with a deploy call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOptions {
    /// Validate on the target without committing.
    #[serde(default)]
    pub check_only: bool,
    /// Ask the target to roll back the whole package on any component error.
    #[serde(default = "default_rollback_on_error")]
    pub rollback_on_error: bool,
    /// Delete destroyed components immediately instead of soft-deleting.
    #[serde(default)]
    pub purge_on_delete: bool,
    /// Key the gateway may use to deduplicate resubmissions.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

fn default_rollback_on_error() -> bool {
    true
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            check_only: false,
            rollback_on_error: default_rollback_on_error(),
            purge_on_delete: false,
            idempotency_key: None,
        }
    }
}

impl DeployOptions {
    /// Sets the idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// One status check of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Current status.
    pub status: DeploymentStatus,
    /// Error message for failed deployments.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Per-component failure messages.
    #[serde(default)]
    pub component_failures: Vec<String>,
}

impl StatusReport {
    /// Creates a report with no errors.
    #[must_use]
    pub fn new(status: DeploymentStatus) -> Self {
        Self {
            status,
            error_message: None,
            component_failures: Vec::new(),
        }
    }

    /// Creates a failed report.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: DeploymentStatus::Failed,
            error_message: Some(message.into()),
            component_failures: Vec::new(),
        }
    }

    /// The best available description of what went wrong.
    #[must_use]
    pub fn failure_message(&self) -> Option<String> {
        match (&self.error_message, self.component_failures.is_empty()) {
            (Some(message), true) => Some(message.clone()),
            (Some(message), false) => {
                Some(format!("{message} ({})", self.component_failures.join("; ")))
            }
            (None, false) => Some(self.component_failures.join("; ")),
            (None, true) => None,
        }
    }
}

/// Bounds for status polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOptions {
    /// Maximum number of status checks.
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    /// Pause between checks in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_max_polls() -> u32 {
    60
}

fn default_poll_interval_ms() -> u64 {
    2000
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            max_polls: default_max_polls(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl PollOptions {
    /// Creates poll options.
    #[must_use]
    pub fn new(max_polls: u32, poll_interval_ms: u64) -> Self {
        Self {
            max_polls,
            poll_interval_ms,
        }
    }

    /// Interval as a `Duration`.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Result of polling a deployment to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOutcome {
    /// True only for a full success.
    pub success: bool,
    /// Last observed status.
    pub status: DeploymentStatus,
    /// Failure description, if any.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Number of status checks made.
    pub polls: u32,
}

/// What the gateway reports as part of a finished deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentDetails {
    /// Components touched by the deployment.
    #[serde(default)]
    pub components: Vec<ComponentDescriptor>,
}

/// The record of what was submitted, kept for exact-match rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentDescriptor {
    /// Deployment id assigned by the gateway.
    pub external_id: String,
    /// Target system the package went to.
    pub target_id: String,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
    /// Last known status.
    pub status: DeploymentStatus,
    /// Components submitted, in manifest order.
    pub components: Vec<ComponentDescriptor>,
    /// Fingerprint of the submitted package.
    pub package_checksum: String,
}

impl DeploymentDescriptor {
    /// Records a fresh submission.
    #[must_use]
    pub fn submitted(
        external_id: impl Into<String>,
        target: &TargetSystem,
        package: &DeploymentPackage,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            target_id: target.id.clone(),
            submitted_at: Utc::now(),
            status: DeploymentStatus::Pending,
            components: package.components(),
            package_checksum: package.checksum(),
        }
    }

    /// Full names of the recorded components.
    #[must_use]
    pub fn component_names(&self) -> Vec<&str> {
        self.components.iter().map(|c| c.full_name.as_str()).collect()
    }
}
