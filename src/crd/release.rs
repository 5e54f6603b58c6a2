//! Release Custom Resource Definition.
//!
//! A Release is the immutable (per-generation) declaration of the resource
//! documents desired for one component in one environment. The reconciler
//! never edits `spec`; it only writes `status` (inventory + conditions).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Specification for a Release
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "weaver.dev",
    version = "v1alpha1",
    kind = "Release",
    plural = "releases",
    shortname = "rel",
    status = "ReleaseStatus",
    namespaced,
    printcolumn = r#"{"name":"Environment","type":"string","jsonPath":".spec.environmentName"}"#,
    printcolumn = r#"{"name":"Resources","type":"integer","jsonPath":".status.resources.length()"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSpec {
    /// Environment this release deploys to
    pub environment_name: String,

    /// Ownership information
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<ReleaseOwner>,

    /// Desired resource documents, each with a caller-assigned ID unique
    /// within the release
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ReleaseResource>,

    /// Steady-state reconcile interval in seconds.
    ///
    /// Defaults to 300; 0 disables periodic requeue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,

    /// Reconcile interval in seconds while resources are transitioning.
    ///
    /// Defaults to 10; 0 disables periodic requeue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progressing_interval_seconds: Option<u64>,
}

impl ReleaseSpec {
    /// Validate the release specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        let mut seen = std::collections::BTreeSet::new();
        for resource in &self.resources {
            if resource.id.is_empty() {
                return Err(crate::Error::input("release resource id must be non-empty"));
            }
            if !seen.insert(resource.id.as_str()) {
                return Err(crate::Error::input(format!(
                    "duplicate release resource id {:?}",
                    resource.id
                )));
            }
        }
        Ok(())
    }
}

/// Ownership information for a release
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseOwner {
    /// Project the release belongs to
    pub project_name: String,

    /// Component the release was synthesized from
    pub component_name: String,
}

/// One desired resource document within a release
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseResource {
    /// Caller-assigned ID, unique within the release
    pub id: String,

    /// Full resource document (apiVersion, kind, metadata, spec/data)
    pub object: serde_json::Value,
}

/// Status for a Release
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseStatus {
    /// Inventory of resources applied in the last successful pass.
    ///
    /// This is the historical record that lets stale detection find orphans
    /// whose kind has disappeared from the current spec entirely.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceStatus>,

    /// Conditions representing the release state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Inventory record for one applied resource
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    /// API group; empty string for the core group
    #[serde(default)]
    pub group: String,

    /// API version within the group
    pub version: String,

    /// Resource kind
    pub kind: String,

    /// Caller-assigned resource ID
    pub id: String,

    /// Resource name
    pub name: String,

    /// Resource namespace; empty for cluster-scoped resources
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Last observed health of the resource
    #[serde(default)]
    pub health: HealthStatus,
}

/// Observed health of a tracked resource
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum HealthStatus {
    /// The resource reports a terminal ready/available state
    Healthy,
    /// The resource is still converging
    Progressing,
    /// Health could not be determined
    #[default]
    Unknown,
}

impl HealthStatus {
    /// Whether this health state should drive the shorter progressing
    /// requeue interval
    pub fn is_transitioning(self) -> bool {
        !matches!(self, HealthStatus::Healthy)
    }
}
