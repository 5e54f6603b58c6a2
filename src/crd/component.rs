//! Component-side Custom Resource Definitions.
//!
//! These types describe *what* to synthesize: a Component picks a
//! ComponentType and binds Traits; the ComponentType and Traits carry
//! resource descriptors with `${...}` expression templates; the Workload
//! carries runtime configuration; the ComponentDeployment carries
//! per-environment overrides. All of them are read-only inputs to the
//! synthesis pipeline.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a Component
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "weaver.dev",
    version = "v1alpha1",
    kind = "Component",
    plural = "components",
    shortname = "comp",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// Ownership information for the component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<ComponentOwner>,

    /// Name of the ComponentType that defines this component's resources
    pub component_type: String,

    /// Parameter values, validated against the ComponentType schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,

    /// Trait instances composed into this component.
    ///
    /// The same trait may be bound multiple times under different instance
    /// names; instance names must be unique across all bindings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traits: Vec<TraitBinding>,
}

impl ComponentSpec {
    /// Validate the component specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        let mut seen = std::collections::BTreeSet::new();
        for binding in &self.traits {
            if binding.name.is_empty() || binding.instance_name.is_empty() {
                return Err(crate::Error::input(
                    "trait bindings require both name and instanceName",
                ));
            }
            if !seen.insert(binding.instance_name.as_str()) {
                return Err(crate::Error::input(format!(
                    "duplicate trait instanceName {:?}",
                    binding.instance_name
                )));
            }
        }
        Ok(())
    }
}

/// Ownership information for a component
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentOwner {
    /// Project the component belongs to
    pub project_name: String,
}

/// A trait instance attached to a component
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TraitBinding {
    /// Name of the Trait resource to instantiate
    pub name: String,

    /// Unique instance name within the component
    pub instance_name: String,

    /// Instance parameter values, validated against the Trait schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Specification for a ComponentType
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "weaver.dev",
    version = "v1alpha1",
    kind = "ComponentType",
    plural = "componenttypes",
    shortname = "ct",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ComponentTypeSpec {
    /// Parameter schema with defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<ParameterSchema>,

    /// Resource descriptors rendered for every component of this type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceDescriptor>,
}

/// Schema for component/trait parameters.
///
/// Field specs are compact strings like `"integer | default=1"`; nested
/// objects are expressed as nested maps. `env_overrides` lists the subset of
/// fields (possibly with different defaults) that a ComponentDeployment may
/// override per environment; both sections are merged when defaulting.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSchema {
    /// Schema for declared parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,

    /// Schema for environment-override parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_overrides: Option<serde_json::Value>,
}

/// A template for zero or more concrete resource documents
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    /// Identifier, unique within the owning ComponentType or Trait
    pub id: String,

    /// Boolean expression; a false result discards the descriptor entirely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_when: Option<String>,

    /// Collection expression; the template is rendered once per element
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_each: Option<String>,

    /// Loop variable name bound for each `for_each` element
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var: Option<String>,

    /// Object literal whose string leaves may contain `${...}` expressions
    pub template: serde_json::Value,
}

/// Specification for a Trait
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "weaver.dev",
    version = "v1alpha1",
    kind = "Trait",
    plural = "traits",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TraitSpec {
    /// Parameter schema with defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<ParameterSchema>,

    /// Additional resource descriptors, rendered in the trait's own context
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub creates: Vec<ResourceDescriptor>,

    /// Patches applied to already-synthesized resources
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<TraitPatch>,
}

/// A patch contributed by a trait, targeted at resources by GVK
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TraitPatch {
    /// Selector for the documents to patch
    pub target: GvkTarget,

    /// Operations applied, in order, to every matching document
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<PatchOperation>,
}

/// (group, version, kind) selector for patch targeting
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GvkTarget {
    /// API group; empty string for the core group
    #[serde(default)]
    pub group: String,

    /// API version within the group
    pub version: String,

    /// Resource kind
    pub kind: String,
}

/// A single JSON-Patch-style operation
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatchOperation {
    /// Operation kind
    pub op: PatchOp,

    /// JSON-Pointer path (e.g., `/metadata/labels`)
    pub path: String,

    /// Value for add/replace; string leaves may contain `${...}` expressions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// JSON-Patch operation kinds supported by trait patches
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    /// Insert or replace the value at the path
    Add,
    /// Replace the existing value at the path
    Replace,
    /// Remove the value at the path
    Remove,
}

/// Specification for a Workload
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "weaver.dev",
    version = "v1alpha1",
    kind = "Workload",
    plural = "workloads",
    shortname = "wl",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    /// Containers keyed by container name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub containers: BTreeMap<String, ContainerSpec>,
}

/// Runtime definition of one container
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    /// Container image reference
    pub image: String,

    /// Declared environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvEntry>,

    /// Declared configuration files
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileEntry>,
}

/// A declared environment variable
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvEntry {
    /// Variable name
    pub key: String,
    /// Variable value
    pub value: String,
}

/// A declared configuration file
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// File name
    pub key: String,
    /// File content
    pub value: String,
    /// Directory the file is mounted under
    pub mount_path: String,
}

/// Specification for a ComponentDeployment (per-environment overrides)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "weaver.dev",
    version = "v1alpha1",
    kind = "ComponentDeployment",
    plural = "componentdeployments",
    shortname = "cdep",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDeploymentSpec {
    /// Component parameter overrides for this environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<serde_json::Value>,

    /// Trait parameter overrides keyed by trait instance name.
    ///
    /// Keyed by instanceName rather than trait name because instance names
    /// are unique across all traits on a component.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub trait_overrides: BTreeMap<String, serde_json::Value>,

    /// Environment-specific configuration overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_overrides: Option<ConfigurationOverrides>,
}

/// Environment-specific env-var and file overrides, merged by key over the
/// workload's declared base configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationOverrides {
    /// Environment variable overrides and additions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvEntry>,

    /// File overrides and additions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(name: &str, instance: &str) -> TraitBinding {
        TraitBinding {
            name: name.to_string(),
            instance_name: instance.to_string(),
            parameters: None,
        }
    }

    #[test]
    fn test_component_spec_accepts_unique_instance_names() {
        let spec = ComponentSpec {
            owner: None,
            component_type: "web-app".to_string(),
            parameters: None,
            traits: vec![binding("mysql", "db-1"), binding("mysql", "db-2")],
        };
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_component_spec_rejects_duplicate_instance_names() {
        let spec = ComponentSpec {
            owner: None,
            component_type: "web-app".to_string(),
            parameters: None,
            traits: vec![binding("mysql", "db-1"), binding("redis", "db-1")],
        };
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("db-1"));
    }

    #[test]
    fn test_component_spec_rejects_empty_binding_fields() {
        let spec = ComponentSpec {
            owner: None,
            component_type: "web-app".to_string(),
            parameters: None,
            traits: vec![binding("", "db-1")],
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_resource_descriptor_yaml_round_trip() {
        let yaml = r#"
id: deployment
includeWhen: "${parameters.expose}"
template:
  apiVersion: apps/v1
  kind: Deployment
  metadata:
    name: "${component.name}"
"#;
        let desc: ResourceDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(desc.id, "deployment");
        assert_eq!(desc.include_when.as_deref(), Some("${parameters.expose}"));
        assert!(desc.for_each.is_none());
        assert_eq!(desc.template["kind"], "Deployment");
    }

    #[test]
    fn test_trait_patch_yaml_round_trip() {
        let yaml = r#"
target:
  kind: Deployment
  group: apps
  version: v1
operations:
  - op: add
    path: /metadata/labels
    value:
      monitoring: enabled
"#;
        let patch: TraitPatch = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(patch.target.kind, "Deployment");
        assert_eq!(patch.operations.len(), 1);
        assert_eq!(patch.operations[0].op, PatchOp::Add);
        assert_eq!(patch.operations[0].path, "/metadata/labels");
    }
}
