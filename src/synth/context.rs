//! Evaluation context construction.
//!
//! A context is the JSON document that template expressions evaluate
//! against. It is built once per descriptor batch (component-level) or per
//! trait instance (trait-level) and never mutated afterward; every merge
//! step produces a new value.
//!
//! Parameter precedence, highest to lowest:
//! 1. ComponentDeployment overrides for this environment
//! 2. declared component / trait-instance parameters
//! 3. schema defaults

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::crd::{
    Component, ComponentDeployment, ComponentType, ConfigurationOverrides, ParameterSchema, Trait,
    TraitBinding, Workload,
};
use crate::synth::schema::Schema;
use crate::{Error, Result};

/// Environment identity exposed to templates as `environment.*`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvironmentContext {
    /// Environment name
    pub name: String,
    /// Virtual host for workloads in this environment
    pub virtual_host: Option<String>,
}

/// Generated object metadata exposed to templates as `metadata.*`.
///
/// The name carries the deterministic component/environment identity that
/// generated resource names hang off; the labels are the tracking labels
/// stamped onto every synthesized document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeneratedMetadata {
    /// Generated base name
    pub name: String,
    /// Target namespace on the data plane
    pub namespace: String,
    /// Tracking labels stamped onto every synthesized document
    pub labels: BTreeMap<String, String>,
    /// Annotations stamped onto every synthesized document
    pub annotations: BTreeMap<String, String>,
}

/// Per-synthesis-pass cache of parsed parameter schemas.
///
/// Keyed by type/trait name so one pass rendering many descriptors of the
/// same type parses each schema once.
#[derive(Default)]
pub struct SchemaCache {
    entries: HashMap<String, Arc<Schema>>,
}

impl SchemaCache {
    /// Fetch the parsed schema for `key`, building it from `spec` on miss
    pub fn get_or_build(&mut self, key: &str, spec: Option<&ParameterSchema>) -> Result<Arc<Schema>> {
        if let Some(cached) = self.entries.get(key) {
            return Ok(Arc::clone(cached));
        }
        let schema = Arc::new(Schema::build(spec)?);
        self.entries.insert(key.to_string(), Arc::clone(&schema));
        Ok(schema)
    }
}

/// Inputs for a component-level evaluation context
pub struct ComponentContextInput<'a> {
    /// Component being rendered
    pub component: &'a Component,
    /// Its ComponentType definition
    pub component_type: &'a ComponentType,
    /// Runtime workload definition, when one exists
    pub workload: Option<&'a Workload>,
    /// Per-environment overrides, when any exist
    pub deployment: Option<&'a ComponentDeployment>,
    /// Target environment identity
    pub environment: &'a EnvironmentContext,
    /// Generated object metadata
    pub metadata: &'a GeneratedMetadata,
}

/// Inputs for a trait-level evaluation context
pub struct TraitContextInput<'a> {
    /// Trait definition being instantiated
    pub trait_def: &'a Trait,
    /// The instance binding on the component
    pub binding: &'a TraitBinding,
    /// Component the trait is attached to
    pub component: &'a Component,
    /// Per-environment overrides, when any exist
    pub deployment: Option<&'a ComponentDeployment>,
    /// Target environment identity
    pub environment: &'a EnvironmentContext,
    /// Generated object metadata
    pub metadata: &'a GeneratedMetadata,
}

/// Build the evaluation context for a component's own resource descriptors
pub fn build_component_context(
    input: &ComponentContextInput<'_>,
    cache: &mut SchemaCache,
) -> Result<serde_json::Value> {
    validate_metadata(input.metadata)?;
    let component_name = required_name(&input.component.metadata.name, "component")?;
    let type_name = required_name(&input.component_type.metadata.name, "component type")?;

    let schema = cache.get_or_build(
        &format!("componenttype/{type_name}"),
        input.component_type.spec.schema.as_ref(),
    )?;

    let mut parameters = input
        .component
        .spec
        .parameters
        .clone()
        .unwrap_or_else(empty_object);
    if let Some(overrides) = input.deployment.and_then(|d| d.spec.overrides.clone()) {
        parameters = deep_merge(parameters, overrides);
    }
    let parameters = schema.apply_defaults(parameters);

    let mut ctx = serde_json::Map::new();
    ctx.insert("parameters".to_string(), parameters);
    ctx.insert(
        "component".to_string(),
        component_section(component_name, input.component),
    );
    if let Some(workload) = input.workload {
        ctx.insert("workload".to_string(), workload_section(workload)?);
        ctx.insert(
            "configurations".to_string(),
            configurations_section(
                workload,
                input
                    .deployment
                    .and_then(|d| d.spec.configuration_overrides.as_ref()),
            ),
        );
    }
    ctx.insert("environment".to_string(), environment_section(input.environment));
    ctx.insert("metadata".to_string(), metadata_section(input.metadata));
    Ok(serde_json::Value::Object(ctx))
}

/// Build the evaluation context for one trait instance's `creates` and
/// `patches`
pub fn build_trait_context(
    input: &TraitContextInput<'_>,
    cache: &mut SchemaCache,
) -> Result<serde_json::Value> {
    validate_metadata(input.metadata)?;
    let component_name = required_name(&input.component.metadata.name, "component")?;
    let trait_name = required_name(&input.trait_def.metadata.name, "trait")?;

    let schema = cache.get_or_build(
        &format!("trait/{trait_name}"),
        input.trait_def.spec.schema.as_ref(),
    )?;

    let mut parameters = input.binding.parameters.clone().unwrap_or_else(empty_object);
    // Overrides are keyed by instanceName, unique across all trait bindings
    if let Some(overrides) = input
        .deployment
        .and_then(|d| d.spec.trait_overrides.get(&input.binding.instance_name))
    {
        parameters = deep_merge(parameters, overrides.clone());
    }
    let parameters = schema.apply_defaults(parameters);

    let mut ctx = serde_json::Map::new();
    ctx.insert("parameters".to_string(), parameters);
    ctx.insert(
        "trait".to_string(),
        serde_json::json!({
            "name": trait_name,
            "instanceName": input.binding.instance_name,
        }),
    );
    ctx.insert(
        "component".to_string(),
        component_section(component_name, input.component),
    );
    ctx.insert("environment".to_string(), environment_section(input.environment));
    ctx.insert("metadata".to_string(), metadata_section(input.metadata));
    Ok(serde_json::Value::Object(ctx))
}

/// Deep recursive merge: `overlay` wins; maps merge key-wise, anything else
/// is replaced wholesale (no array splicing)
pub fn deep_merge(base: serde_json::Value, overlay: serde_json::Value) -> serde_json::Value {
    match (base, overlay) {
        (serde_json::Value::Object(mut base), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.remove(&key) {
                    Some(existing) => {
                        base.insert(key, deep_merge(existing, value));
                    }
                    None => {
                        base.insert(key, value);
                    }
                }
            }
            serde_json::Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

fn validate_metadata(metadata: &GeneratedMetadata) -> Result<()> {
    if metadata.name.is_empty() {
        return Err(Error::input("generated metadata.name is required"));
    }
    if metadata.namespace.is_empty() {
        return Err(Error::input("generated metadata.namespace is required"));
    }
    Ok(())
}

fn required_name<'a>(name: &'a Option<String>, what: &str) -> Result<&'a str> {
    name.as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::input(format!("{what} name is required")))
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn component_section(name: &str, component: &Component) -> serde_json::Value {
    let mut section = serde_json::Map::new();
    section.insert("name".to_string(), name.into());
    if let Some(namespace) = component.metadata.namespace.as_deref().filter(|n| !n.is_empty()) {
        section.insert("namespace".to_string(), namespace.into());
    }
    serde_json::Value::Object(section)
}

fn environment_section(environment: &EnvironmentContext) -> serde_json::Value {
    serde_json::json!({
        "name": environment.name,
        "vhost": environment.virtual_host.clone().unwrap_or_default(),
    })
}

fn metadata_section(metadata: &GeneratedMetadata) -> serde_json::Value {
    let mut section = serde_json::Map::new();
    section.insert("name".to_string(), metadata.name.clone().into());
    section.insert("namespace".to_string(), metadata.namespace.clone().into());
    if !metadata.labels.is_empty() {
        section.insert(
            "labels".to_string(),
            serde_json::json!(metadata.labels.clone()),
        );
    }
    if !metadata.annotations.is_empty() {
        section.insert(
            "annotations".to_string(),
            serde_json::json!(metadata.annotations.clone()),
        );
    }
    serde_json::Value::Object(section)
}

fn workload_section(workload: &Workload) -> Result<serde_json::Value> {
    let name = required_name(&workload.metadata.name, "workload")?;
    let containers =
        serde_json::to_value(&workload.spec.containers).map_err(|e| Error::serialization(e.to_string()))?;
    Ok(serde_json::json!({"name": name, "containers": containers}))
}

/// Merge the workload's declared env vars and files with environment
/// overrides, by key. The merged lists are sorted by name so repeated
/// renders are byte-identical.
fn configurations_section(
    workload: &Workload,
    overrides: Option<&ConfigurationOverrides>,
) -> serde_json::Value {
    let mut envs: BTreeMap<String, String> = BTreeMap::new();
    let mut files: BTreeMap<String, (String, String)> = BTreeMap::new();

    for container in workload.spec.containers.values() {
        for entry in &container.env {
            envs.insert(entry.key.clone(), entry.value.clone());
        }
        for file in &container.files {
            files.insert(file.key.clone(), (file.value.clone(), file.mount_path.clone()));
        }
    }
    if let Some(overrides) = overrides {
        for entry in &overrides.env {
            envs.insert(entry.key.clone(), entry.value.clone());
        }
        for file in &overrides.files {
            files.insert(file.key.clone(), (file.value.clone(), file.mount_path.clone()));
        }
    }

    let envs: Vec<serde_json::Value> = envs
        .into_iter()
        .map(|(name, value)| serde_json::json!({"name": name, "value": value}))
        .collect();
    let files: Vec<serde_json::Value> = files
        .into_iter()
        .map(|(name, (value, mount_path))| {
            serde_json::json!({"name": name, "value": value, "mountPath": mount_path})
        })
        .collect();
    serde_json::json!({"envs": envs, "files": files})
}
