//! The resource synthesis pipeline.
//!
//! One [`Pipeline::render`] call turns a component's type descriptors plus
//! each attached trait's `creates` and `patches` into a flat, validated,
//! deterministically sorted list of resource documents. The pass is pure:
//! identical inputs always produce identical output, and any failure aborts
//! the whole batch with no partial result.

use std::collections::BTreeMap;

use crate::crd::{
    Component, ComponentDeployment, ComponentType, PatchOp, PatchOperation, ResourceDescriptor,
    Trait, TraitBinding, TraitPatch, Workload,
};
use crate::expr::{has_expression, whole_expression, ExpressionEvaluator, TemplateEvaluator, OMIT_MARKER};
use crate::labels;
use crate::synth::context::{
    build_component_context, build_trait_context, ComponentContextInput, EnvironmentContext,
    GeneratedMetadata, SchemaCache, TraitContextInput,
};
use crate::{Error, Result};

/// A trait binding paired with its resolved definition
pub struct ResolvedTrait<'a> {
    /// The Trait resource the binding refers to
    pub definition: &'a Trait,
    /// The instance binding from the component spec
    pub binding: &'a TraitBinding,
}

/// Everything one synthesis pass reads
pub struct RenderInput<'a> {
    /// Component being rendered
    pub component: &'a Component,
    /// Its ComponentType definition
    pub component_type: &'a ComponentType,
    /// Trait instances in the component's declared order
    pub traits: &'a [ResolvedTrait<'a>],
    /// Runtime workload definition, when one exists
    pub workload: Option<&'a Workload>,
    /// Per-environment overrides, when any exist
    pub deployment: Option<&'a ComponentDeployment>,
    /// Target environment identity
    pub environment: EnvironmentContext,
    /// Generated object metadata
    pub metadata: GeneratedMetadata,
}

/// Result of one synthesis pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderOutput {
    /// Validated resource documents in deterministic order
    pub resources: Vec<serde_json::Value>,
}

/// The synthesis pipeline.
///
/// Holds the expression evaluator and the optional caller-supplied labels
/// and annotations stamped onto every synthesized document.
pub struct Pipeline {
    evaluator: Box<dyn ExpressionEvaluator>,
    resource_labels: BTreeMap<String, String>,
    resource_annotations: BTreeMap<String, String>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Create a pipeline with the standard template evaluator
    pub fn new() -> Self {
        Self::with_evaluator(Box::new(TemplateEvaluator::new()))
    }

    /// Create a pipeline with a caller-supplied evaluator
    pub fn with_evaluator(evaluator: Box<dyn ExpressionEvaluator>) -> Self {
        Self {
            evaluator,
            resource_labels: BTreeMap::new(),
            resource_annotations: BTreeMap::new(),
        }
    }

    /// Add labels stamped onto every synthesized document
    pub fn with_resource_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.resource_labels.extend(labels);
        self
    }

    /// Add annotations stamped onto every synthesized document
    pub fn with_resource_annotations(mut self, annotations: BTreeMap<String, String>) -> Self {
        self.resource_annotations.extend(annotations);
        self
    }

    /// Run one synthesis pass
    pub fn render(&self, input: &RenderInput<'_>) -> Result<RenderOutput> {
        input.component.spec.validate()?;
        let mut cache = SchemaCache::default();

        let component_ctx = build_component_context(
            &ComponentContextInput {
                component: input.component,
                component_type: input.component_type,
                workload: input.workload,
                deployment: input.deployment,
                environment: &input.environment,
                metadata: &input.metadata,
            },
            &mut cache,
        )?;

        let mut resources = Vec::new();
        for descriptor in &input.component_type.spec.resources {
            resources.extend(self.render_descriptor(descriptor, &component_ctx)?);
        }

        // Traits run in declared order: creates first, then patches over
        // everything synthesized so far
        for resolved in input.traits {
            let trait_ctx = build_trait_context(
                &TraitContextInput {
                    trait_def: resolved.definition,
                    binding: resolved.binding,
                    component: input.component,
                    deployment: input.deployment,
                    environment: &input.environment,
                    metadata: &input.metadata,
                },
                &mut cache,
            )?;

            for descriptor in &resolved.definition.spec.creates {
                resources.extend(
                    self.render_descriptor(descriptor, &trait_ctx)
                        .map_err(|e| trait_error(&resolved.binding.instance_name, e))?,
                );
            }
            for patch in &resolved.definition.spec.patches {
                self.apply_patch(&mut resources, patch, &trait_ctx)
                    .map_err(|e| trait_error(&resolved.binding.instance_name, e))?;
            }
        }

        for resource in &mut resources {
            self.stamp_metadata(resource, input);
        }
        validate_documents(&resources)?;
        sort_documents(&mut resources);
        Ok(RenderOutput { resources })
    }

    /// Render one descriptor into zero or more documents
    fn render_descriptor(
        &self,
        descriptor: &ResourceDescriptor,
        ctx: &serde_json::Value,
    ) -> Result<Vec<serde_json::Value>> {
        if let Some(condition) = &descriptor.include_when {
            if !self
                .evaluate_condition(condition, ctx)
                .map_err(|e| descriptor_error(&descriptor.id, e))?
            {
                return Ok(Vec::new());
            }
        }

        let Some(collection) = &descriptor.for_each else {
            let doc = self
                .render_value(&descriptor.template, ctx)
                .map_err(|e| descriptor_error(&descriptor.id, e))?;
            return Ok(vec![doc]);
        };

        let elements = self
            .evaluate_expression(collection, ctx)
            .map_err(|e| descriptor_error(&descriptor.id, e))?;
        let serde_json::Value::Array(elements) = elements else {
            return Err(Error::synthesis(format!(
                "descriptor {:?}: forEach expression did not yield a list",
                descriptor.id
            )));
        };

        let var = descriptor.var.as_deref().unwrap_or("item");
        let mut docs = Vec::with_capacity(elements.len());
        for element in elements {
            // Derived context: the loop variable shadows nothing, contexts
            // are never mutated in place
            let mut scoped = ctx.clone();
            if let serde_json::Value::Object(map) = &mut scoped {
                map.insert(var.to_string(), element);
            }
            docs.push(
                self.render_value(&descriptor.template, &scoped)
                    .map_err(|e| descriptor_error(&descriptor.id, e))?,
            );
        }
        Ok(docs)
    }

    /// Evaluate an expression string that may or may not carry `${}` markers
    fn evaluate_expression(&self, raw: &str, ctx: &serde_json::Value) -> Result<serde_json::Value> {
        let expr = whole_expression(raw).unwrap_or_else(|| raw.trim());
        self.evaluator.evaluate(expr, ctx)
    }

    fn evaluate_condition(&self, raw: &str, ctx: &serde_json::Value) -> Result<bool> {
        match self.evaluate_expression(raw, ctx)? {
            serde_json::Value::Bool(b) => Ok(b),
            other => Err(Error::synthesis(format!(
                "includeWhen must evaluate to a boolean, got {other}"
            ))),
        }
    }

    /// Deep-copy a template value, substituting every expression leaf.
    ///
    /// Whole-expression strings keep the evaluated value's type; mixed text
    /// interpolates. Map entries and list elements whose value (or key)
    /// evaluates to the omit sentinel are dropped.
    fn render_value(&self, value: &serde_json::Value, ctx: &serde_json::Value) -> Result<serde_json::Value> {
        match value {
            serde_json::Value::String(s) => {
                if let Some(expr) = whole_expression(s) {
                    self.evaluator.evaluate(expr, ctx)
                } else if has_expression(s) {
                    Ok(serde_json::Value::String(self.evaluator.interpolate(s, ctx)?))
                } else {
                    Ok(value.clone())
                }
            }
            serde_json::Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let rendered = self.render_value(item, ctx)?;
                    if !is_omitted(&rendered) {
                        out.push(rendered);
                    }
                }
                Ok(serde_json::Value::Array(out))
            }
            serde_json::Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (key, entry) in map {
                    let Some(key) = self.render_key(key, ctx)? else {
                        continue;
                    };
                    let rendered = self.render_value(entry, ctx)?;
                    if !is_omitted(&rendered) {
                        out.insert(key, rendered);
                    }
                }
                Ok(serde_json::Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// Map keys may themselves be expressions (file names, env var names)
    fn render_key(&self, key: &str, ctx: &serde_json::Value) -> Result<Option<String>> {
        if let Some(expr) = whole_expression(key) {
            match self.evaluator.evaluate(expr, ctx)? {
                serde_json::Value::String(s) if s == OMIT_MARKER => Ok(None),
                serde_json::Value::String(s) => Ok(Some(s)),
                other => Err(Error::synthesis(format!(
                    "map key expression {key:?} must yield a string, got {other}"
                ))),
            }
        } else if has_expression(key) {
            Ok(Some(self.evaluator.interpolate(key, ctx)?))
        } else {
            Ok(Some(key.to_string()))
        }
    }

    /// Apply one trait patch to every already-synthesized document matching
    /// its GVK target. Zero matches is a no-op.
    fn apply_patch(
        &self,
        documents: &mut [serde_json::Value],
        patch: &TraitPatch,
        ctx: &serde_json::Value,
    ) -> Result<()> {
        for document in documents.iter_mut() {
            if !matches_target(document, patch) {
                continue;
            }
            for operation in &patch.operations {
                let value = match &operation.value {
                    Some(value) => Some(self.render_value(value, ctx)?),
                    None => None,
                };
                apply_operation(document, operation, value)?;
            }
        }
        Ok(())
    }

    /// Stamp tracking labels and caller-supplied labels/annotations.
    ///
    /// Runs after trait patches, merging over whatever labels the template
    /// or a patch set; tracking labels are authoritative on conflict.
    fn stamp_metadata(&self, document: &mut serde_json::Value, input: &RenderInput<'_>) {
        let Some(root) = document.as_object_mut() else {
            return;
        };
        let metadata = root
            .entry("metadata")
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        let Some(metadata) = metadata.as_object_mut() else {
            return;
        };

        let labels_entry = metadata
            .entry("labels")
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        if let Some(labels_map) = labels_entry.as_object_mut() {
            for (key, value) in &input.metadata.labels {
                labels_map.insert(key.clone(), value.clone().into());
            }
            for (key, value) in &self.resource_labels {
                labels_map.insert(key.clone(), value.clone().into());
            }
            if let Some(name) = input.component.metadata.name.as_deref() {
                labels_map.insert(labels::COMPONENT_NAME.to_string(), name.into());
            }
            labels_map.insert(
                labels::ENVIRONMENT_NAME.to_string(),
                input.environment.name.clone().into(),
            );
        }

        if !input.metadata.annotations.is_empty() || !self.resource_annotations.is_empty() {
            let annotations_entry = metadata
                .entry("annotations")
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            if let Some(annotations_map) = annotations_entry.as_object_mut() {
                for (key, value) in &input.metadata.annotations {
                    annotations_map.insert(key.clone(), value.clone().into());
                }
                for (key, value) in &self.resource_annotations {
                    annotations_map.insert(key.clone(), value.clone().into());
                }
            }
        }
    }
}

fn descriptor_error(id: &str, err: Error) -> Error {
    match err {
        Error::Synthesis(msg) if msg.starts_with("descriptor ") => Error::Synthesis(msg),
        err => Error::synthesis(format!("descriptor {id:?}: {err}")),
    }
}

fn trait_error(instance_name: &str, err: Error) -> Error {
    Error::synthesis(format!("trait instance {instance_name:?}: {err}"))
}

fn is_omitted(value: &serde_json::Value) -> bool {
    matches!(value, serde_json::Value::String(s) if s == OMIT_MARKER)
}

/// Split an apiVersion string into (group, version); the core group is ""
fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

fn matches_target(document: &serde_json::Value, patch: &TraitPatch) -> bool {
    let kind = document["kind"].as_str().unwrap_or_default();
    let api_version = document["apiVersion"].as_str().unwrap_or_default();
    let (group, version) = split_api_version(api_version);
    kind == patch.target.kind && group == patch.target.group && version == patch.target.version
}

/// Apply one JSON-Patch-style operation in place
fn apply_operation(
    document: &mut serde_json::Value,
    operation: &PatchOperation,
    value: Option<serde_json::Value>,
) -> Result<()> {
    let tokens = pointer_tokens(&operation.path)?;
    let Some((leaf, parents)) = tokens.split_last() else {
        return Err(Error::synthesis(format!(
            "patch path {:?} has no target field",
            operation.path
        )));
    };

    // Add materializes missing intermediate objects on its way down, the
    // same way a merge would; replace and remove stay strict.
    let create_missing = matches!(operation.op, PatchOp::Add);
    let mut target = &mut *document;
    for token in parents {
        target = match target {
            serde_json::Value::Object(map) => {
                if create_missing {
                    map.entry(token.clone())
                        .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()))
                } else {
                    map.get_mut(token).ok_or_else(|| {
                        Error::synthesis(format!(
                            "patch path {:?}: missing field {token:?}",
                            operation.path
                        ))
                    })?
                }
            }
            serde_json::Value::Array(items) => {
                let index = array_index(token, items.len(), false)?;
                &mut items[index]
            }
            _ => {
                return Err(Error::synthesis(format!(
                    "patch path {:?}: {token:?} is not addressable",
                    operation.path
                )))
            }
        };
    }

    match operation.op {
        PatchOp::Add => {
            let value = value.ok_or_else(|| Error::synthesis("add operation requires a value"))?;
            match target {
                serde_json::Value::Object(map) => {
                    map.insert(leaf.clone(), value);
                }
                serde_json::Value::Array(items) => {
                    if leaf == "-" {
                        items.push(value);
                    } else {
                        let index = array_index(leaf, items.len(), true)?;
                        items.insert(index, value);
                    }
                }
                _ => {
                    return Err(Error::synthesis(format!(
                        "patch path {:?}: parent is not a map or list",
                        operation.path
                    )))
                }
            }
        }
        PatchOp::Replace => {
            let value = value.ok_or_else(|| Error::synthesis("replace operation requires a value"))?;
            match target {
                serde_json::Value::Object(map) => {
                    if !map.contains_key(leaf) {
                        return Err(Error::synthesis(format!(
                            "patch path {:?}: field does not exist",
                            operation.path
                        )));
                    }
                    map.insert(leaf.clone(), value);
                }
                serde_json::Value::Array(items) => {
                    let index = array_index(leaf, items.len(), false)?;
                    items[index] = value;
                }
                _ => {
                    return Err(Error::synthesis(format!(
                        "patch path {:?}: parent is not a map or list",
                        operation.path
                    )))
                }
            }
        }
        PatchOp::Remove => match target {
            serde_json::Value::Object(map) => {
                map.remove(leaf);
            }
            serde_json::Value::Array(items) => {
                let index = array_index(leaf, items.len(), false)?;
                items.remove(index);
            }
            _ => {
                return Err(Error::synthesis(format!(
                    "patch path {:?}: parent is not a map or list",
                    operation.path
                )))
            }
        },
    }
    Ok(())
}

fn pointer_tokens(path: &str) -> Result<Vec<String>> {
    if !path.starts_with('/') {
        return Err(Error::synthesis(format!("patch path {path:?} must start with '/'")));
    }
    Ok(path[1..]
        .split('/')
        .map(|token| token.replace("~1", "/").replace("~0", "~"))
        .collect())
}

fn array_index(token: &str, len: usize, allow_end: bool) -> Result<usize> {
    let index: usize = token
        .parse()
        .map_err(|_| Error::synthesis(format!("bad list index {token:?}")))?;
    let bound = if allow_end { len + 1 } else { len };
    if index >= bound {
        return Err(Error::synthesis(format!("list index {index} out of bounds")));
    }
    Ok(index)
}

/// Batch validation: every document needs apiVersion, kind, and a name.
/// Any violation fails the whole pass.
fn validate_documents(documents: &[serde_json::Value]) -> Result<()> {
    for document in documents {
        let api_version = document["apiVersion"].as_str().unwrap_or_default();
        let kind = document["kind"].as_str().unwrap_or_default();
        let name = document["metadata"]["name"].as_str().unwrap_or_default();
        if api_version.is_empty() || kind.is_empty() || name.is_empty() {
            return Err(Error::synthesis(format!(
                "document missing apiVersion, kind, or metadata.name: apiVersion={api_version:?} kind={kind:?} name={name:?}"
            )));
        }
    }
    Ok(())
}

/// Workload-defining kinds sort before auxiliary kinds; ties break
/// lexicographically by (kind, name). Required for stable diffs, not for
/// apply correctness.
fn sort_documents(documents: &mut [serde_json::Value]) {
    documents.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
}

fn sort_key(document: &serde_json::Value) -> (u8, String, String) {
    let kind = document["kind"].as_str().unwrap_or_default().to_string();
    let name = document["metadata"]["name"].as_str().unwrap_or_default().to_string();
    (kind_weight(&kind), kind, name)
}

fn kind_weight(kind: &str) -> u8 {
    match kind {
        "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "CronJob" | "Job" | "Pod" => 0,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse<T: serde::de::DeserializeOwned>(yaml: &str) -> T {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn metadata() -> GeneratedMetadata {
        GeneratedMetadata {
            name: "test-app-dev-12345678".to_string(),
            namespace: "dp-test".to_string(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    fn environment(name: &str) -> EnvironmentContext {
        EnvironmentContext {
            name: name.to_string(),
            virtual_host: None,
        }
    }

    fn component(parameters: serde_json::Value) -> Component {
        let mut component: Component = parse(
            r#"
apiVersion: weaver.dev/v1alpha1
kind: Component
metadata:
  name: test-app
spec:
  componentType: service
"#,
        );
        component.spec.parameters = Some(parameters);
        component
    }

    fn service_type(resources_yaml: &str) -> ComponentType {
        parse(&format!(
            r#"
apiVersion: weaver.dev/v1alpha1
kind: ComponentType
metadata:
  name: service
spec:
  schema:
    parameters:
      replicas: "integer | default=1"
      expose: "boolean | default=false"
      secrets: "string"
  resources:
{resources_yaml}
"#,
        ))
    }

    fn render(
        component: &Component,
        component_type: &ComponentType,
        traits: &[ResolvedTrait<'_>],
        deployment: Option<&ComponentDeployment>,
        env: &str,
    ) -> Result<RenderOutput> {
        Pipeline::new().render(&RenderInput {
            component,
            component_type,
            traits,
            workload: None,
            deployment,
            environment: environment(env),
            metadata: metadata(),
        })
    }

    // =========================================================================
    // Story: Parameter Rendering
    // =========================================================================

    #[test]
    fn test_parameters_render_into_document() {
        let component = component(json!({"replicas": 2}));
        let component_type = service_type(
            r#"
    - id: deployment
      template:
        apiVersion: apps/v1
        kind: Deployment
        metadata:
          name: "${component.name}"
        spec:
          replicas: "${parameters.replicas}"
"#,
        );

        let out = render(&component, &component_type, &[], None, "dev").unwrap();
        assert_eq!(out.resources.len(), 1);
        let doc = &out.resources[0];
        assert_eq!(doc["spec"]["replicas"], json!(2));
        assert_eq!(doc["metadata"]["name"], "test-app");
        assert_eq!(doc["metadata"]["labels"]["weaver.dev/component"], "test-app");
        assert_eq!(doc["metadata"]["labels"]["weaver.dev/environment"], "dev");
    }

    #[test]
    fn test_environment_override_reaches_document() {
        let component = component(json!({"replicas": 2}));
        let component_type = service_type(
            r#"
    - id: deployment
      template:
        apiVersion: apps/v1
        kind: Deployment
        metadata:
          name: "${component.name}"
        spec:
          replicas: "${parameters.replicas}"
"#,
        );
        let deployment: ComponentDeployment = parse(
            r#"
apiVersion: weaver.dev/v1alpha1
kind: ComponentDeployment
metadata:
  name: test-app-prod
spec:
  overrides:
    replicas: 5
"#,
        );

        let out = render(&component, &component_type, &[], Some(&deployment), "prod").unwrap();
        assert_eq!(out.resources[0]["spec"]["replicas"], json!(5));
    }

    // =========================================================================
    // Story: Conditional Inclusion
    // =========================================================================

    fn conditional_type() -> ComponentType {
        service_type(
            r#"
    - id: deployment
      template:
        apiVersion: apps/v1
        kind: Deployment
        metadata:
          name: "${component.name}"
    - id: service
      includeWhen: "${parameters.expose}"
      template:
        apiVersion: v1
        kind: Service
        metadata:
          name: "${component.name}-svc"
"#,
        )
    }

    #[test]
    fn test_include_when_true_yields_document() {
        let component = component(json!({"expose": true}));
        let out = render(&component, &conditional_type(), &[], None, "dev").unwrap();
        assert_eq!(out.resources.len(), 2);
    }

    #[test]
    fn test_include_when_false_discards_descriptor() {
        let component = component(json!({"expose": false}));
        let out = render(&component, &conditional_type(), &[], None, "dev").unwrap();
        assert_eq!(out.resources.len(), 1);
        assert_eq!(out.resources[0]["kind"], "Deployment");
    }

    #[test]
    fn test_include_when_non_boolean_is_synthesis_error() {
        let component = component(json!({"expose": "yes"}));
        let err = render(&component, &conditional_type(), &[], None, "dev").unwrap_err();
        assert!(err.to_string().contains("boolean"));
        assert!(err.to_string().contains("service"));
    }

    // =========================================================================
    // Story: Iteration
    // =========================================================================

    fn for_each_type() -> ComponentType {
        service_type(
            r#"
    - id: external-secrets
      forEach: "${parameters.secrets}"
      var: secret
      template:
        apiVersion: v1
        kind: Secret
        metadata:
          name: "${secret}"
"#,
        )
    }

    #[test]
    fn test_for_each_yields_one_document_per_element() {
        let component = component(json!({"secrets": ["secret1", "secret2"]}));
        let out = render(&component, &for_each_type(), &[], None, "dev").unwrap();
        assert_eq!(out.resources.len(), 2);
        assert_eq!(out.resources[0]["metadata"]["name"], "secret1");
        assert_eq!(out.resources[1]["metadata"]["name"], "secret2");
    }

    #[test]
    fn test_for_each_empty_collection_yields_nothing() {
        let component = component(json!({"secrets": []}));
        let out = render(&component, &for_each_type(), &[], None, "dev").unwrap();
        assert!(out.resources.is_empty());
    }

    #[test]
    fn test_for_each_non_list_is_synthesis_error() {
        let component = component(json!({"secrets": "just-one"}));
        let err = render(&component, &for_each_type(), &[], None, "dev").unwrap_err();
        assert!(err.to_string().contains("forEach"));
    }

    // =========================================================================
    // Story: Typed Substitution and Omission
    // =========================================================================

    #[test]
    fn test_typed_values_substituted_in_place() {
        let component = component(json!({
            "replicas": 3,
            "expose": true,
            "secrets": ["a", "b"],
        }));
        let component_type = service_type(
            r#"
    - id: deployment
      template:
        apiVersion: apps/v1
        kind: Deployment
        metadata:
          name: "${component.name}"
        spec:
          replicas: "${parameters.replicas}"
          paused: "${parameters.expose}"
          topics: "${parameters.secrets}"
"#,
        );
        let out = render(&component, &component_type, &[], None, "dev").unwrap();
        let spec = &out.resources[0]["spec"];
        assert_eq!(spec["replicas"], json!(3));
        assert_eq!(spec["paused"], json!(true));
        assert_eq!(spec["topics"], json!(["a", "b"]));
    }

    #[test]
    fn test_omit_removes_map_entry() {
        let component = component(json!({"expose": false}));
        let component_type = service_type(
            r#"
    - id: deployment
      template:
        apiVersion: apps/v1
        kind: Deployment
        metadata:
          name: "${component.name}"
        spec:
          optional: "${'on' if parameters.expose else omit()}"
          kept: static
"#,
        );
        let out = render(&component, &component_type, &[], None, "dev").unwrap();
        let spec = out.resources[0]["spec"].as_object().unwrap();
        assert!(!spec.contains_key("optional"));
        assert_eq!(spec["kept"], "static");
    }

    #[test]
    fn test_expression_map_keys_are_evaluated() {
        let component = component(json!({}));
        let component_type = service_type(
            r#"
    - id: file-config
      forEach: "${[{'name': 'app.properties', 'value': 'k=v'}]}"
      var: config
      template:
        apiVersion: v1
        kind: ConfigMap
        metadata:
          name: "${component.name}-config"
        data:
          "${config.name}": "${config.value}"
"#,
        );
        let out = render(&component, &component_type, &[], None, "dev").unwrap();
        assert_eq!(out.resources[0]["data"]["app.properties"], "k=v");
    }

    // =========================================================================
    // Story: Traits
    // =========================================================================

    fn monitoring_trait() -> Trait {
        parse(
            r#"
apiVersion: weaver.dev/v1alpha1
kind: Trait
metadata:
  name: monitoring
spec:
  schema:
    parameters:
      port: "integer | default=9090"
  creates:
    - id: service-monitor
      template:
        apiVersion: monitoring.coreos.com/v1
        kind: ServiceMonitor
        metadata:
          name: "${component.name}-${trait.instanceName}"
        spec:
          port: "${parameters.port}"
  patches:
    - target:
        group: apps
        version: v1
        kind: Deployment
      operations:
        - op: add
          path: /spec/scrapePort
          value: "${parameters.port}"
"#,
        )
    }

    fn bound_traits(trait_def: &Trait, component: &Component) -> Vec<ResolvedTrait<'static>> {
        // Tests leak the fixtures to get 'static lifetimes for convenience
        let trait_def: &'static Trait = Box::leak(Box::new(trait_def.clone()));
        let binding: &'static TraitBinding = Box::leak(Box::new(component.spec.traits[0].clone()));
        vec![ResolvedTrait {
            definition: trait_def,
            binding,
        }]
    }

    fn component_with_monitoring() -> Component {
        parse(
            r#"
apiVersion: weaver.dev/v1alpha1
kind: Component
metadata:
  name: test-app
spec:
  componentType: service
  traits:
    - name: monitoring
      instanceName: mon-1
"#,
        )
    }

    #[test]
    fn test_trait_creates_and_patches() {
        let component = component_with_monitoring();
        let component_type = service_type(
            r#"
    - id: deployment
      template:
        apiVersion: apps/v1
        kind: Deployment
        metadata:
          name: "${component.name}"
"#,
        );
        let trait_def = monitoring_trait();
        let traits = bound_traits(&trait_def, &component);

        let out = render(&component, &component_type, &traits, None, "dev").unwrap();
        assert_eq!(out.resources.len(), 2);

        let deployment = out.resources.iter().find(|d| d["kind"] == "Deployment").unwrap();
        assert_eq!(deployment["spec"]["scrapePort"], json!(9090));

        let monitor = out
            .resources
            .iter()
            .find(|d| d["kind"] == "ServiceMonitor")
            .unwrap();
        assert_eq!(monitor["metadata"]["name"], "test-app-mon-1");
        assert_eq!(monitor["spec"]["port"], json!(9090));
    }

    #[test]
    fn test_patch_with_no_matching_target_is_noop() {
        let component = component_with_monitoring();
        let component_type = service_type(
            r#"
    - id: config
      template:
        apiVersion: v1
        kind: ConfigMap
        metadata:
          name: "${component.name}"
"#,
        );
        let trait_def = monitoring_trait();
        let traits = bound_traits(&trait_def, &component);

        // The patch targets Deployment; only a ConfigMap and the trait's
        // ServiceMonitor exist
        let out = render(&component, &component_type, &traits, None, "dev").unwrap();
        assert_eq!(out.resources.len(), 2);
        let config = out.resources.iter().find(|d| d["kind"] == "ConfigMap").unwrap();
        assert!(config["spec"].is_null());
    }

    #[test]
    fn test_tracking_labels_survive_patch_over_labels() {
        let component = component_with_monitoring();
        let component_type = service_type(
            r#"
    - id: deployment
      template:
        apiVersion: apps/v1
        kind: Deployment
        metadata:
          name: "${component.name}"
"#,
        );
        let trait_def: Trait = parse(
            r#"
apiVersion: weaver.dev/v1alpha1
kind: Trait
metadata:
  name: monitoring
spec:
  patches:
    - target:
        group: apps
        version: v1
        kind: Deployment
      operations:
        - op: add
          path: /metadata/labels
          value:
            monitoring: enabled
"#,
        );
        let traits = bound_traits(&trait_def, &component);

        let out = render(&component, &component_type, &traits, None, "dev").unwrap();
        let labels = &out.resources[0]["metadata"]["labels"];
        assert_eq!(labels["monitoring"], "enabled");
        assert_eq!(labels["weaver.dev/component"], "test-app");
        assert_eq!(labels["weaver.dev/environment"], "dev");
    }

    // =========================================================================
    // Story: Validation and Ordering
    // =========================================================================

    #[test]
    fn test_missing_name_fails_whole_batch() {
        let component = component(json!({}));
        let component_type = service_type(
            r#"
    - id: good
      template:
        apiVersion: v1
        kind: ConfigMap
        metadata:
          name: good
    - id: bad
      template:
        apiVersion: v1
        kind: ConfigMap
        metadata: {}
"#,
        );
        let err = render(&component, &component_type, &[], None, "dev").unwrap_err();
        assert!(err.to_string().contains("metadata.name"));
    }

    #[test]
    fn test_workload_kinds_sort_first() {
        let component = component(json!({}));
        let component_type = service_type(
            r#"
    - id: config
      template:
        apiVersion: v1
        kind: ConfigMap
        metadata:
          name: aaa-config
    - id: deployment
      template:
        apiVersion: apps/v1
        kind: Deployment
        metadata:
          name: zzz-app
    - id: service
      template:
        apiVersion: v1
        kind: Service
        metadata:
          name: bbb-svc
"#,
        );
        let out = render(&component, &component_type, &[], None, "dev").unwrap();
        let kinds: Vec<&str> = out.resources.iter().map(|d| d["kind"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["Deployment", "ConfigMap", "Service"]);
    }

    #[test]
    fn test_render_is_deterministic() {
        let component = component(json!({"replicas": 2, "secrets": ["b", "a"]}));
        let component_type = service_type(
            r#"
    - id: deployment
      template:
        apiVersion: apps/v1
        kind: Deployment
        metadata:
          name: "${component.name}"
        spec:
          replicas: "${parameters.replicas}"
    - id: secrets
      forEach: "${parameters.secrets}"
      var: secret
      template:
        apiVersion: v1
        kind: Secret
        metadata:
          name: "${secret}"
"#,
        );
        let first = render(&component, &component_type, &[], None, "dev").unwrap();
        let second = render(&component, &component_type, &[], None, "dev").unwrap();
        assert_eq!(first, second);
        // Collection order preserved inside forEach, sort is by (kind, name)
        let names: Vec<&str> = first
            .resources
            .iter()
            .map(|d| d["metadata"]["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["test-app", "a", "b"]);
    }

    #[test]
    fn test_custom_labels_and_annotations_pass_through() {
        let component = component(json!({}));
        let component_type = service_type(
            r#"
    - id: deployment
      template:
        apiVersion: apps/v1
        kind: Deployment
        metadata:
          name: "${component.name}"
"#,
        );
        let pipeline = Pipeline::new()
            .with_resource_labels(BTreeMap::from([("team".to_string(), "platform".to_string())]))
            .with_resource_annotations(BTreeMap::from([(
                "weaver.dev/revision".to_string(),
                "42".to_string(),
            )]));
        let out = pipeline
            .render(&RenderInput {
                component: &component,
                component_type: &component_type,
                traits: &[],
                workload: None,
                deployment: None,
                environment: environment("dev"),
                metadata: metadata(),
            })
            .unwrap();
        let doc = &out.resources[0];
        assert_eq!(doc["metadata"]["labels"]["team"], "platform");
        assert_eq!(doc["metadata"]["annotations"]["weaver.dev/revision"], "42");
    }

    // =========================================================================
    // Story: Patch Operations
    // =========================================================================

    #[test]
    fn test_patch_operations_apply_in_order() {
        let mut doc = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "app"},
            "spec": {"replicas": 1, "containers": [{"name": "app"}]},
        });

        apply_operation(
            &mut doc,
            &PatchOperation {
                op: PatchOp::Replace,
                path: "/spec/replicas".to_string(),
                value: None,
            },
            Some(json!(3)),
        )
        .unwrap();
        apply_operation(
            &mut doc,
            &PatchOperation {
                op: PatchOp::Add,
                path: "/spec/containers/-".to_string(),
                value: None,
            },
            Some(json!({"name": "sidecar"})),
        )
        .unwrap();
        apply_operation(
            &mut doc,
            &PatchOperation {
                op: PatchOp::Remove,
                path: "/spec/replicas".to_string(),
                value: None,
            },
            None,
        )
        .unwrap();

        assert!(doc["spec"]["replicas"].is_null());
        assert_eq!(doc["spec"]["containers"][1]["name"], "sidecar");
    }

    #[test]
    fn test_patch_add_creates_missing_parent_objects() {
        let mut doc = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "app"},
        });

        apply_operation(
            &mut doc,
            &PatchOperation {
                op: PatchOp::Add,
                path: "/spec/template/metadata/annotations/scrape".to_string(),
                value: None,
            },
            Some(json!("true")),
        )
        .unwrap();

        assert_eq!(doc["spec"]["template"]["metadata"]["annotations"]["scrape"], "true");
    }

    #[test]
    fn test_patch_replace_missing_field_errors() {
        let mut doc = json!({"spec": {}});
        let err = apply_operation(
            &mut doc,
            &PatchOperation {
                op: PatchOp::Replace,
                path: "/spec/replicas".to_string(),
                value: None,
            },
            Some(json!(3)),
        )
        .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
