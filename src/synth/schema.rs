//! Compact parameter schemas with defaults.
//!
//! ComponentType and Trait schemas describe parameters as field-spec strings
//! like `"integer | default=1"`, with nested maps for object parameters.
//! Parsing produces a [`Schema`] that can fill missing keys in a parameter
//! map with their declared defaults.

use std::collections::BTreeMap;

use crate::crd::ParameterSchema;
use crate::{Error, Result};

/// A parsed structural schema for one ComponentType or Trait
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schema {
    fields: BTreeMap<String, FieldSchema>,
}

/// Schema for one field: a typed scalar with an optional default, or a
/// nested object
#[derive(Clone, Debug, PartialEq)]
pub enum FieldSchema {
    /// Leaf field parsed from a field-spec string
    Scalar {
        /// Declared scalar type
        kind: ScalarKind,
        /// Default applied when the parameter map has no value for the field
        default: Option<serde_json::Value>,
    },
    /// Nested object field
    Object(BTreeMap<String, FieldSchema>),
}

/// Scalar types expressible in a field-spec string
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarKind {
    /// UTF-8 string
    String,
    /// Whole number
    Integer,
    /// Floating-point number
    Number,
    /// true/false
    Boolean,
}

impl Schema {
    /// Build a schema from a ComponentType or Trait parameter schema.
    ///
    /// `env_overrides` fields are merged over `parameters` fields so that
    /// override-only fields still get defaulted.
    pub fn build(spec: Option<&ParameterSchema>) -> Result<Self> {
        let mut fields = BTreeMap::new();
        if let Some(spec) = spec {
            if let Some(params) = &spec.parameters {
                merge_section(&mut fields, params)?;
            }
            if let Some(overrides) = &spec.env_overrides {
                merge_section(&mut fields, overrides)?;
            }
        }
        Ok(Self { fields })
    }

    /// Fill missing keys in `params` with schema defaults, recursing into
    /// nested objects. Values already present are never replaced.
    pub fn apply_defaults(&self, params: serde_json::Value) -> serde_json::Value {
        let mut map = match params {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => return other,
        };
        apply_field_defaults(&mut map, &self.fields);
        serde_json::Value::Object(map)
    }
}

fn merge_section(fields: &mut BTreeMap<String, FieldSchema>, section: &serde_json::Value) -> Result<()> {
    let map = match section {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => return Ok(()),
        other => {
            return Err(Error::input(format!(
                "parameter schema must be a map, got {other}"
            )))
        }
    };
    for (name, spec) in map {
        fields.insert(name.clone(), parse_field(name, spec)?);
    }
    Ok(())
}

fn parse_field(name: &str, spec: &serde_json::Value) -> Result<FieldSchema> {
    match spec {
        serde_json::Value::String(s) => parse_field_spec(name, s),
        serde_json::Value::Object(map) => {
            let mut nested = BTreeMap::new();
            for (key, value) in map {
                nested.insert(key.clone(), parse_field(key, value)?);
            }
            Ok(FieldSchema::Object(nested))
        }
        other => Err(Error::input(format!(
            "schema field {name:?} must be a field-spec string or nested map, got {other}"
        ))),
    }
}

/// Parse a field-spec string of the form `"<type> | default=<value>"`
fn parse_field_spec(name: &str, spec: &str) -> Result<FieldSchema> {
    let mut parts = spec.split('|').map(str::trim);
    let kind = match parts.next().unwrap_or("") {
        "string" => ScalarKind::String,
        "integer" => ScalarKind::Integer,
        "number" => ScalarKind::Number,
        "boolean" => ScalarKind::Boolean,
        other => {
            return Err(Error::input(format!(
                "schema field {name:?} has unknown type {other:?}"
            )))
        }
    };

    let mut default = None;
    for modifier in parts {
        if let Some(raw) = modifier.strip_prefix("default=") {
            default = Some(parse_default(name, kind, raw)?);
        } else if modifier == "required" || modifier.is_empty() {
            // "required" is advisory; absence of a default already means the
            // caller must supply a value
        } else {
            return Err(Error::input(format!(
                "schema field {name:?} has unknown modifier {modifier:?}"
            )));
        }
    }

    Ok(FieldSchema::Scalar { kind, default })
}

fn parse_default(name: &str, kind: ScalarKind, raw: &str) -> Result<serde_json::Value> {
    let value = match kind {
        ScalarKind::String => serde_json::Value::String(raw.to_string()),
        ScalarKind::Integer => raw
            .parse::<i64>()
            .map(serde_json::Value::from)
            .map_err(|_| Error::input(format!("schema field {name:?}: bad integer default {raw:?}")))?,
        ScalarKind::Number => raw
            .parse::<f64>()
            .map(serde_json::Value::from)
            .map_err(|_| Error::input(format!("schema field {name:?}: bad number default {raw:?}")))?,
        ScalarKind::Boolean => raw
            .parse::<bool>()
            .map(serde_json::Value::Bool)
            .map_err(|_| Error::input(format!("schema field {name:?}: bad boolean default {raw:?}")))?,
    };
    Ok(value)
}

fn apply_field_defaults(
    map: &mut serde_json::Map<String, serde_json::Value>,
    fields: &BTreeMap<String, FieldSchema>,
) {
    for (name, field) in fields {
        match field {
            FieldSchema::Scalar { default, .. } => {
                if !map.contains_key(name) {
                    if let Some(default) = default {
                        map.insert(name.clone(), default.clone());
                    }
                }
            }
            FieldSchema::Object(nested) => {
                let entry = map
                    .entry(name.clone())
                    .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
                if let serde_json::Value::Object(inner) = entry {
                    apply_field_defaults(inner, nested);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema_from(params: serde_json::Value) -> Schema {
        Schema::build(Some(&ParameterSchema {
            parameters: Some(params),
            env_overrides: None,
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_field_spec_with_default() {
        let schema = schema_from(json!({"replicas": "integer | default=1"}));
        let out = schema.apply_defaults(json!({}));
        assert_eq!(out, json!({"replicas": 1}));
    }

    #[test]
    fn test_defaults_do_not_replace_present_values() {
        let schema = schema_from(json!({
            "replicas": "integer | default=1",
            "cpu": "string | default=100m",
        }));
        let out = schema.apply_defaults(json!({"replicas": 3}));
        assert_eq!(out, json!({"replicas": 3, "cpu": "100m"}));
    }

    #[test]
    fn test_field_without_default_left_absent() {
        let schema = schema_from(json!({"image": "string"}));
        let out = schema.apply_defaults(json!({}));
        assert_eq!(out, json!({}));
    }

    #[test]
    fn test_nested_object_defaults() {
        let schema = schema_from(json!({
            "resources": {
                "cpu": "string | default=100m",
                "memory": "string | default=128Mi",
            }
        }));
        let out = schema.apply_defaults(json!({"resources": {"cpu": "500m"}}));
        assert_eq!(out, json!({"resources": {"cpu": "500m", "memory": "128Mi"}}));
    }

    #[test]
    fn test_boolean_and_number_defaults() {
        let schema = schema_from(json!({
            "expose": "boolean | default=false",
            "weight": "number | default=0.5",
        }));
        let out = schema.apply_defaults(json!({}));
        assert_eq!(out, json!({"expose": false, "weight": 0.5}));
    }

    #[test]
    fn test_env_overrides_section_contributes_fields() {
        let schema = Schema::build(Some(&ParameterSchema {
            parameters: Some(json!({"replicas": "integer | default=1"})),
            env_overrides: Some(json!({"replicas": "integer | default=2", "tier": "string | default=standard"})),
        }))
        .unwrap();
        let out = schema.apply_defaults(json!({}));
        assert_eq!(out, json!({"replicas": 2, "tier": "standard"}));
    }

    #[test]
    fn test_unknown_type_is_input_error() {
        let err = Schema::build(Some(&ParameterSchema {
            parameters: Some(json!({"replicas": "int | default=1"})),
            env_overrides: None,
        }))
        .unwrap_err();
        assert!(err.to_string().contains("unknown type"));
    }

    #[test]
    fn test_bad_default_is_input_error() {
        let err = Schema::build(Some(&ParameterSchema {
            parameters: Some(json!({"replicas": "integer | default=lots"})),
            env_overrides: None,
        }))
        .unwrap_err();
        assert!(err.to_string().contains("bad integer default"));
    }

    #[test]
    fn test_empty_schema_passes_params_through() {
        let schema = Schema::build(None).unwrap();
        let out = schema.apply_defaults(json!({"anything": "goes"}));
        assert_eq!(out, json!({"anything": "goes"}));
    }
}
