//! Resource synthesis: context building, parameter schemas, and the
//! template rendering pipeline.
//!
//! The flow is one directional pass: declared inputs are merged into an
//! evaluation context ([`context`]), parameter defaults come from compact
//! field-spec schemas ([`schema`]), and the [`pipeline`] renders resource
//! descriptors through the expression evaluator into a validated, sorted
//! resource list.

pub mod context;
pub mod pipeline;
pub mod schema;

pub use context::{
    build_component_context, build_trait_context, ComponentContextInput, EnvironmentContext,
    GeneratedMetadata, SchemaCache, TraitContextInput,
};
pub use pipeline::{Pipeline, RenderInput, RenderOutput, ResolvedTrait};
