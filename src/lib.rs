//! Weaver - declarative component synthesis and release reconciliation
//!
//! Weaver turns layered application descriptions (a component's type, its
//! parameter values, attached traits, its runtime workload, and
//! per-environment overrides) into concrete Kubernetes resource manifests,
//! and drives those manifests to convergence on a remote data-plane cluster.
//!
//! # Architecture
//!
//! The crate is one pipeline in two stages:
//! - A deterministic synthesis engine evaluates `${...}` expressions over a
//!   merged context against a component type's resource templates, producing
//!   an ordered list of resource documents.
//! - A release reconciler applies a fixed, versioned list of such documents
//!   to a remote cluster with ownership tracking, garbage-collects resources
//!   that are no longer desired, and guarantees complete cleanup on deletion
//!   through a finalizer state machine.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (Release, Component, Trait, etc.)
//! - [`expr`] - Expression evaluation as a pluggable capability
//! - [`synth`] - Context building and resource synthesis
//! - [`controller`] - Release reconciliation and finalization
//! - [`resolver`] - Multi-cluster client resolution with a shared cache
//! - [`labels`] - Ownership label keys shared by synthesis and reconciliation
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod controller;
pub mod crd;
pub mod error;
pub mod expr;
pub mod labels;
pub mod resolver;
pub mod synth;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager identity used for server-side apply and status patches.
///
/// This string is also the value of the managed-by ownership label, so it
/// must stay stable across versions: changing it would orphan every resource
/// applied by earlier builds.
pub const CONTROLLER_NAME: &str = "release-controller";
