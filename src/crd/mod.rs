//! Custom Resource Definitions for Weaver.
//!
//! Component, ComponentType, Trait, Workload, and ComponentDeployment are the
//! declarative inputs to the synthesis engine; Environment and DataPlane
//! locate the target cluster; Release carries the synthesized resource list
//! that the reconciler drives to convergence.

mod component;
mod environment;
mod release;
mod types;

pub use component::{
    Component, ComponentDeployment, ComponentDeploymentSpec, ComponentOwner, ComponentSpec,
    ComponentType, ComponentTypeSpec, ConfigurationOverrides, ContainerSpec, EnvEntry, FileEntry,
    GvkTarget, ParameterSchema, PatchOp, PatchOperation, ResourceDescriptor, Trait, TraitBinding,
    TraitPatch, TraitSpec, Workload, WorkloadSpec,
};
pub use environment::{
    ClusterCredentials, DataPlane, DataPlaneSpec, Environment, EnvironmentSpec, KubernetesCluster,
};
pub use release::{
    HealthStatus, Release, ReleaseOwner, ReleaseResource, ReleaseSpec, ReleaseStatus,
    ResourceStatus,
};
pub use types::{set_condition, Condition, ConditionStatus};
