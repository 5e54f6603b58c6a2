//! Ownership and tracking label keys.
//!
//! Every live cluster object managed by Weaver carries the ownership labels
//! below. They are the join key between desired state (from a Release spec)
//! and live state (listed from the data plane), and the sole signal used to
//! decide staleness. The apply step must preserve them verbatim and no
//! downstream mutation may strip them.

/// Label identifying the controller that manages a resource
pub const MANAGED_BY: &str = "weaver.dev/managed-by";

/// Label carrying the caller-assigned resource ID, unique within a Release
pub const RESOURCE_ID: &str = "weaver.dev/resource-id";

/// Label carrying the owning Release's UID
pub const RELEASE_UID: &str = "weaver.dev/release-uid";

/// Label carrying the owning Release's name
pub const RELEASE_NAME: &str = "weaver.dev/release-name";

/// Label carrying the owning Release's namespace
pub const RELEASE_NAMESPACE: &str = "weaver.dev/release-namespace";

/// Audit label on namespaces created by the reconciler
pub const CREATED_BY: &str = "weaver.dev/created-by";

/// Tracking label for the component a rendered resource belongs to
pub const COMPONENT_NAME: &str = "weaver.dev/component";

/// Tracking label for the environment a rendered resource targets
pub const ENVIRONMENT_NAME: &str = "weaver.dev/environment";

/// Tracking label for the owning project
pub const PROJECT_NAME: &str = "weaver.dev/project";
