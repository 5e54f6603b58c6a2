//! Environment and DataPlane Custom Resource Definitions.
//!
//! An Environment names the data plane a Release targets; the DataPlane
//! carries the credentials the resolver uses to build a cluster client.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for an Environment
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "weaver.dev",
    version = "v1alpha1",
    kind = "Environment",
    plural = "environments",
    shortname = "env",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSpec {
    /// Name of the DataPlane this environment deploys to
    pub data_plane_ref: String,

    /// Whether this environment serves production traffic
    #[serde(default)]
    pub is_production: bool,

    /// Virtual host exposed for workloads in this environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_host: Option<String>,
}

/// Specification for a DataPlane
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "weaver.dev",
    version = "v1alpha1",
    kind = "DataPlane",
    plural = "dataplanes",
    shortname = "dp",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DataPlaneSpec {
    /// Target cluster connection details
    pub kubernetes_cluster: KubernetesCluster,
}

/// Connection details for a remote Kubernetes cluster
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesCluster {
    /// Cluster display name
    pub name: String,

    /// Client credentials for the cluster API server
    pub credentials: ClusterCredentials,
}

/// mTLS client credentials for a cluster API server.
///
/// Certificate fields are base64-encoded PEM, as stored in kubeconfig
/// `*-data` fields.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCredentials {
    /// API server URL (e.g., `https://k8s-api.example.com:6443`)
    pub api_server_url: String,

    /// Cluster CA certificate
    pub ca_cert: String,

    /// Client certificate
    pub client_cert: String,

    /// Client private key
    pub client_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_yaml_round_trip() {
        let yaml = r#"
dataPlaneRef: dev-dataplane
isProduction: false
virtualHost: dev.api.example.com
"#;
        let spec: EnvironmentSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.data_plane_ref, "dev-dataplane");
        assert!(!spec.is_production);
        assert_eq!(spec.virtual_host.as_deref(), Some("dev.api.example.com"));
    }

    #[test]
    fn test_dataplane_yaml_round_trip() {
        let yaml = r#"
kubernetesCluster:
  name: development-cluster
  credentials:
    apiServerUrl: https://k8s-api.example.com:6443
    caCert: LS0tLS1CRUdJTi
    clientCert: LS0tLS1CRUdJTi
    clientKey: LS0tLS1CRUdJTi
"#;
        let spec: DataPlaneSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.kubernetes_cluster.name, "development-cluster");
        assert!(spec
            .kubernetes_cluster
            .credentials
            .api_server_url
            .starts_with("https://"));
    }
}
