//! Multi-cluster client resolution.
//!
//! A Release names an Environment; the Environment names a DataPlane; the
//! DataPlane carries credentials for the target cluster. The resolver walks
//! that chain on the control plane and hands the reconciler a ready
//! [`DataPlaneClient`](crate::controller::release::DataPlaneClient).
//!
//! Resolved clients are cached per (namespace, dataplane) since building a
//! client parses certificates and spawns connection state. The cache is the
//! only state shared across concurrent reconcile invocations and must stay
//! safe for concurrent lookups.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::controller::release::{DataPlaneClient, KubeDataPlane};
use crate::crd::{ClusterCredentials, DataPlane, Environment};
use crate::{Error, Result};

/// Resolves the target-cluster client for an environment.
///
/// Injected into the reconciler so tests can substitute fakes per
/// environment.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterResolver: Send + Sync {
    /// Resolve a client for the named environment's data plane
    async fn resolve(&self, namespace: &str, environment_name: &str)
        -> Result<Arc<dyn DataPlaneClient>>;
}

/// Control-plane-backed resolver with a shared client cache
pub struct KubeClusterResolver {
    control_plane: Client,
    cache: DashMap<(String, String), Arc<dyn DataPlaneClient>>,
}

impl KubeClusterResolver {
    /// Create a resolver reading Environments and DataPlanes through the
    /// given control-plane client
    pub fn new(control_plane: Client) -> Self {
        Self {
            control_plane,
            cache: DashMap::new(),
        }
    }
}

#[async_trait]
impl ClusterResolver for KubeClusterResolver {
    async fn resolve(
        &self,
        namespace: &str,
        environment_name: &str,
    ) -> Result<Arc<dyn DataPlaneClient>> {
        let environments: Api<Environment> =
            Api::namespaced(self.control_plane.clone(), namespace);
        let environment = environments
            .get(environment_name)
            .await
            .map_err(|e| Error::resolve(format!("environment {environment_name:?}: {e}")))?;

        let dataplane_name = environment.spec.data_plane_ref.clone();
        let key = (namespace.to_string(), dataplane_name.clone());
        if let Some(cached) = self.cache.get(&key) {
            return Ok(Arc::clone(&cached));
        }

        let dataplanes: Api<DataPlane> = Api::namespaced(self.control_plane.clone(), namespace);
        let dataplane = dataplanes
            .get(&dataplane_name)
            .await
            .map_err(|e| Error::resolve(format!("dataplane {dataplane_name:?}: {e}")))?;

        let cluster = &dataplane.spec.kubernetes_cluster;
        let kubeconfig = build_kubeconfig(&cluster.name, &cluster.credentials)?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::resolve(format!("dataplane {dataplane_name:?}: {e}")))?;
        let client = Client::try_from(config)
            .map_err(|e| Error::resolve(format!("dataplane {dataplane_name:?}: {e}")))?;

        debug!(
            namespace = %namespace,
            dataplane = %dataplane_name,
            cluster = %cluster.name,
            "Built data plane client"
        );

        let client: Arc<dyn DataPlaneClient> = Arc::new(KubeDataPlane::new(client));
        // Insert-or-reuse under concurrent resolution of the same key
        let entry = self.cache.entry(key).or_insert(client);
        Ok(Arc::clone(&entry))
    }
}

/// Build an in-memory kubeconfig from DataPlane credentials.
///
/// Certificate fields are base64-encoded PEM, matching the kubeconfig
/// `*-data` conventions, so they slot straight into the config document.
fn build_kubeconfig(cluster_name: &str, credentials: &ClusterCredentials) -> Result<Kubeconfig> {
    serde_json::from_value(serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": cluster_name,
            "cluster": {
                "server": credentials.api_server_url,
                "certificate-authority-data": credentials.ca_cert,
            },
        }],
        "users": [{
            "name": cluster_name,
            "user": {
                "client-certificate-data": credentials.client_cert,
                "client-key-data": credentials.client_key,
            },
        }],
        "contexts": [{
            "name": cluster_name,
            "context": {"cluster": cluster_name, "user": cluster_name},
        }],
        "current-context": cluster_name,
    }))
    .map_err(|e| Error::resolve(format!("cluster {cluster_name:?}: bad credentials: {e}")))
}
