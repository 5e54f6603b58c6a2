//! Release reconciler.
//!
//! A level-triggered control loop that drives a Release's desired resource
//! list to convergence on its environment's data plane. Each pass is
//! stateless and ordered: apply everything desired, discover live resources
//! by ownership labels, delete whatever is stale, persist the status
//! inventory, then schedule the next pass.
//!
//! Stale detection joins desired and live state purely through ownership
//! labels. The GVK probe set unions the current desired kinds with the
//! kinds recorded in status history and a fixed catalog of commonly managed
//! kinds, because a kind can vanish from the spec while resources of that
//! kind are still live.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DynamicObject, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use rand::Rng;
use tracing::{debug, info, instrument, warn};

use crate::controller::{conditions, finalize};
use crate::crd::{set_condition, HealthStatus, Release, ReleaseStatus, ResourceStatus};
use crate::labels;
use crate::resolver::ClusterResolver;
use crate::{Error, Result, CONTROLLER_NAME};

/// Finalizer that blocks Release deletion until data plane cleanup is done
pub const FINALIZER: &str = "weaver.dev/release-finalizer";

const DEFAULT_INTERVAL_SECONDS: u64 = 300;
const DEFAULT_PROGRESSING_INTERVAL_SECONDS: u64 = 10;

/// (group, version, kind) identity of a cluster resource
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Gvk {
    /// API group; empty string for the core group
    pub group: String,
    /// API version within the group
    pub version: String,
    /// Resource kind
    pub kind: String,
}

impl Gvk {
    /// Construct from the usual string triple
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// Parse an `apiVersion` string plus kind
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version, kind),
            None => Self::new("", api_version, kind),
        }
    }

    /// Rebuild the `apiVersion` string
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// Target-cluster operations the reconciler needs.
///
/// This trait allows mocking the data plane in tests while using the real
/// Kubernetes client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DataPlaneClient: Send + Sync {
    /// Whether the namespace exists
    async fn namespace_exists(&self, name: &str) -> Result<bool>;

    /// Create a namespace with the given labels
    async fn create_namespace(&self, name: &str, labels: BTreeMap<String, String>) -> Result<()>;

    /// Server-side apply one resource document with forced ownership
    async fn apply(&self, document: &serde_json::Value) -> Result<()>;

    /// List live resources of one GVK matching a label selector, across all
    /// namespaces
    async fn list(&self, gvk: &Gvk, label_selector: &str) -> Result<Vec<serde_json::Value>>;

    /// Delete one resource; deleting an already-gone resource is success
    async fn delete(&self, gvk: &Gvk, namespace: Option<String>, name: &str) -> Result<()>;
}

/// Control-plane operations the reconciler needs on the Release itself
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    /// Persist a new status
    async fn patch_status(&self, release: &Release, status: &ReleaseStatus) -> Result<()>;

    /// Ensure the finalizer is present; returns true when it was added
    async fn ensure_finalizer(&self, release: &Release) -> Result<bool>;

    /// Remove the finalizer, unblocking deletion
    async fn remove_finalizer(&self, release: &Release) -> Result<()>;
}

/// Shared reconciler context, injected into every invocation
pub struct Context {
    /// Client for Release status and finalizer writes
    pub control_plane: Arc<dyn ControlPlaneClient>,
    /// Resolver for the per-environment data plane client
    pub resolver: Arc<dyn ClusterResolver>,
}

/// One desired resource, parsed and stamped with ownership labels
#[derive(Debug)]
pub(crate) struct DesiredResource {
    pub id: String,
    pub gvk: Gvk,
    pub name: String,
    pub namespace: Option<String>,
    pub document: serde_json::Value,
}

/// Reconcile one Release
#[instrument(skip(release, ctx), fields(namespace = %release.namespace().unwrap_or_default(), name = %release.name_any()))]
pub async fn reconcile(release: Arc<Release>, ctx: Arc<Context>) -> Result<Action> {
    if release.metadata.deletion_timestamp.is_some() {
        // Finalization never reads spec.resources, so even a Release whose
        // spec went invalid can still be cleaned up and released.
        return finalize::finalize(&release, &ctx).await;
    }

    // The finalizer must be in place before anything lands on the data
    // plane, otherwise a deletion racing the first apply could orphan
    // resources. Adding it mutates the object, so let the next watch event
    // observe fresh state.
    if ctx.control_plane.ensure_finalizer(&release).await? {
        debug!("Added finalizer");
        return Ok(Action::await_change());
    }

    release.spec.validate()?;

    let namespace = release
        .namespace()
        .ok_or_else(|| Error::input("release has no namespace"))?;
    let uid = release
        .uid()
        .ok_or_else(|| Error::input("release has no uid"))?;

    let dataplane = ctx
        .resolver
        .resolve(&namespace, &release.spec.environment_name)
        .await?;

    let desired = desired_resources(&release, &uid)?;

    ensure_namespaces(dataplane.as_ref(), &release, &desired).await?;
    for resource in &desired {
        dataplane.apply(&resource.document).await?;
    }
    info!(count = desired.len(), "Applied desired resources");

    let desired_ids: BTreeSet<&str> = desired.iter().map(|r| r.id.as_str()).collect();
    let selector = ownership_selector(&uid);
    let mut live_by_id: HashMap<String, serde_json::Value> = HashMap::new();
    let mut stale = Vec::new();

    for gvk in probe_gvks(&desired, &release) {
        for live in dataplane.list(&gvk, &selector).await? {
            let Some(id) = resource_id_label(&live) else {
                continue;
            };
            if desired_ids.contains(id.as_str()) {
                live_by_id.insert(id, live);
            } else {
                stale.push((gvk.clone(), live));
            }
        }
    }

    for (gvk, live) in &stale {
        let name = live["metadata"]["name"].as_str().unwrap_or_default();
        let live_namespace = live["metadata"]["namespace"].as_str().map(str::to_string);
        info!(kind = %gvk.kind, name = %name, "Deleting stale resource");
        dataplane.delete(gvk, live_namespace, name).await?;
    }

    let inventory = build_inventory(&desired, &live_by_id);
    let transitioning = inventory.iter().any(|r| r.health.is_transitioning());

    let mut status = release.status.clone().unwrap_or_default();
    let resources_changed = status.resources != inventory;
    status.resources = inventory;
    let condition = if transitioning {
        conditions::progressing(release.metadata.generation)
    } else {
        conditions::ready(desired.len(), release.metadata.generation)
    };
    let conditions_changed = set_condition(&mut status.conditions, condition);

    if resources_changed || conditions_changed {
        ctx.control_plane.patch_status(&release, &status).await?;
        // Status writes change observable state; let the triggered
        // reconcile pick up from there instead of looping in this pass
        return Ok(Action::await_change());
    }

    Ok(next_action(&release, transitioning))
}

/// Requeue policy after a failed reconcile
pub fn error_policy(release: Arc<Release>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(
        name = %release.name_any(),
        error = %error,
        "Reconcile failed, requeueing"
    );
    Action::requeue(Duration::from_secs(30))
}

/// Label selector joining live cluster state back to this Release
pub(crate) fn ownership_selector(uid: &str) -> String {
    format!(
        "{}={},{}={}",
        labels::MANAGED_BY,
        CONTROLLER_NAME,
        labels::RELEASE_UID,
        uid
    )
}

/// Parse, validate, and label-stamp the Release's desired documents
pub(crate) fn desired_resources(release: &Release, uid: &str) -> Result<Vec<DesiredResource>> {
    let release_name = release.name_any();
    let release_namespace = release.namespace().unwrap_or_default();

    let mut desired = Vec::with_capacity(release.spec.resources.len());
    for entry in &release.spec.resources {
        let mut document = entry.object.clone();
        let api_version = document["apiVersion"].as_str().unwrap_or_default().to_string();
        let kind = document["kind"].as_str().unwrap_or_default().to_string();
        let name = document["metadata"]["name"].as_str().unwrap_or_default().to_string();
        if api_version.is_empty() || kind.is_empty() || name.is_empty() {
            return Err(Error::input(format!(
                "resource {:?} is missing apiVersion, kind, or metadata.name",
                entry.id
            )));
        }
        let namespace = document["metadata"]["namespace"].as_str().map(str::to_string);

        // Ownership labels are the join key for stale detection; they must
        // survive the apply verbatim
        if let Some(metadata) = document["metadata"].as_object_mut() {
            let labels_entry = metadata
                .entry("labels")
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            if let Some(map) = labels_entry.as_object_mut() {
                map.insert(labels::MANAGED_BY.to_string(), CONTROLLER_NAME.into());
                map.insert(labels::RESOURCE_ID.to_string(), entry.id.clone().into());
                map.insert(labels::RELEASE_UID.to_string(), uid.into());
                map.insert(labels::RELEASE_NAME.to_string(), release_name.clone().into());
                map.insert(
                    labels::RELEASE_NAMESPACE.to_string(),
                    release_namespace.clone().into(),
                );
            }
        }

        desired.push(DesiredResource {
            id: entry.id.clone(),
            gvk: Gvk::from_api_version(&api_version, &kind),
            name,
            namespace,
            document,
        });
    }
    Ok(desired)
}

/// Get-or-create every namespace the desired documents reference
async fn ensure_namespaces(
    dataplane: &dyn DataPlaneClient,
    release: &Release,
    desired: &[DesiredResource],
) -> Result<()> {
    let namespaces: BTreeSet<&str> = desired
        .iter()
        .filter_map(|r| r.namespace.as_deref())
        .collect();

    for namespace in namespaces {
        if dataplane.namespace_exists(namespace).await? {
            continue;
        }
        match dataplane
            .create_namespace(namespace, namespace_labels(release))
            .await
        {
            Ok(()) => info!(namespace = %namespace, "Created namespace"),
            // Lost a race against a concurrent creator
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Audit labels stamped on namespaces this controller creates
fn namespace_labels(release: &Release) -> BTreeMap<String, String> {
    let mut labels_map = BTreeMap::from([
        (labels::CREATED_BY.to_string(), CONTROLLER_NAME.to_string()),
        (labels::RELEASE_NAME.to_string(), release.name_any()),
        (
            labels::RELEASE_NAMESPACE.to_string(),
            release.namespace().unwrap_or_default(),
        ),
        (
            labels::ENVIRONMENT_NAME.to_string(),
            release.spec.environment_name.clone(),
        ),
    ]);
    if let Some(owner) = &release.spec.owner {
        labels_map.insert(labels::PROJECT_NAME.to_string(), owner.project_name.clone());
        labels_map.insert(labels::COMPONENT_NAME.to_string(), owner.component_name.clone());
    }
    labels_map
}

/// The GVK set probed for live resources: current desired kinds, kinds in
/// status history, and a fixed catalog of commonly managed kinds.
///
/// The catalog is a known coverage gap: a custom kind outside it, never
/// recorded in status because the very first status write failed, could be
/// orphaned.
pub(crate) fn probe_gvks(desired: &[DesiredResource], release: &Release) -> Vec<Gvk> {
    let mut gvks: BTreeSet<Gvk> = desired.iter().map(|r| r.gvk.clone()).collect();
    if let Some(status) = &release.status {
        for record in &status.resources {
            gvks.insert(Gvk::new(&record.group, &record.version, &record.kind));
        }
    }
    gvks.extend(well_known_gvks());
    gvks.into_iter().collect()
}

fn well_known_gvks() -> Vec<Gvk> {
    vec![
        Gvk::new("apps", "v1", "Deployment"),
        Gvk::new("apps", "v1", "StatefulSet"),
        Gvk::new("batch", "v1", "Job"),
        Gvk::new("batch", "v1", "CronJob"),
        Gvk::new("", "v1", "Service"),
        Gvk::new("", "v1", "ConfigMap"),
        Gvk::new("", "v1", "Secret"),
        Gvk::new("", "v1", "ServiceAccount"),
        Gvk::new("", "v1", "PersistentVolumeClaim"),
        Gvk::new("networking.k8s.io", "v1", "Ingress"),
        Gvk::new("networking.k8s.io", "v1", "NetworkPolicy"),
        Gvk::new("autoscaling", "v2", "HorizontalPodAutoscaler"),
    ]
}

fn resource_id_label(document: &serde_json::Value) -> Option<String> {
    document["metadata"]["labels"][labels::RESOURCE_ID]
        .as_str()
        .map(str::to_string)
}

/// Build the status inventory for the current desired set, summarizing the
/// health observed in this pass's live listing
fn build_inventory(
    desired: &[DesiredResource],
    live_by_id: &HashMap<String, serde_json::Value>,
) -> Vec<ResourceStatus> {
    desired
        .iter()
        .map(|resource| {
            let health = live_by_id
                .get(&resource.id)
                .map(resource_health)
                .unwrap_or_default();
            ResourceStatus {
                group: resource.gvk.group.clone(),
                version: resource.gvk.version.clone(),
                kind: resource.gvk.kind.clone(),
                id: resource.id.clone(),
                name: resource.name.clone(),
                namespace: resource.namespace.clone().unwrap_or_default(),
                health,
            }
        })
        .collect()
}

/// Summarize one live resource's health from its status.
///
/// Workload kinds are judged by their rollout state; passive kinds are
/// healthy by existing.
fn resource_health(document: &serde_json::Value) -> HealthStatus {
    let kind = document["kind"].as_str().unwrap_or_default();
    match kind {
        "Deployment" => condition_health(document, "Available"),
        "StatefulSet" | "ReplicaSet" | "DaemonSet" => {
            let desired = document["spec"]["replicas"].as_i64().unwrap_or(1);
            let ready = document["status"]["readyReplicas"].as_i64().unwrap_or(0);
            if ready >= desired {
                HealthStatus::Healthy
            } else {
                HealthStatus::Progressing
            }
        }
        "Job" => condition_health(document, "Complete"),
        "Pod" => match document["status"]["phase"].as_str() {
            Some("Running") | Some("Succeeded") => HealthStatus::Healthy,
            Some(_) => HealthStatus::Progressing,
            None => HealthStatus::Unknown,
        },
        _ => HealthStatus::Healthy,
    }
}

fn condition_health(document: &serde_json::Value, condition_type: &str) -> HealthStatus {
    let Some(conds) = document["status"]["conditions"].as_array() else {
        return HealthStatus::Unknown;
    };
    for cond in conds {
        if cond["type"] == condition_type {
            return if cond["status"] == "True" {
                HealthStatus::Healthy
            } else {
                HealthStatus::Progressing
            };
        }
    }
    HealthStatus::Progressing
}

/// Choose the next requeue: short while transitioning, long at steady
/// state, zero disables periodic requeue. Jitter up to 20% avoids
/// synchronized herding across many Releases.
fn next_action(release: &Release, transitioning: bool) -> Action {
    let base = if transitioning {
        release
            .spec
            .progressing_interval_seconds
            .unwrap_or(DEFAULT_PROGRESSING_INTERVAL_SECONDS)
    } else {
        release.spec.interval_seconds.unwrap_or(DEFAULT_INTERVAL_SECONDS)
    };
    if base == 0 {
        return Action::await_change();
    }
    let base = Duration::from_secs(base);
    let jitter = base.mul_f64(rand::thread_rng().gen_range(0.0..0.2));
    Action::requeue(base + jitter)
}

// =============================================================================
// Kubernetes-backed client implementations
// =============================================================================

/// Real data plane client using DynamicObject for untyped resources
pub struct KubeDataPlane {
    client: Client,
}

impl KubeDataPlane {
    /// Create a new KubeDataPlane
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api_resource(gvk: &Gvk) -> ApiResource {
        ApiResource {
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            api_version: gvk.api_version(),
            kind: gvk.kind.clone(),
            plural: pluralize_kind(&gvk.kind),
        }
    }

    fn api_for(&self, gvk: &Gvk, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = Self::api_resource(gvk);
        match namespace {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

#[async_trait]
impl DataPlaneClient for KubeDataPlane {
    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn create_namespace(&self, name: &str, labels: BTreeMap<String, String>) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&PostParams::default(), &namespace).await?;
        Ok(())
    }

    async fn apply(&self, document: &serde_json::Value) -> Result<()> {
        let api_version = document["apiVersion"].as_str().unwrap_or_default();
        let kind = document["kind"].as_str().unwrap_or_default();
        let name = document["metadata"]["name"].as_str().unwrap_or_default();
        let namespace = document["metadata"]["namespace"].as_str();
        let gvk = Gvk::from_api_version(api_version, kind);

        let obj: DynamicObject =
            serde_json::from_value(document.clone()).map_err(|e| Error::serialization(e.to_string()))?;

        let api = self.api_for(&gvk, namespace);
        api.patch(
            name,
            &PatchParams::apply(CONTROLLER_NAME).force(),
            &Patch::Apply(&obj),
        )
        .await?;

        debug!(kind = %kind, name = %name, "Applied resource");
        Ok(())
    }

    async fn list(&self, gvk: &Gvk, label_selector: &str) -> Result<Vec<serde_json::Value>> {
        let api = self.api_for(gvk, None);
        let params = ListParams::default().labels(label_selector);
        let listed = match api.list(&params).await {
            Ok(listed) => listed,
            Err(e) => {
                let e = Error::from(e);
                // A probed kind may simply not be served by this cluster
                if e.is_not_found() {
                    return Ok(Vec::new());
                }
                return Err(e);
            }
        };
        listed
            .items
            .into_iter()
            .map(|obj| serde_json::to_value(obj).map_err(|e| Error::serialization(e.to_string())))
            .collect()
    }

    async fn delete(&self, gvk: &Gvk, namespace: Option<String>, name: &str) -> Result<()> {
        let api = self.api_for(gvk, namespace.as_deref());
        match api.delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let e = Error::from(e);
                if e.is_not_found() {
                    return Ok(());
                }
                Err(e)
            }
        }
    }
}

/// Real control plane client for Release status and finalizer writes
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    /// Create a new KubeControlPlane
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api_for(&self, release: &Release) -> Result<Api<Release>> {
        let namespace = release
            .namespace()
            .ok_or_else(|| Error::input("release has no namespace"))?;
        Ok(Api::namespaced(self.client.clone(), &namespace))
    }
}

#[async_trait]
impl ControlPlaneClient for KubeControlPlane {
    async fn patch_status(&self, release: &Release, status: &ReleaseStatus) -> Result<()> {
        let api = self.api_for(release)?;
        api.patch_status(
            &release.name_any(),
            &PatchParams::default(),
            &Patch::Merge(serde_json::json!({"status": status})),
        )
        .await?;
        Ok(())
    }

    async fn ensure_finalizer(&self, release: &Release) -> Result<bool> {
        if release.finalizers().iter().any(|f| f == FINALIZER) {
            return Ok(false);
        }
        let mut finalizers = release.finalizers().to_vec();
        finalizers.push(FINALIZER.to_string());
        let api = self.api_for(release)?;
        api.patch(
            &release.name_any(),
            &PatchParams::default(),
            &Patch::Merge(serde_json::json!({"metadata": {"finalizers": finalizers}})),
        )
        .await?;
        Ok(true)
    }

    async fn remove_finalizer(&self, release: &Release) -> Result<()> {
        let finalizers: Vec<&String> = release
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != FINALIZER)
            .collect();
        let api = self.api_for(release)?;
        api.patch(
            &release.name_any(),
            &PatchParams::default(),
            &Patch::Merge(serde_json::json!({"metadata": {"finalizers": finalizers}})),
        )
        .await?;
        Ok(())
    }
}

/// Known irregular pluralizations; everything else follows the standard
/// lowercase rules
const KIND_PLURALS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("componentstatus", "componentstatuses"),
    ("podsecuritypolicy", "podsecuritypolicies"),
];

/// Convert a kind to its plural form for API paths.
///
/// Uses the static table for irregular kinds, falling back to standard
/// pluralization (lowercase + s/es/ies) which covers the usual resource
/// kinds.
pub(crate) fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") || lower.ends_with('x')
    {
        format!("{}es", lower)
    } else if let Some(stem) = lower.strip_suffix('y') {
        if stem.ends_with(['a', 'e', 'i', 'o', 'u']) || stem.is_empty() {
            // vowel + y: gateway -> gateways
            format!("{}s", lower)
        } else {
            // consonant + y: policy -> policies
            format!("{}ies", stem)
        }
    } else {
        format!("{}s", lower)
    }
}
