//! Weaver operator - component synthesis and release reconciliation

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use weaver::controller::release::KubeControlPlane;
use weaver::controller::{error_policy, reconcile, Context};
use weaver::crd::{
    Component, ComponentDeployment, ComponentType, DataPlane, Environment, Release, Trait,
    Workload,
};
use weaver::resolver::KubeClusterResolver;
use weaver::CONTROLLER_NAME;

/// Weaver - declarative component synthesis and release reconciliation
#[derive(Parser, Debug)]
#[command(name = "weaver", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        print_crds()?;
        return Ok(());
    }

    run_controller().await
}

/// Print all Weaver CRD manifests as a multi-document YAML stream
fn print_crds() -> anyhow::Result<()> {
    let crds = [
        serde_yaml::to_string(&Component::crd())?,
        serde_yaml::to_string(&ComponentType::crd())?,
        serde_yaml::to_string(&Trait::crd())?,
        serde_yaml::to_string(&Workload::crd())?,
        serde_yaml::to_string(&ComponentDeployment::crd())?,
        serde_yaml::to_string(&Environment::crd())?,
        serde_yaml::to_string(&DataPlane::crd())?,
        serde_yaml::to_string(&Release::crd())?,
    ];
    println!("{}", crds.join("---\n"));
    Ok(())
}

/// Ensure all Weaver CRDs are installed
///
/// The operator installs its own CRDs on startup using server-side apply,
/// so the CRD versions always match the operator version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(CONTROLLER_NAME).force();

    let manifests = [
        ("components.weaver.dev", Component::crd()),
        ("componenttypes.weaver.dev", ComponentType::crd()),
        ("traits.weaver.dev", Trait::crd()),
        ("workloads.weaver.dev", Workload::crd()),
        ("componentdeployments.weaver.dev", ComponentDeployment::crd()),
        ("environments.weaver.dev", Environment::crd()),
        ("dataplanes.weaver.dev", DataPlane::crd()),
        ("releases.weaver.dev", Release::crd()),
    ];

    for (name, manifest) in manifests {
        tracing::info!(crd = name, "Installing CRD");
        crds.patch(name, &params, &Patch::Apply(&manifest))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }

    tracing::info!("All Weaver CRDs installed/updated");
    Ok(())
}

/// Run in controller mode - watches Releases and reconciles them
async fn run_controller() -> anyhow::Result<()> {
    tracing::info!("Weaver controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    // Operator installs its own CRDs on startup
    ensure_crds_installed(&client).await?;

    let ctx = Arc::new(Context {
        control_plane: Arc::new(KubeControlPlane::new(client.clone())),
        resolver: Arc::new(KubeClusterResolver::new(client.clone())),
    });

    let releases: Api<Release> = Api::all(client);

    tracing::info!("Starting Release controller...");

    Controller::new(releases, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Release reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Release reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("Weaver controller shutting down");
    Ok(())
}
