//! DeployStack operator entry point

use clap::Parser;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use deploystack_common::crd::DeployStack;
use deploystack_operator::{build_stack_controller, CONTROLLER_NAME};

/// CRD-driven operator deploying application stacks
#[derive(Parser, Debug)]
#[command(name = "deploystack-operator", version, about, long_about = None)]
struct Cli {
    /// Generate the CRD manifest and exit
    #[arg(long)]
    crd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&DeployStack::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    run_controller().await
}

/// Ensure the DeployStack CRD is installed
///
/// The operator installs its own CRD on startup using server-side apply,
/// so the CRD version always matches the operator version.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(CONTROLLER_NAME).force();

    tracing::info!("Installing DeployStack CRD...");
    crds.patch(
        "deploystacks.deploystack.dev",
        &params,
        &Patch::Apply(&DeployStack::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install DeployStack CRD: {}", e))?;

    tracing::info!("DeployStack CRD installed/updated");
    Ok(())
}

async fn run_controller() -> anyhow::Result<()> {
    tracing::info!("DeployStack controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crd_installed(&client).await?;

    tracing::info!("Starting controllers:");
    build_stack_controller(client).await;

    tracing::info!("DeployStack controller shutting down");
    Ok(())
}
