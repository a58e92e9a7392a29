//! pull-secret-federator - keeps registry pull Secrets filled from workload identity

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};

use pull_secret_federator::config::FederationConfig;
use pull_secret_federator::controller::{error_policy, reconcile, Context, CONTROLLER_NAME};
use pull_secret_federator::crd::ImagePullSecret;
use pull_secret_federator::telemetry::{init_tracing, LogFormat};
use pull_secret_federator::token::{
    DEFAULT_IAM_CREDENTIALS_ENDPOINT, DEFAULT_STS_ENDPOINT, DEFAULT_TOKEN_INFO_ENDPOINT,
};

/// Federates Kubernetes service accounts into Google registry pull Secrets
#[derive(Parser, Debug)]
#[command(name = "pull-secret-federator", version, about, long_about = None)]
struct Cli {
    /// Print the ImagePullSecret CRD as YAML and exit
    #[arg(long)]
    crd: bool,

    /// Server-side apply the CRD before starting the controller
    #[arg(long, env = "INSTALL_CRD")]
    install_crd: bool,

    /// Echo outbound token exchange requests to stderr
    #[arg(long, env = "DEBUG")]
    debug: bool,

    /// Security token service endpoint
    #[arg(long, env = "STS_ENDPOINT", default_value = DEFAULT_STS_ENDPOINT)]
    sts_endpoint: String,

    /// IAM credentials service account collection URL
    #[arg(
        long,
        env = "IAM_CREDENTIALS_ENDPOINT",
        default_value = DEFAULT_IAM_CREDENTIALS_ENDPOINT
    )]
    iam_credentials_endpoint: String,

    /// Token info endpoint for introspection
    #[arg(long, env = "TOKEN_INFO_ENDPOINT", default_value = DEFAULT_TOKEN_INFO_ENDPOINT)]
    token_info_endpoint: String,

    /// Skip token introspection before writing the credential
    #[arg(long, env = "SKIP_TOKEN_INFO")]
    skip_token_info: bool,

    /// Timeout for each outbound HTTP request, in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value = "30")]
    http_timeout_secs: u64,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    fn federation_config(&self) -> FederationConfig {
        FederationConfig {
            debug: self.debug,
            sts_endpoint: self.sts_endpoint.clone(),
            iam_credentials_endpoint: self.iam_credentials_endpoint.clone(),
            token_info_endpoint: self.token_info_endpoint.clone(),
            introspect: !self.skip_token_info,
            http_timeout: Duration::from_secs(self.http_timeout_secs),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&ImagePullSecret::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_tracing(cli.log_format)?;

    run_controller(&cli).await
}

async fn run_controller(cli: &Cli) -> anyhow::Result<()> {
    tracing::info!(debug = cli.debug, "pull-secret-federator starting");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if cli.install_crd {
        ensure_crd_installed(&client).await?;
    }

    let config = cli.federation_config();
    let ctx = Arc::new(Context::new(client.clone(), config)?);

    let requests: Api<ImagePullSecret> = Api::all(client);

    tracing::info!("Starting ImagePullSecret controller");
    Controller::new(requests, WatcherConfig::default().timeout(25))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result)
        .await;

    tracing::info!("pull-secret-federator shutting down");
    Ok(())
}

async fn log_reconcile_result<E: std::error::Error>(
    result: Result<(ObjectRef<ImagePullSecret>, Action), E>,
) {
    match result {
        Ok((object, action)) => {
            tracing::debug!(object = %object, ?action, "ImagePullSecret reconciliation completed");
        }
        Err(e) => {
            tracing::warn!(error = %e, "ImagePullSecret reconciliation error");
        }
    }
}

async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(CONTROLLER_NAME).force();

    tracing::info!("Installing ImagePullSecret CRD...");
    crds.patch(
        "imagepullsecrets.pullsecrets.dev",
        &params,
        &Patch::Apply(&ImagePullSecret::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install ImagePullSecret CRD: {}", e))?;

    Ok(())
}
