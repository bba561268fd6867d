use crate::config::Settings;
use crate::crd::tunnel::CloudflareTunnel;
use crate::provider::CloudflareApi;
use crate::reconcile::{DesiredState, Phase, Pipeline};
use cloudflare::framework::response::ApiFailure;
use futures::{Future, StreamExt};
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{ConfigMap, Secret},
};
use kube::runtime::controller::Action;
use kube::{
    client::Client, runtime::watcher::Config, runtime::Controller as KubeController, Api,
    ResourceExt,
};
use std::future::IntoFuture;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub mod config;
pub mod credentials;
pub mod crd;
pub mod dns;
pub mod provider;
pub mod reconcile;
pub mod resources;
pub mod target;
pub mod tunnel;

#[cfg(test)]
pub(crate) mod test_utils;

/// All errors possible to occur during reconciliation
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid tunnel configuration: {0}")]
    Configuration(String),
    #[error("missing namespace for resource {0}")]
    MissingNamespace(&'static str),
    #[error("Credentials secret {0} not found")]
    CredentialNotFound(String),
    #[error("Credentials secret {secret} has no usable {key} key")]
    CredentialFieldMissing { secret: String, key: &'static str },
    #[error("{count} remote tunnels are named {name}, refusing to pick one")]
    AmbiguousTunnel { name: String, count: usize },
    // Any error that the cloudflare api returns
    #[error("Cloudflare api returned an error: {0}")]
    RemoteApi(#[from] ApiFailure),
    #[error("Connector token for tunnel {tunnel_id} could not be decoded: {reason}")]
    MalformedConnectorToken { tunnel_id: String, reason: String },
    #[error("Target service {namespace}/{name} not found")]
    TargetNotFound { name: String, namespace: String },
    #[error("Target service {service} does not expose port {port}")]
    PortNotFound { service: String, port: i32 },
    #[error("Load balancer service {0} has no ingress address yet")]
    LoadBalancerPending(String),
    #[error("Failed to sync {kind} {name}: {source}")]
    ResourceSync {
        kind: String,
        name: String,
        #[source]
        source: kube::Error,
    },
    #[error("Zone {zone} could not be resolved: {reason}")]
    ZoneNotFound { zone: String, reason: String },
    #[error("Failed to render {0}: {1}")]
    Serialization(&'static str, String),
    // Any error originating from the `kube-rs` crate
    #[error("Kubernetes reported error: {0}")]
    KubeError(#[from] kube::Error),
    #[error("Reconcile pass cancelled before reaching {0}")]
    Cancelled(Phase),
}

impl Error {
    /// Errors that need a human to fix the resource or the account before a
    /// retry can succeed.
    pub fn needs_intervention(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_)
                | Error::MissingNamespace(_)
                | Error::AmbiguousTunnel { .. }
                | Error::PortNotFound { .. }
        )
    }
}

pub struct Context {
    pub kubernetes_client: Client,
    pub cloudflare_client: Arc<dyn CloudflareApi>,
    pub settings: Settings,
    pub shutdown: CancellationToken,
}

#[instrument(skip(generator, ctx), fields(tunnel = %generator.name_any(), namespace = %generator.namespace().unwrap_or_default()))]
pub async fn reconciler(
    generator: Arc<CloudflareTunnel>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let desired = DesiredState::from_resource(&generator)?;
    info!("Reconciling tunnel");

    let cancel = ctx.shutdown.child_token();
    let deadline = tokio::spawn({
        let cancel = cancel.clone();
        let timeout = ctx.settings.reconcile_timeout();
        async move {
            tokio::time::sleep(timeout).await;
            cancel.cancel();
        }
    });

    let pipeline = Pipeline::new(
        ctx.kubernetes_client.clone(),
        ctx.cloudflare_client.as_ref(),
        &ctx.settings,
        cancel,
    );
    let result = pipeline.run(&generator, &desired).await;
    deadline.abort();

    let resolved = result?;
    info!(tunnel_id = %resolved.tunnel.id, url = %resolved.target_url, "Tunnel reconciled");
    Ok(Action::requeue(ctx.settings.requeue_interval()))
}

pub fn on_err(generator: Arc<CloudflareTunnel>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = generator.name_any();
    if error.needs_intervention() {
        warn!(tunnel = %name, %error, "Tunnel needs attention, requeuing");
        Action::requeue(ctx.settings.requeue_interval())
    } else {
        error!(tunnel = %name, %error, "Failed to reconcile tunnel");
        Action::requeue(ctx.settings.error_requeue_interval())
    }
}

pub struct TunnelController {
    ctx: Arc<Context>,
    tunnel_api: Api<CloudflareTunnel>,
}

impl TunnelController {
    pub async fn start(self) -> anyhow::Result<()> {
        info!("Starting Tunnel Controller");
        let client = self.ctx.kubernetes_client.clone();
        let deployment_api: Api<Deployment> = Api::all(client.clone());
        let configmap_api: Api<ConfigMap> = Api::all(client.clone());
        let secret_api: Api<Secret> = Api::all(client);
        let shutdown = self.ctx.shutdown.clone();

        KubeController::new(self.tunnel_api, Config::default())
            .owns(deployment_api, Config::default())
            .owns(configmap_api, Config::default())
            .owns(secret_api, Config::default())
            .graceful_shutdown_on(shutdown.cancelled_owned())
            .run(reconciler, on_err, self.ctx)
            .for_each(|result| async move {
                match result {
                    Ok((tunnel, action)) => {
                        debug!(tunnel = %tunnel.name, ?action, "Successfully reconciled tunnel")
                    }
                    Err(err) => warn!(error = %err, "Failed to reconcile tunnel"),
                }
            })
            .await;

        info!("Tunnel Controller stopped");
        Ok(())
    }

    pub fn try_new(
        kubernetes_client: Client,
        cloudflare_client: Arc<dyn CloudflareApi>,
        settings: Settings,
        shutdown: CancellationToken,
    ) -> anyhow::Result<TunnelController> {
        let tunnel_api: Api<CloudflareTunnel> = Api::all(kubernetes_client.clone());

        let ctx = Arc::new(Context {
            kubernetes_client,
            cloudflare_client,
            settings,
            shutdown,
        });

        Ok(Self { ctx, tunnel_api })
    }
}

impl IntoFuture for TunnelController {
    type Output = anyhow::Result<()>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output>>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.start())
    }
}
