//! One reconcile pass over a `CloudflareTunnel`: credentials, remote tunnel,
//! target url, child resources and finally DNS. Every stage runs through
//! [`Pipeline::stage`] so a cancelled pass stops at the next await point.

use crate::config::Settings;
use crate::credentials::SecretApiExt;
use crate::crd::tunnel::{CloudflareTunnel, CloudflareTunnelSpec, CloudflareTunnelStatus};
use crate::provider::{Auth, CloudflareApi};
use crate::resources::{configmap, create_or_update, deployment, secret};
use crate::tunnel::{ensure_tunnel, RemoteTunnel};
use crate::{dns, target, Error};
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{ConfigMap, Secret},
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Api, Client, Resource, ResourceExt};
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How far a pass got. Each variant names the state after the stage of the
/// same name completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    CredentialsResolved,
    TunnelEnsured,
    TargetResolved,
    CredentialResourceSynced,
    ConfigResourceSynced,
    WorkloadSynced,
    DnsEnsured,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Start => "start",
            Phase::CredentialsResolved => "credentials_resolved",
            Phase::TunnelEnsured => "tunnel_ensured",
            Phase::TargetResolved => "target_resolved",
            Phase::CredentialResourceSynced => "credential_resource_synced",
            Phase::ConfigResourceSynced => "config_resource_synced",
            Phase::WorkloadSynced => "workload_synced",
            Phase::DnsEnsured => "dns_ensured",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Everything a pass needs from the resource, read once up front.
#[derive(Debug, Clone)]
pub struct DesiredState {
    pub name: String,
    pub namespace: String,
    pub spec: CloudflareTunnelSpec,
    pub known_tunnel_id: Option<String>,
    pub owner: OwnerReference,
}

impl DesiredState {
    pub fn from_resource(resource: &CloudflareTunnel) -> Result<Self, Error> {
        let namespace = resource
            .namespace()
            .ok_or(Error::MissingNamespace("CloudflareTunnel"))?;
        let owner = resource
            .controller_owner_ref(&())
            .ok_or_else(|| Error::Configuration("resource has no uid yet".to_owned()))?;

        Ok(Self {
            name: resource.name_any(),
            namespace,
            spec: resource.spec.clone(),
            known_tunnel_id: resource.tunnel_id().map(str::to_owned),
            owner,
        })
    }
}

/// Outputs of a completed pass.
#[derive(Debug, Clone)]
pub struct ResolvedState {
    pub auth: Auth,
    pub tunnel: RemoteTunnel,
    pub target_url: String,
    pub secret: Secret,
    pub config_map: ConfigMap,
    pub deployment: Deployment,
}

pub struct Pipeline<'a> {
    kubernetes_client: Client,
    cloudflare: &'a dyn CloudflareApi,
    settings: &'a Settings,
    cancel: CancellationToken,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        kubernetes_client: Client,
        cloudflare: &'a dyn CloudflareApi,
        settings: &'a Settings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            kubernetes_client,
            cloudflare,
            settings,
            cancel,
        }
    }

    /// Runs one stage to completion unless the pass is cancelled first, in
    /// which case the stage future is dropped.
    async fn stage<T, F>(&self, phase: Phase, stage: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled(phase)),
            result = stage => result,
        };

        match &result {
            Ok(_) => debug!(%phase, "Phase reached"),
            Err(error) => warn!(%phase, %error, "Phase not reached"),
        }
        result
    }

    pub async fn run(
        &self,
        resource: &CloudflareTunnel,
        desired: &DesiredState,
    ) -> Result<ResolvedState, Error> {
        debug!(phase = %Phase::Start, tunnel = %desired.name, "Starting reconcile pass");

        let secrets: Api<Secret> =
            Api::namespaced(self.kubernetes_client.clone(), &desired.namespace);
        let auth = self
            .stage(
                Phase::CredentialsResolved,
                secrets.resolve_credentials(&desired.spec.token_secret_name),
            )
            .await?;

        let mut recorded = resource.status.clone().unwrap_or_default();
        let tunnel = self
            .stage(
                Phase::TunnelEnsured,
                self.ensure_remote_tunnel(resource, desired, &auth, &mut recorded),
            )
            .await?;

        let target_url = self
            .stage(
                Phase::TargetResolved,
                target::resolve_target_url(
                    self.kubernetes_client.clone(),
                    &desired.spec.service,
                    &desired.namespace,
                ),
            )
            .await?;

        let secret = self
            .stage(Phase::CredentialResourceSynced, self.sync_secret(desired, &tunnel))
            .await?;

        let config_map = self
            .stage(
                Phase::ConfigResourceSynced,
                self.sync_config_map(desired, &tunnel, &target_url),
            )
            .await?;

        let deployment = self
            .stage(
                Phase::WorkloadSynced,
                self.sync_workload(resource, desired, &secret, &config_map, &mut recorded),
            )
            .await?;

        self.stage(
            Phase::DnsEnsured,
            dns::ensure_cname(
                self.cloudflare,
                &auth,
                &desired.spec.zone,
                &desired.spec.domain,
                &tunnel.id,
            ),
        )
        .await?;

        info!(
            phase = %Phase::Done,
            tunnel = %desired.name,
            tunnel_id = %tunnel.id,
            "Reconcile pass finished"
        );
        Ok(ResolvedState {
            auth,
            tunnel,
            target_url,
            secret,
            config_map,
            deployment,
        })
    }

    /// Ensures the remote tunnel and records its id in status when it changed,
    /// so a pass failing later still narrows the next lookup.
    async fn ensure_remote_tunnel(
        &self,
        resource: &CloudflareTunnel,
        desired: &DesiredState,
        auth: &Auth,
        recorded: &mut CloudflareTunnelStatus,
    ) -> Result<RemoteTunnel, Error> {
        let tunnel = ensure_tunnel(
            self.cloudflare,
            auth,
            &desired.name,
            desired.known_tunnel_id.as_deref(),
        )
        .await?;

        if recorded.tunnel_id.as_deref() != Some(tunnel.id.as_str()) {
            let status = CloudflareTunnelStatus {
                tunnel_id: Some(tunnel.id.clone()),
                replicas: recorded.replicas.or(Some(desired.spec.replicas)),
            };
            self.record_status(resource, recorded, status).await?;
        }

        Ok(tunnel)
    }

    /// Syncs the Deployment and reports its replica count through status.
    async fn sync_workload(
        &self,
        resource: &CloudflareTunnel,
        desired: &DesiredState,
        secret: &Secret,
        config_map: &ConfigMap,
        recorded: &mut CloudflareTunnelStatus,
    ) -> Result<Deployment, Error> {
        let deployment = self.sync_deployment(desired, secret, config_map).await?;

        let status = CloudflareTunnelStatus {
            tunnel_id: recorded.tunnel_id.clone(),
            replicas: Some(observed_replicas(&deployment, desired.spec.replicas)),
        };
        self.record_status(resource, recorded, status).await?;

        Ok(deployment)
    }

    async fn record_status(
        &self,
        resource: &CloudflareTunnel,
        recorded: &mut CloudflareTunnelStatus,
        status: CloudflareTunnelStatus,
    ) -> Result<(), Error> {
        if *recorded == status {
            return Ok(());
        }

        info!(
            tunnel_id = status.tunnel_id.as_deref().unwrap_or_default(),
            replicas = status.replicas,
            "Recording status"
        );
        resource
            .record_status(self.kubernetes_client.clone(), &status)
            .await?;
        *recorded = status;
        Ok(())
    }

    async fn sync_secret(
        &self,
        desired: &DesiredState,
        tunnel: &RemoteTunnel,
    ) -> Result<Secret, Error> {
        let api: Api<Secret> =
            Api::namespaced(self.kubernetes_client.clone(), &desired.namespace);
        create_or_update(&api, secret::build(desired, tunnel)?, &desired.owner).await
    }

    async fn sync_config_map(
        &self,
        desired: &DesiredState,
        tunnel: &RemoteTunnel,
        target_url: &str,
    ) -> Result<ConfigMap, Error> {
        let api: Api<ConfigMap> =
            Api::namespaced(self.kubernetes_client.clone(), &desired.namespace);
        let config_map = configmap::build(desired, tunnel, target_url)?;
        create_or_update(&api, config_map, &desired.owner).await
    }

    async fn sync_deployment(
        &self,
        desired: &DesiredState,
        secret: &Secret,
        config_map: &ConfigMap,
    ) -> Result<Deployment, Error> {
        let image = desired
            .spec
            .image
            .as_deref()
            .unwrap_or(&self.settings.cloudflared_image);

        let api: Api<Deployment> =
            Api::namespaced(self.kubernetes_client.clone(), &desired.namespace);
        let deployment = deployment::build(desired, secret, config_map, image);
        create_or_update(&api, deployment, &desired.owner).await
    }
}

/// Replicas the Deployment controller reports. A Deployment it has not
/// observed yet counts as running the requested number.
fn observed_replicas(deployment: &Deployment, requested: i32) -> i32 {
    match &deployment.status {
        Some(status) => status.replicas.unwrap_or(0),
        None => requested,
    }
}
