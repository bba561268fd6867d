use crate::crd::tunnel::ServiceRef;
use crate::Error;
use k8s_openapi::api::core::v1::Service;
use kube::{Api, Client};
use tracing::debug;

const LOAD_BALANCER: &str = "LoadBalancer";

/// Looks up the referenced service and builds the url cloudflared forwards to.
pub async fn resolve_target_url(
    kubernetes_client: Client,
    service_ref: &ServiceRef,
    default_namespace: &str,
) -> Result<String, Error> {
    let namespace = service_ref
        .namespace
        .as_deref()
        .filter(|ns| !ns.is_empty())
        .unwrap_or(default_namespace);

    let services: Api<Service> = Api::namespaced(kubernetes_client, namespace);
    let service = services
        .get_opt(&service_ref.name)
        .await?
        .ok_or_else(|| Error::TargetNotFound {
            name: service_ref.name.clone(),
            namespace: namespace.to_owned(),
        })?;
    debug!(service = %service_ref.name, namespace, "Target service fetched");

    target_url(&service, service_ref, namespace)
}

pub fn target_url(
    service: &Service,
    service_ref: &ServiceRef,
    namespace: &str,
) -> Result<String, Error> {
    let spec = service.spec.as_ref();

    spec.and_then(|spec| spec.ports.as_ref())
        .and_then(|ports| ports.iter().find(|port| port.port == service_ref.port))
        .ok_or_else(|| Error::PortNotFound {
            service: format!("{}/{}", namespace, service_ref.name),
            port: service_ref.port,
        })?;

    let is_load_balancer = spec.and_then(|spec| spec.type_.as_deref()) == Some(LOAD_BALANCER);
    let host = if is_load_balancer {
        service
            .status
            .as_ref()
            .and_then(|status| status.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .and_then(|ingress| ingress.first())
            .and_then(|ingress| ingress.ip.clone().or_else(|| ingress.hostname.clone()))
            .ok_or_else(|| {
                Error::LoadBalancerPending(format!("{}/{}", namespace, service_ref.name))
            })?
    } else {
        format!("{}.{}", service_ref.name, namespace)
    };

    Ok(format!("{}://{}:{}", service_ref.protocol, host, service_ref.port))
}
