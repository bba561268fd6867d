use super::labels;
use crate::reconcile::DesiredState;
use crate::tunnel::RemoteTunnel;
use crate::Error;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use serde::Serialize;
use std::collections::BTreeMap;

pub const CONFIG_FILE: &str = "config.yaml";
pub const CONFIG_DIR: &str = "/etc/cloudflared/config";
pub const CREDENTIALS_DIR: &str = "/etc/cloudflared/creds";
pub const METRICS_PORT: i32 = 2000;

/// Catch-all rule for requests that match no hostname.
const FALLBACK_SERVICE: &str = "http_status:404";

#[derive(Serialize, Debug)]
#[serde(rename_all = "kebab-case")]
struct CloudflaredConfig<'a> {
    tunnel: &'a str,
    credentials_file: String,
    metrics: String,
    no_autoupdate: bool,
    ingress: Vec<IngressRule<'a>>,
}

#[derive(Serialize, Debug)]
struct IngressRule<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    hostname: Option<&'a str>,
    service: &'a str,
}

pub fn config_path() -> String {
    format!("{}/{}", CONFIG_DIR, CONFIG_FILE)
}

pub fn build(
    desired: &DesiredState,
    tunnel: &RemoteTunnel,
    target_url: &str,
) -> Result<ConfigMap, Error> {
    let config = CloudflaredConfig {
        tunnel: &tunnel.id,
        credentials_file: format!("{}/{}", CREDENTIALS_DIR, super::secret::CREDENTIALS_FILE),
        metrics: format!("0.0.0.0:{}", METRICS_PORT),
        no_autoupdate: true,
        ingress: vec![
            IngressRule {
                hostname: Some(&desired.spec.domain),
                service: target_url,
            },
            IngressRule {
                hostname: None,
                service: FALLBACK_SERVICE,
            },
        ],
    };
    let rendered = serde_yaml::to_string(&config)
        .map_err(|err| Error::Serialization(CONFIG_FILE, err.to_string()))?;

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(desired.name.clone()),
            namespace: Some(desired.namespace.clone()),
            labels: Some(labels(&desired.name)),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(CONFIG_FILE.to_owned(), rendered)])),
        ..ConfigMap::default()
    })
}
