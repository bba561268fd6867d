use kube::api::{Patch, PatchParams};
use kube::{Api, CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

fn default_replicas() -> i32 {
    1
}

fn default_protocol() -> String {
    "http".to_owned()
}

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "cloudflare.ar2ro.io",
    version = "v1",
    kind = "CloudflareTunnel",
    shortname = "cft",
    doc = "Custom resource representation of a Cloudflare Tunnel fronting an in-cluster service",
    status = "CloudflareTunnelStatus",
    printcolumn = r#"{"name":"Domain","type":"string","jsonPath":".spec.domain"}"#,
    printcolumn = r#"{"name":"Tunnel ID","type":"string","jsonPath":".status.tunnelID"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    scale = r#"{"specReplicasPath":".spec.replicas", "statusReplicasPath":".status.replicas"}"#,
    namespaced
)]
pub struct CloudflareTunnelSpec {
    /// Name of the Cloudflare zone the domain lives in, e.g. `example.com`.
    pub zone: String,
    /// Public hostname routed through the tunnel.
    pub domain: String,
    pub service: ServiceRef,
    #[serde(default = "default_replicas")]
    #[schemars(range(min = 0))]
    pub replicas: i32,
    /// Secret in the same namespace holding the `token` and `accountID` keys.
    pub token_secret_name: String,
    /// Overrides the operator wide cloudflared image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// The in-cluster service the tunnel forwards traffic to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
pub struct ServiceRef {
    pub name: String,
    /// Defaults to the namespace of the CloudflareTunnel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub port: i32,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
pub struct CloudflareTunnelStatus {
    #[serde(rename = "tunnelID", default, skip_serializing_if = "Option::is_none")]
    pub tunnel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

impl CloudflareTunnel {
    /// Tunnel id recorded by an earlier pass.
    pub fn tunnel_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|status| status.tunnel_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// Merge-patches the status subresource. Fields left `None` keep their
    /// stored value.
    pub async fn record_status(
        &self,
        kubernetes_client: kube::Client,
        status: &CloudflareTunnelStatus,
    ) -> Result<CloudflareTunnel, kube::Error> {
        let namespace = self.namespace().unwrap_or_default();
        let api: Api<CloudflareTunnel> = Api::namespaced(kubernetes_client, &namespace);

        let patch = json!({ "status": status });

        api.patch_status(&self.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
    }
}
