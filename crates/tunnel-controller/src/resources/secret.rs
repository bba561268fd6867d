use super::labels;
use crate::reconcile::DesiredState;
use crate::tunnel::RemoteTunnel;
use crate::Error;
use k8s_openapi::{api::core::v1::Secret, ByteString};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

/// Key of the cloudflared credentials file inside the secret.
pub const CREDENTIALS_FILE: &str = "credentials.json";

pub fn build(desired: &DesiredState, tunnel: &RemoteTunnel) -> Result<Secret, Error> {
    let credentials = serde_json::to_vec(&tunnel.credentials)
        .map_err(|err| Error::Serialization(CREDENTIALS_FILE, err.to_string()))?;

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(desired.name.clone()),
            namespace: Some(desired.namespace.clone()),
            labels: Some(labels(&desired.name)),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(
            CREDENTIALS_FILE.to_owned(),
            ByteString(credentials),
        )])),
        ..Secret::default()
    })
}
