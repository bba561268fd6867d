use crate::Error;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, PostParams};
use kube::{Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::{debug, info};

pub mod configmap;
pub mod deployment;
pub mod secret;

pub const MANAGED_BY: &str = "cloudflare-tunnel-operator";

/// Labels put on every child resource of the tunnel named `name`.
pub fn labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_owned(), name.to_owned()),
        ("app.kubernetes.io/managed-by".to_owned(), MANAGED_BY.to_owned()),
    ])
}

/// Creates `desired` when it doesn't exist yet, otherwise replaces the stored
/// object with it. The owner reference is stamped before anything is written.
pub async fn create_or_update<K>(
    api: &Api<K>,
    mut desired: K,
    owner: &OwnerReference,
) -> Result<K, Error>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
{
    desired.meta_mut().owner_references = Some(vec![owner.clone()]);
    let name = desired.name_any();
    let sync_error = |source: kube::Error| Error::ResourceSync {
        kind: K::kind(&()).into_owned(),
        name: name.clone(),
        source,
    };

    match api.get_opt(&name).await.map_err(sync_error)? {
        None => {
            info!(kind = %K::kind(&()), name = %name, "Creating resource");
            api.create(&PostParams::default(), &desired)
                .await
                .map_err(sync_error)
        }
        Some(existing) => {
            debug!(kind = %K::kind(&()), name = %name, "Replacing resource");
            desired.meta_mut().resource_version = existing.resource_version();
            api.replace(&name, &PostParams::default(), &desired)
                .await
                .map_err(sync_error)
        }
    }
}
