use crate::provider::Auth;
use crate::Error;
use cloudflare::framework::auth::Credentials;
use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use tracing::debug;

pub const TOKEN_KEY: &str = "token";
pub const ACCOUNT_ID_KEY: &str = "accountID";

#[allow(async_fn_in_trait)]
pub trait SecretApiExt {
    /// Reads the Cloudflare api token and account tag out of the named secret.
    async fn resolve_credentials(&self, name: &str) -> Result<Auth, Error>;
}

impl SecretApiExt for Api<Secret> {
    async fn resolve_credentials(&self, name: &str) -> Result<Auth, Error> {
        if name.is_empty() {
            return Err(Error::Configuration("tokenSecretName must be set".to_owned()));
        }

        let secret = self
            .get_opt(name)
            .await?
            .ok_or_else(|| Error::CredentialNotFound(name.to_owned()))?;
        debug!(secret = name, "Credentials secret fetched");

        let token = read_key(&secret, name, TOKEN_KEY)?;
        let account_tag = read_key(&secret, name, ACCOUNT_ID_KEY)?;

        Ok(Auth {
            account_tag,
            credentials: Credentials::UserAuthToken { token },
        })
    }
}

fn read_key(secret: &Secret, name: &str, key: &'static str) -> Result<String, Error> {
    let missing = || Error::CredentialFieldMissing {
        secret: name.to_owned(),
        key,
    };

    let value = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .ok_or_else(missing)?;

    let value = String::from_utf8(value.0.clone()).map_err(|_| missing())?;
    let value = value.trim();
    if value.is_empty() {
        return Err(missing());
    }

    Ok(value.to_owned())
}
