use crate::provider::{Auth, CloudflareApi, TunnelFilter};
use crate::Error;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const TUNNEL_SECRET_BYTES: usize = 32;

/// What cloudflared needs to authenticate as the tunnel. Deserialized from the
/// short keys of the connector token and serialized in the credentials file
/// format.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TunnelCredentials {
    #[serde(rename(serialize = "AccountTag", deserialize = "a"))]
    pub account_tag: String,
    #[serde(rename(serialize = "TunnelID", deserialize = "t"))]
    pub tunnel_id: String,
    #[serde(rename(serialize = "TunnelSecret", deserialize = "s"))]
    pub tunnel_secret: String,
}

impl std::fmt::Debug for TunnelCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelCredentials")
            .field("account_tag", &self.account_tag)
            .field("tunnel_id", &self.tunnel_id)
            .field("tunnel_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTunnel {
    pub id: String,
    pub name: String,
    pub credentials: TunnelCredentials,
}

/// Finds the tunnel named `name`, creating it when none exists, and fetches the
/// credentials its connectors use.
pub async fn ensure_tunnel(
    cloudflare: &dyn CloudflareApi,
    auth: &Auth,
    name: &str,
    known_id: Option<&str>,
) -> Result<RemoteTunnel, Error> {
    let filter = TunnelFilter {
        name,
        is_deleted: false,
        tunnel_id: known_id,
    };
    let mut tunnels = cloudflare.list_tunnels(auth, filter).await?;
    debug!(count = tunnels.len(), "Existing tunnels fetched");

    // Cloudflare allows duplicate names, so the name is only a key while it is unique.
    let tunnel = match tunnels.len() {
        0 => {
            info!(tunnel = name, "Tunnel doesn't exist, creating");
            let secret = generate_tunnel_secret();
            cloudflare.create_tunnel(auth, name, &secret).await?
        }
        1 => {
            debug!(tunnel = name, "Tunnel already exists");
            tunnels.remove(0)
        }
        count => {
            return Err(Error::AmbiguousTunnel {
                name: name.to_owned(),
                count,
            })
        }
    };

    let tunnel_id = tunnel.id.to_string();
    let token = cloudflare.get_tunnel_token(auth, &tunnel_id).await?;
    let credentials = decode_connector_token(&tunnel_id, &token)?;

    Ok(RemoteTunnel {
        id: tunnel_id,
        name: tunnel.name,
        credentials,
    })
}

/// 32 bytes from the OS random number generator.
pub fn generate_tunnel_secret() -> Vec<u8> {
    let mut bytes = vec![0u8; TUNNEL_SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

fn decode_connector_token(tunnel_id: &str, token: &str) -> Result<TunnelCredentials, Error> {
    let malformed = |reason: String| Error::MalformedConnectorToken {
        tunnel_id: tunnel_id.to_owned(),
        reason,
    };

    let decoded = STANDARD
        .decode(token.trim())
        .map_err(|err| malformed(err.to_string()))?;
    serde_json::from_slice(&decoded).map_err(|err| malformed(err.to_string()))
}
