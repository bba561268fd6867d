use cloudflare::framework::{
    endpoint::{spec::EndpointSpec, Method},
    response::ApiResult,
};
use serde::Deserialize;

/// Base64 encoded token cloudflared uses to connect as the tunnel.
#[derive(Deserialize, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct TunnelToken(pub String);

impl ApiResult for TunnelToken {}

impl std::fmt::Debug for TunnelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TunnelToken(<redacted>)")
    }
}

/// Get the connector token of a Cfd Tunnel.
/// <https://developers.cloudflare.com/api/operations/cloudflare-tunnel-get-a-cloudflare-tunnel-token>
#[derive(Debug)]
pub struct GetTunnelToken<'a> {
    pub account_identifier: &'a str,
    pub tunnel_id: &'a str,
}

impl EndpointSpec<TunnelToken> for GetTunnelToken<'_> {
    fn method(&self) -> Method {
        Method::GET
    }

    fn path(&self) -> String {
        format!(
            "accounts/{}/cfd_tunnel/{}/token",
            self.account_identifier, self.tunnel_id
        )
    }
}
