use async_trait::async_trait;
use cloudflare::{
    endpoints::{
        cfd_tunnel::{create_tunnel, list_tunnels, ConfigurationSrc, Tunnel},
        dns::{
            CreateDnsRecord, CreateDnsRecordParams, DnsContent, DnsRecord, ListDnsRecords,
            ListDnsRecordsParams,
        },
        zone::{ListZones, ListZonesParams, Zone},
    },
    framework::{auth::Credentials, response::ApiFailure},
};
use cloudflarext::{
    cfd_tunnel::{GetTunnelToken, TunnelToken},
    AuthlessClient,
};
use std::fmt;

/// Account credentials resolved from the token secret. Lives for one pass.
#[derive(Clone)]
pub struct Auth {
    pub account_tag: String,
    pub credentials: Credentials,
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Auth")
            .field("account_tag", &self.account_tag)
            .field("credentials", &"<redacted>")
            .finish()
    }
}

/// Filter for listing tunnels.
#[derive(Debug, Clone, Copy)]
pub struct TunnelFilter<'a> {
    pub name: &'a str,
    pub is_deleted: bool,
    pub tunnel_id: Option<&'a str>,
}

/// Wire name of a record's type, as used in the `type` field.
pub fn record_type(content: &DnsContent) -> &'static str {
    match content {
        DnsContent::A { .. } => "A",
        DnsContent::AAAA { .. } => "AAAA",
        DnsContent::CNAME { .. } => "CNAME",
        DnsContent::NS { .. } => "NS",
        DnsContent::MX { .. } => "MX",
        DnsContent::TXT { .. } => "TXT",
        DnsContent::SRV { .. } => "SRV",
    }
}

/// The Cloudflare operations the reconcile pipeline depends on.
#[async_trait]
pub trait CloudflareApi: Send + Sync {
    async fn list_tunnels(
        &self,
        auth: &Auth,
        filter: TunnelFilter<'_>,
    ) -> Result<Vec<Tunnel>, ApiFailure>;

    async fn create_tunnel(
        &self,
        auth: &Auth,
        name: &str,
        tunnel_secret: &[u8],
    ) -> Result<Tunnel, ApiFailure>;

    /// Base64 encoded connector token for the tunnel.
    async fn get_tunnel_token(&self, auth: &Auth, tunnel_id: &str) -> Result<String, ApiFailure>;

    /// `Ok(None)` when the account has no zone with that name.
    async fn resolve_zone_id(
        &self,
        auth: &Auth,
        zone_name: &str,
    ) -> Result<Option<String>, ApiFailure>;

    async fn list_dns_records(
        &self,
        auth: &Auth,
        zone_id: &str,
        record_type: &str,
        name: &str,
    ) -> Result<Vec<DnsRecord>, ApiFailure>;

    async fn create_dns_record(
        &self,
        auth: &Auth,
        zone_id: &str,
        params: CreateDnsRecordParams<'_>,
    ) -> Result<DnsRecord, ApiFailure>;
}

#[async_trait]
impl CloudflareApi for AuthlessClient {
    async fn list_tunnels(
        &self,
        auth: &Auth,
        filter: TunnelFilter<'_>,
    ) -> Result<Vec<Tunnel>, ApiFailure> {
        let endpoint = list_tunnels::ListTunnels {
            account_identifier: &auth.account_tag,
            params: list_tunnels::Params {
                name: Some(filter.name.to_owned()),
                uuid: filter.tunnel_id.map(str::to_owned),
                is_deleted: Some(filter.is_deleted),
                ..list_tunnels::Params::default()
            },
        };

        match self.request::<Vec<Tunnel>>(&auth.credentials, &endpoint).await {
            Ok(result) => Ok(result.result),
            Err(err) => Err(err),
        }
    }

    async fn create_tunnel(
        &self,
        auth: &Auth,
        name: &str,
        tunnel_secret: &[u8],
    ) -> Result<Tunnel, ApiFailure> {
        let tunnel_secret = tunnel_secret.to_vec();
        let endpoint = create_tunnel::CreateTunnel {
            account_identifier: &auth.account_tag,
            params: create_tunnel::Params {
                name,
                tunnel_secret: &tunnel_secret,
                config_src: &ConfigurationSrc::Local,
                metadata: None,
            },
        };

        match self.request::<Tunnel>(&auth.credentials, &endpoint).await {
            Ok(result) => Ok(result.result),
            Err(err) => Err(err),
        }
    }

    async fn get_tunnel_token(&self, auth: &Auth, tunnel_id: &str) -> Result<String, ApiFailure> {
        let endpoint = GetTunnelToken {
            account_identifier: &auth.account_tag,
            tunnel_id,
        };

        self.request::<TunnelToken>(&auth.credentials, &endpoint)
            .await
            .map(|res| res.result.0)
    }

    async fn resolve_zone_id(
        &self,
        auth: &Auth,
        zone_name: &str,
    ) -> Result<Option<String>, ApiFailure> {
        let endpoint = ListZones {
            params: ListZonesParams {
                name: Some(zone_name.to_owned()),
                ..ListZonesParams::default()
            },
        };

        let zones = self
            .request::<Vec<Zone>>(&auth.credentials, &endpoint)
            .await?
            .result;
        Ok(zones
            .into_iter()
            .find(|zone| zone.name == zone_name)
            .map(|zone| zone.id))
    }

    async fn list_dns_records(
        &self,
        auth: &Auth,
        zone_id: &str,
        record_type: &str,
        name: &str,
    ) -> Result<Vec<DnsRecord>, ApiFailure> {
        let endpoint = ListDnsRecords {
            zone_identifier: zone_id,
            params: ListDnsRecordsParams {
                name: Some(name.to_owned()),
                ..ListDnsRecordsParams::default()
            },
        };

        // The typed params can only filter on type together with content.
        let records = self
            .request::<Vec<DnsRecord>>(&auth.credentials, &endpoint)
            .await?
            .result;
        Ok(records
            .into_iter()
            .filter(|record| self::record_type(&record.content) == record_type)
            .collect())
    }

    async fn create_dns_record(
        &self,
        auth: &Auth,
        zone_id: &str,
        params: CreateDnsRecordParams<'_>,
    ) -> Result<DnsRecord, ApiFailure> {
        let endpoint = CreateDnsRecord {
            zone_identifier: zone_id,
            params,
        };

        match self.request::<DnsRecord>(&auth.credentials, &endpoint).await {
            Ok(result) => Ok(result.result),
            Err(err) => Err(err),
        }
    }
}
