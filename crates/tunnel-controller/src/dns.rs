use crate::provider::{Auth, CloudflareApi};
use crate::Error;
use cloudflare::endpoints::dns::{CreateDnsRecordParams, DnsContent};
use tracing::{debug, info};

/// Every tunnel is reachable at `<tunnel id>` under this domain.
pub const CNAME_SUFFIX: &str = ".cfargotunnel.com";
const CNAME: &str = "CNAME";
// Cloudflare reads a ttl of 1 as automatic.
const AUTOMATIC_TTL: u32 = 1;

pub fn cname_target(tunnel_id: &str) -> String {
    format!("{}{}", tunnel_id, CNAME_SUFFIX)
}

/// Proxied CNAME from `domain` to the tunnel, with automatic ttl.
fn cname_params<'a>(domain: &'a str, tunnel_id: &str) -> CreateDnsRecordParams<'a> {
    CreateDnsRecordParams {
        ttl: Some(AUTOMATIC_TTL),
        priority: None,
        proxied: Some(true),
        name: domain,
        content: DnsContent::CNAME {
            content: cname_target(tunnel_id),
        },
    }
}

/// Makes sure a CNAME named `domain` exists in `zone`. An existing record is
/// left alone whatever it points at.
pub async fn ensure_cname(
    cloudflare: &dyn CloudflareApi,
    auth: &Auth,
    zone: &str,
    domain: &str,
    tunnel_id: &str,
) -> Result<(), Error> {
    let zone_not_found = |reason: String| Error::ZoneNotFound {
        zone: zone.to_owned(),
        reason,
    };
    let zone_id = cloudflare
        .resolve_zone_id(auth, zone)
        .await
        .map_err(|err| zone_not_found(err.to_string()))?
        .ok_or_else(|| zone_not_found("no zone with that name on the account".to_owned()))?;

    let records = cloudflare
        .list_dns_records(auth, &zone_id, CNAME, domain)
        .await?;
    if !records.is_empty() {
        debug!(domain, "DNS record exists");
        return Ok(());
    }

    info!(domain, tunnel_id, "DNS record doesn't exist, creating");
    cloudflare
        .create_dns_record(auth, &zone_id, cname_params(domain, tunnel_id))
        .await?;
    Ok(())
}
