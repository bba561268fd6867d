//! Test doubles for the Kubernetes api server and the Cloudflare api.

use crate::crd::tunnel::{CloudflareTunnel, CloudflareTunnelSpec, ServiceRef};
use crate::provider::{record_type, Auth, CloudflareApi, TunnelFilter};
use crate::reconcile::DesiredState;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cloudflare::{
    endpoints::{
        cfd_tunnel::Tunnel,
        dns::{CreateDnsRecordParams, DnsContent, DnsRecord},
    },
    framework::{
        auth::Credentials,
        response::{ApiErrors, ApiFailure},
    },
};
use http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use kube::client::Body;
use kube::Client;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Option<Value>,
}

/// A tiny in-memory api server: objects are stored by their full path, POST
/// stores under `<collection>/<metadata.name>`, PUT replaces, and every request
/// is recorded for later assertions.
#[derive(Clone, Default)]
pub struct MockService {
    objects: Arc<Mutex<HashMap<String, Value>>>,
    failures: Arc<Mutex<HashMap<(String, String), (StatusCode, String)>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object served by GET on the exact path
    pub fn with_object(self, path: &str, object: Value) -> Self {
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), object);
        self
    }

    /// Answer `method` on the exact path with an error status instead of
    /// serving it.
    pub fn with_failure(self, method: &str, path: &str, status: StatusCode, reason: &str) -> Self {
        self.failures.lock().unwrap().insert(
            (method.to_string(), path.to_string()),
            (status, reason.to_string()),
        );
        self
    }

    pub fn into_client(self) -> Client {
        Client::new(self, "default")
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, method: &str, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|req| req.method == method && req.path == path)
            .collect()
    }

    pub fn object(&self, path: &str) -> Option<Value> {
        self.objects.lock().unwrap().get(path).cloned()
    }

    fn handle(&self, method: &str, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let failure = self
            .failures
            .lock()
            .unwrap()
            .get(&(method.to_string(), path.to_string()))
            .cloned();
        if let Some((status, reason)) = failure {
            return (status, status_json(status.as_u16(), &reason, path));
        }

        let mut objects = self.objects.lock().unwrap();
        match (method, body) {
            ("GET", _) => match objects.get(path) {
                Some(object) => (StatusCode::OK, object.clone()),
                None => (StatusCode::NOT_FOUND, not_found_json(path)),
            },
            ("POST", Some(body)) => {
                let name = body["metadata"]["name"].as_str().unwrap_or_default();
                let key = format!("{}/{}", path, name);
                if objects.contains_key(&key) {
                    return (StatusCode::CONFLICT, status_json(409, "AlreadyExists", &key));
                }
                objects.insert(key, body.clone());
                (StatusCode::CREATED, body)
            }
            // Replacing the main resource keeps whatever status the server holds.
            ("PUT", Some(mut body)) => {
                let Some(stored) = objects.get(path) else {
                    return (StatusCode::NOT_FOUND, not_found_json(path));
                };
                if let Some(status) = stored.get("status").cloned() {
                    body["status"] = status;
                }
                objects.insert(path.to_string(), body.clone());
                (StatusCode::OK, body)
            }
            // Merge patches are acknowledged with the stored object unchanged.
            ("PATCH", _) => {
                let target = path.strip_suffix("/status").unwrap_or(path);
                match objects.get(target) {
                    Some(object) => (StatusCode::OK, object.clone()),
                    None => (StatusCode::NOT_FOUND, not_found_json(path)),
                }
            }
            _ => (
                StatusCode::METHOD_NOT_ALLOWED,
                status_json(405, "MethodNotAllowed", path),
            ),
        }
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let service = self.clone();

        Box::pin(async move {
            let bytes = req
                .into_body()
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_default();
            let body: Option<Value> = serde_json::from_slice(&bytes).ok();

            service.requests.lock().unwrap().push(RecordedRequest {
                method: method.clone(),
                path: path.clone(),
                body: body.clone(),
            });

            let (status, response) = service.handle(&method, &path, body);
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(response.to_string().into_bytes()))
                .unwrap())
        })
    }
}

fn status_json(code: u16, reason: &str, path: &str) -> Value {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": format!("{} {}", reason, path),
        "reason": reason,
        "code": code
    })
}

pub fn not_found_json(path: &str) -> Value {
    status_json(404, "NotFound", path)
}

pub fn secret_json(name: &str, namespace: &str, data: &[(&str, &str)]) -> Value {
    let data: serde_json::Map<String, Value> = data
        .iter()
        .map(|(key, value)| (key.to_string(), Value::String(STANDARD.encode(value))))
        .collect();

    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": { "name": name, "namespace": namespace },
        "data": data
    })
}

pub fn cluster_ip_service_json(name: &str, namespace: &str, ports: &[i32]) -> Value {
    let ports: Vec<Value> = ports.iter().map(|port| json!({ "port": port })).collect();

    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": name, "namespace": namespace },
        "spec": { "type": "ClusterIP", "ports": ports }
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum CloudflareCall {
    ListTunnels {
        name: String,
        tunnel_id: Option<String>,
    },
    CreateTunnel {
        name: String,
        tunnel_secret: String,
    },
    GetTunnelToken(String),
    ResolveZoneId(String),
    ListDnsRecords {
        zone_id: String,
        record_type: String,
        name: String,
    },
    CreateDnsRecord {
        zone_id: String,
        record_type: String,
        name: String,
        content: String,
        ttl: Option<u32>,
        proxied: Option<bool>,
    },
}

/// Operations `FakeCloudflare` can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudflareOp {
    ListTunnels,
    CreateTunnel,
    GetTunnelToken,
    ResolveZoneId,
    ListDnsRecords,
    CreateDnsRecord,
}

struct FakeRecord {
    zone_id: String,
    name: String,
    content: DnsContent,
    proxied: bool,
}

#[derive(Default)]
struct FakeState {
    tunnels: Vec<(Tunnel, String)>,
    zones: HashMap<String, String>,
    records: Vec<FakeRecord>,
    failing: HashSet<CloudflareOp>,
    calls: Vec<CloudflareCall>,
}

fn content_value(content: &DnsContent) -> String {
    match content {
        DnsContent::A { content } => content.to_string(),
        DnsContent::AAAA { content } => content.to_string(),
        DnsContent::CNAME { content }
        | DnsContent::NS { content }
        | DnsContent::MX { content, .. }
        | DnsContent::TXT { content }
        | DnsContent::SRV { content } => content.clone(),
    }
}

fn new_tunnel(name: &str) -> Tunnel {
    serde_json::from_value(json!({
        "id": Uuid::new_v4(),
        "name": name,
        "created_at": "2024-12-01T10:00:00Z",
        "deleted_at": null,
        "connections": [],
        "metadata": {}
    }))
    .unwrap()
}

impl FakeRecord {
    /// The record as the list and create endpoints return it.
    fn to_dns_record(&self) -> DnsRecord {
        let mut record = json!({
            "meta": { "auto_added": false },
            "id": Uuid::new_v4().to_string(),
            "name": self.name,
            "ttl": 1,
            "zone_id": self.zone_id,
            "zone_name": "",
            "created_on": "2024-12-01T10:00:00Z",
            "modified_on": "2024-12-01T10:00:00Z",
            "proxiable": true,
            "proxied": self.proxied,
        });
        if let (Some(record), Value::Object(content)) = (
            record.as_object_mut(),
            serde_json::to_value(&self.content).unwrap(),
        ) {
            record.extend(content);
        }
        serde_json::from_value(record).unwrap()
    }
}

/// In-memory Cloudflare account.
#[derive(Clone, Default)]
pub struct FakeCloudflare {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCloudflare {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tunnel(self, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .tunnels
            .push((new_tunnel(name), STANDARD.encode([7u8; 32])));
        self
    }

    pub fn with_zone(self, name: &str, id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .zones
            .insert(name.to_owned(), id.to_owned());
        self
    }

    pub fn with_cname(self, zone_id: &str, name: &str, content: &str) -> Self {
        let record = FakeRecord {
            zone_id: zone_id.to_owned(),
            name: name.to_owned(),
            content: DnsContent::CNAME {
                content: content.to_owned(),
            },
            proxied: true,
        };
        self.state.lock().unwrap().records.push(record);
        self
    }

    /// Every call of `op` answers with a 500 from now on.
    pub fn with_failure(self, op: CloudflareOp) -> Self {
        self.state.lock().unwrap().failing.insert(op);
        self
    }

    pub fn calls(&self) -> Vec<CloudflareCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn tunnel_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .tunnels
            .iter()
            .map(|(tunnel, _)| tunnel.id.to_string())
            .collect()
    }

    pub fn creates(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    CloudflareCall::CreateTunnel { .. } | CloudflareCall::CreateDnsRecord { .. }
                )
            })
            .count()
    }

    fn record(&self, call: CloudflareCall, op: CloudflareOp) -> Result<(), ApiFailure> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.failing.contains(&op) {
            return Err(ApiFailure::Error(
                reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                ApiErrors::default(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CloudflareApi for FakeCloudflare {
    async fn list_tunnels(
        &self,
        _auth: &Auth,
        filter: TunnelFilter<'_>,
    ) -> Result<Vec<Tunnel>, ApiFailure> {
        self.record(
            CloudflareCall::ListTunnels {
                name: filter.name.to_owned(),
                tunnel_id: filter.tunnel_id.map(str::to_owned),
            },
            CloudflareOp::ListTunnels,
        )?;

        let state = self.state.lock().unwrap();
        Ok(state
            .tunnels
            .iter()
            .map(|(tunnel, _)| tunnel)
            .filter(|tunnel| tunnel.name == filter.name)
            .filter(|tunnel| tunnel.deleted_at.is_some() == filter.is_deleted)
            .filter(|tunnel| {
                filter
                    .tunnel_id
                    .map_or(true, |id| tunnel.id.to_string() == id)
            })
            .cloned()
            .collect())
    }

    async fn create_tunnel(
        &self,
        _auth: &Auth,
        name: &str,
        tunnel_secret: &[u8],
    ) -> Result<Tunnel, ApiFailure> {
        let tunnel_secret = STANDARD.encode(tunnel_secret);
        self.record(
            CloudflareCall::CreateTunnel {
                name: name.to_owned(),
                tunnel_secret: tunnel_secret.clone(),
            },
            CloudflareOp::CreateTunnel,
        )?;

        let tunnel = new_tunnel(name);
        self.state
            .lock()
            .unwrap()
            .tunnels
            .push((tunnel.clone(), tunnel_secret));
        Ok(tunnel)
    }

    async fn get_tunnel_token(&self, auth: &Auth, tunnel_id: &str) -> Result<String, ApiFailure> {
        self.record(
            CloudflareCall::GetTunnelToken(tunnel_id.to_owned()),
            CloudflareOp::GetTunnelToken,
        )?;

        let state = self.state.lock().unwrap();
        let (_, secret) = state
            .tunnels
            .iter()
            .find(|(tunnel, _)| tunnel.id.to_string() == tunnel_id)
            .ok_or_else(|| {
                ApiFailure::Error(reqwest::StatusCode::NOT_FOUND, ApiErrors::default())
            })?;

        let token = json!({ "a": auth.account_tag, "t": tunnel_id, "s": secret });
        Ok(STANDARD.encode(token.to_string()))
    }

    async fn resolve_zone_id(
        &self,
        _auth: &Auth,
        zone_name: &str,
    ) -> Result<Option<String>, ApiFailure> {
        self.record(
            CloudflareCall::ResolveZoneId(zone_name.to_owned()),
            CloudflareOp::ResolveZoneId,
        )?;
        Ok(self.state.lock().unwrap().zones.get(zone_name).cloned())
    }

    async fn list_dns_records(
        &self,
        _auth: &Auth,
        zone_id: &str,
        wanted_type: &str,
        name: &str,
    ) -> Result<Vec<DnsRecord>, ApiFailure> {
        self.record(
            CloudflareCall::ListDnsRecords {
                zone_id: zone_id.to_owned(),
                record_type: wanted_type.to_owned(),
                name: name.to_owned(),
            },
            CloudflareOp::ListDnsRecords,
        )?;

        let state = self.state.lock().unwrap();
        Ok(state
            .records
            .iter()
            .filter(|record| {
                record.zone_id == zone_id
                    && record_type(&record.content) == wanted_type
                    && record.name == name
            })
            .map(FakeRecord::to_dns_record)
            .collect())
    }

    async fn create_dns_record(
        &self,
        _auth: &Auth,
        zone_id: &str,
        params: CreateDnsRecordParams<'_>,
    ) -> Result<DnsRecord, ApiFailure> {
        self.record(
            CloudflareCall::CreateDnsRecord {
                zone_id: zone_id.to_owned(),
                record_type: record_type(&params.content).to_owned(),
                name: params.name.to_owned(),
                content: content_value(&params.content),
                ttl: params.ttl,
                proxied: params.proxied,
            },
            CloudflareOp::CreateDnsRecord,
        )?;

        let record = FakeRecord {
            zone_id: zone_id.to_owned(),
            name: params.name.to_owned(),
            content: params.content,
            proxied: params.proxied.unwrap_or_default(),
        };
        let created = record.to_dns_record();
        self.state.lock().unwrap().records.push(record);
        Ok(created)
    }
}

pub fn test_auth() -> Auth {
    Auth {
        account_tag: "account-tag".to_owned(),
        credentials: Credentials::UserAuthToken {
            token: "api-token".to_owned(),
        },
    }
}

pub fn tunnel_spec() -> CloudflareTunnelSpec {
    CloudflareTunnelSpec {
        zone: "example.com".to_owned(),
        domain: "t.example.com".to_owned(),
        service: ServiceRef {
            name: "web".to_owned(),
            namespace: None,
            port: 80,
            protocol: "http".to_owned(),
        },
        replicas: 1,
        token_secret_name: "cf-token".to_owned(),
        image: None,
    }
}

/// A stored `CloudflareTunnel` named `web` in `default`.
pub fn tunnel_resource() -> CloudflareTunnel {
    let mut tunnel = CloudflareTunnel::new("web", tunnel_spec());
    tunnel.metadata.namespace = Some("default".to_owned());
    tunnel.metadata.uid = Some("0b9a4e4c-5d1e-4e45-9d4f-3c0f1c1e2a11".to_owned());
    tunnel
}

pub fn desired_state() -> DesiredState {
    DesiredState::from_resource(&tunnel_resource()).unwrap()
}
