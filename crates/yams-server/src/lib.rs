//! Reference YAMS object server.
//!
//! Serves one bucket under
//! `/api/v1/tenants/{t}/domains/{d}/buckets/{b}/objects[/{name}]`, keeping
//! objects in memory. Every request must carry `jwt` and `AccessKeyId` query
//! parameters. When a public key is configured the token is verified as RS512
//! and its `rqs` claim must match `<METHOD>\<path below /api/v1>`.
//!
//! The [`TestServer`] helper starts a server on a random port for integration
//! testing, and exposes the [`Bucket`] so tests can seed objects, inspect the
//! request journal and inject failure statuses.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use md5::{Digest, Md5};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, info, warn};

pub const API_PREFIX: &str = "/api/v1";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {message}")]
    Bind { addr: String, message: String },
    #[error("invalid RSA public key: {0}")]
    PublicKey(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tenant_id: String,
    pub domain_id: String,
    pub bucket_id: String,
    /// Required `AccessKeyId`; any non-empty value is accepted when unset.
    pub access_key_id: Option<String>,
    /// PEM public key used to verify request tokens.
    pub public_key: Option<Vec<u8>>,
}

impl ServerConfig {
    pub fn new(tenant: &str, domain: &str, bucket: &str) -> Self {
        Self {
            tenant_id: tenant.to_owned(),
            domain_id: domain.to_owned(),
            bucket_id: bucket.to_owned(),
            access_key_id: None,
            public_key: None,
        }
    }

    #[must_use]
    pub fn with_access_key(mut self, access_key_id: &str) -> Self {
        self.access_key_id = Some(access_key_id.to_owned());
        self
    }

    #[must_use]
    pub fn with_public_key(mut self, pem: &[u8]) -> Self {
        self.public_key = Some(pem.to_vec());
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TokenClaims {
    #[serde(default)]
    rqs: String,
    #[serde(default)]
    metadata: Option<TokenMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TokenMetadata {
    #[serde(default)]
    oid: Option<String>,
    #[serde(default)]
    force: Option<bool>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    md5: String,
    size: usize,
    last_modified: i64,
}

#[derive(Debug, Serialize)]
struct ListedObject<'a> {
    object_id: &'a str,
    md5: &'a str,
    size: usize,
    last_modified: i64,
}

#[derive(Debug, Serialize)]
struct ListBody<'a> {
    continuation_token: &'a str,
    objects: Vec<ListedObject<'a>>,
}

/// One answered request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub method: String,
    /// Object the request addressed: the path segment, or the token's `oid`
    /// for uploads.
    pub object: Option<String>,
    /// The token's `metadata.force`, when present.
    pub force: Option<bool>,
    pub status: u16,
}

impl std::fmt::Display for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.method)?;
        if let Some(object) = &self.object {
            write!(f, " {object}")?;
        }
        write!(f, " {}", self.status)
    }
}

/// A parsed object route.
#[derive(Debug, PartialEq, Eq)]
pub struct Route<'a> {
    pub tenant: &'a str,
    pub domain: &'a str,
    pub bucket: &'a str,
    pub object: Option<&'a str>,
}

/// Parse `/tenants/{t}/domains/{d}/buckets/{b}/objects[/{name}]`.
pub fn parse_route(path: &str) -> Option<Route<'_>> {
    let rest = path.strip_prefix("/tenants/")?;
    let (tenant, rest) = rest.split_once("/domains/")?;
    let (domain, rest) = rest.split_once("/buckets/")?;
    let (bucket, rest) = rest.split_once("/objects")?;
    let object = match rest {
        "" | "/" => None,
        name => Some(name.strip_prefix('/')?),
    };
    if [tenant, domain, bucket].iter().any(|s| s.is_empty() || s.contains('/')) {
        return None;
    }
    if object.is_some_and(|o| o.is_empty() || o.contains('/')) {
        return None;
    }
    Some(Route {
        tenant,
        domain,
        bucket,
        object,
    })
}

/// Path below [`API_PREFIX`] with percent-escapes decoded, as signed in `rqs`.
pub fn decode_path(url_path: &str) -> Option<String> {
    let rel = url_path.strip_prefix(API_PREFIX)?;
    Some(percent_decode_str(rel).decode_utf8_lossy().into_owned())
}

fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find_map(|(k, v)| (k == name).then_some(v))
        .filter(|v| !v.is_empty())
}

fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The single bucket a server instance serves.
pub struct Bucket {
    config: ServerConfig,
    verifier: Option<DecodingKey>,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    journal: Mutex<Vec<Call>>,
    injected: Mutex<VecDeque<u16>>,
}

impl Bucket {
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let verifier = config
            .public_key
            .as_deref()
            .map(DecodingKey::from_rsa_pem)
            .transpose()?;
        Ok(Self {
            config,
            verifier,
            objects: Mutex::new(BTreeMap::new()),
            journal: Mutex::new(Vec::new()),
            injected: Mutex::new(VecDeque::new()),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Store `data` under `name`, replacing any existing object.
    pub fn preload(&self, name: &str, data: &[u8]) {
        self.insert(name, md5_hex(data), data.len());
    }

    /// Overwrite the checksum reported for `name`. An empty value makes HEAD
    /// omit the `Content-Md5` header.
    pub fn set_md5(&self, name: &str, md5: &str) {
        if let Some(object) = lock(&self.objects).get_mut(name) {
            md5.clone_into(&mut object.md5);
        }
    }

    pub fn md5(&self, name: &str) -> Option<String> {
        lock(&self.objects).get(name).map(|o| o.md5.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.objects).contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    /// Answer the next `count` requests with `status` before routing them.
    pub fn inject(&self, status: u16, count: usize) {
        lock(&self.injected).extend(std::iter::repeat(status).take(count));
    }

    pub fn journal(&self) -> Vec<Call> {
        lock(&self.journal).clone()
    }

    /// Journal entries as `"<METHOD> <object> <status>"` strings.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.journal).iter().map(ToString::to_string).collect()
    }

    pub fn clear_journal(&self) {
        lock(&self.journal).clear();
    }

    fn insert(&self, name: &str, md5: String, size: usize) {
        lock(&self.objects).insert(
            name.to_owned(),
            StoredObject {
                md5,
                size,
                last_modified: chrono::Utc::now().timestamp(),
            },
        );
    }

    fn serves(&self, route: &Route<'_>) -> bool {
        route.tenant == self.config.tenant_id
            && route.domain == self.config.domain_id
            && route.bucket == self.config.bucket_id
    }

    fn claims(&self, token: &str, method: &Method, path: &str) -> Result<TokenClaims, String> {
        let mut validation = Validation::new(Algorithm::RS512);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        let Some(key) = &self.verifier else {
            validation.insecure_disable_signature_validation();
            return decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
                .map(|data| data.claims)
                .map_err(|e| format!("undecodable token: {e}"));
        };

        let claims = decode::<TokenClaims>(token, key, &validation)
            .map_err(|e| format!("invalid token: {e}"))?
            .claims;
        let expected = format!("{}\\{path}", method.as_str());
        if claims.rqs != expected {
            return Err(format!("rqs '{}' does not match '{expected}'", claims.rqs));
        }
        Ok(claims)
    }

    fn authorize(&self, query: &str, method: &Method, path: &str) -> Result<TokenClaims, String> {
        let access_key = query_param(query, "AccessKeyId").ok_or("missing AccessKeyId")?;
        if let Some(expected) = &self.config.access_key_id {
            if access_key != expected {
                return Err(format!("unknown AccessKeyId '{access_key}'"));
            }
        }
        let token = query_param(query, "jwt").ok_or("missing jwt")?;
        self.claims(token, method, path)
    }

    fn upload(&self, req: &mut tiny_http::Request, claims: &TokenClaims) -> (u16, Option<String>) {
        let oid = claims.metadata.as_ref().and_then(|m| m.oid.clone());
        let Some(name) = oid.filter(|n| !n.is_empty()) else {
            return (400, None);
        };
        let mut body = Vec::new();
        if let Err(e) = req.as_reader().read_to_end(&mut body) {
            warn!("POST {name}: read error: {e}");
            return (500, Some(name));
        }

        let mut objects = lock(&self.objects);
        if objects.contains_key(&name) {
            return (409, Some(name));
        }
        objects.insert(
            name.clone(),
            StoredObject {
                md5: md5_hex(&body),
                size: body.len(),
                last_modified: chrono::Utc::now().timestamp(),
            },
        );
        info!("stored {name}: {} bytes", body.len());
        (201, Some(name))
    }

    fn list_json(&self) -> String {
        let objects = lock(&self.objects);
        let body = ListBody {
            continuation_token: "",
            objects: objects
                .iter()
                .map(|(name, o)| ListedObject {
                    object_id: name,
                    md5: &o.md5,
                    size: o.size,
                    last_modified: o.last_modified,
                })
                .collect(),
        };
        serde_json::to_string(&body).unwrap_or_else(|_| r#"{"objects":[]}"#.to_owned())
    }

    fn record(&self, call: Call) {
        debug!("{call}");
        lock(&self.journal).push(call);
    }
}

fn header(name: &str, value: &str) -> Option<Header> {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).ok()
}

fn respond(req: tiny_http::Request, code: u16, body: &str) {
    let _ = req.respond(Response::from_string(body).with_status_code(StatusCode(code)));
}

fn respond_empty(req: tiny_http::Request, code: u16, headers: impl IntoIterator<Item = Header>) {
    let mut response = Response::empty(StatusCode(code));
    for h in headers {
        response.add_header(h);
    }
    let _ = req.respond(response);
}

fn respond_json(req: tiny_http::Request, json: String) {
    let mut response = Response::from_string(json);
    if let Some(h) = header("Content-Type", "application/json") {
        response.add_header(h);
    }
    let _ = req.respond(response);
}

/// Handle a single HTTP request against `bucket`.
pub fn handle_request(bucket: &Bucket, mut req: tiny_http::Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    let (path, query) = url.split_once('?').unwrap_or((url.as_str(), ""));
    let mut call = Call {
        method: method.as_str().to_owned(),
        object: None,
        force: None,
        status: 404,
    };

    let decoded = decode_path(path);
    let route = decoded
        .as_deref()
        .and_then(|rel| Some((rel, parse_route(rel)?)));
    let Some((rel, route)) = route else {
        bucket.record(call);
        respond(req, 404, "not found");
        return;
    };
    call.object = route.object.map(str::to_owned);

    let claims = match bucket.authorize(query, &method, rel) {
        Ok(claims) => claims,
        Err(reason) => {
            warn!("{method} {rel}: {reason}");
            call.status = 403;
            bucket.record(call);
            respond(req, 403, "forbidden");
            return;
        }
    };
    call.force = claims.metadata.as_ref().and_then(|m| m.force);

    if let Some(status) = lock(&bucket.injected).pop_front() {
        call.status = status;
        bucket.record(call);
        respond(req, status, "injected");
        return;
    }

    if !bucket.serves(&route) {
        bucket.record(call);
        respond(req, 404, "bucket not found");
        return;
    }

    match (&method, route.object) {
        (Method::Post, None) => {
            let (status, name) = bucket.upload(&mut req, &claims);
            call.object = name;
            call.status = status;
            bucket.record(call);
            respond(req, status, "");
        }
        (Method::Get, None) => {
            call.status = 200;
            bucket.record(call);
            respond_json(req, bucket.list_json());
        }
        (Method::Head, Some(name)) => match bucket.md5(name) {
            Some(md5) => {
                call.status = 200;
                bucket.record(call);
                let md5_header = Some(md5)
                    .filter(|m| !m.is_empty())
                    .and_then(|m| header("Content-Md5", &m));
                respond_empty(req, 200, md5_header);
            }
            None => {
                bucket.record(call);
                respond_empty(req, 404, None::<Header>);
            }
        },
        (Method::Delete, Some(name)) => {
            let removed = lock(&bucket.objects).remove(name).is_some();
            call.status = if removed { 202 } else { 404 };
            bucket.record(call.clone());
            if removed {
                info!("deleted {name} (force={})", call.force.unwrap_or(false));
            }
            respond(req, call.status, "");
        }
        _ => {
            call.status = 405;
            bucket.record(call);
            respond(req, 405, "method not allowed");
        }
    }
}

fn bind(addr: &str) -> Result<Server, ServerError> {
    Server::http(addr).map_err(|e| ServerError::Bind {
        addr: addr.to_owned(),
        message: e.to_string(),
    })
}

/// Start the server loop, blocking the current thread.
pub fn run_server(bucket: &Bucket, addr: &str) -> Result<(), ServerError> {
    let server = bind(addr)?;
    info!("serving bucket {} on {addr}", bucket.config.bucket_id);
    for request in server.incoming_requests() {
        handle_request(bucket, request);
    }
    Ok(())
}

/// A server on a random port in a background thread.
///
/// The server listens on `127.0.0.1:{port}`; [`url`](Self::url) already ends
/// in `/api/v1`. Dropping the `TestServer` stops it.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    pub bucket: Arc<Bucket>,
    server: Arc<Server>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl TestServer {
    pub fn start(config: ServerConfig) -> Result<Self, ServerError> {
        let bucket = Arc::new(Bucket::new(config)?);
        let server = Arc::new(bind("127.0.0.1:0")?);
        let port = server
            .server_addr()
            .to_ip()
            .map(|addr| addr.port())
            .ok_or_else(|| ServerError::Bind {
                addr: "127.0.0.1:0".to_owned(),
                message: "not an IP listener".to_owned(),
            })?;

        let srv = Arc::clone(&server);
        let served = Arc::clone(&bucket);
        let handle = std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                handle_request(&served, request);
            }
        });

        Ok(Self {
            url: format!("http://127.0.0.1:{port}{API_PREFIX}"),
            port,
            bucket,
            server,
            handle: Some(handle),
        })
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
