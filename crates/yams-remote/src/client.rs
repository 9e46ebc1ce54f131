use crate::http::{HttpTransport, Method, Request, Response, TransportError};
use crate::signer::{Claims, Signer};
use crate::{RemoteConfig, RemoteError, RemoteObject, RemoteStore, IMAGE_CONTENT_TYPE};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;
use yams_store::{Image, ImageOpener};

/// Body of `GET .../objects`. Only the first page is read; the
/// `continuation_token` field is ignored.
#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    objects: Vec<RemoteObject>,
}

/// Signed client for one YAMS bucket.
///
/// Every request carries a fresh RS512 token in the `jwt` query parameter
/// next to the configured `AccessKeyId`.
pub struct YamsClient {
    config: RemoteConfig,
    transport: HttpTransport,
    signer: Signer,
    opener: Arc<dyn ImageOpener>,
}

impl YamsClient {
    /// Load the private key named in `config` and build the transport.
    pub fn new(config: RemoteConfig, opener: Arc<dyn ImageOpener>) -> Result<Self, RemoteError> {
        let signer = Signer::from_file(&config.private_key_path)?;
        Self::with_signer(config, signer, opener)
    }

    pub fn with_signer(
        config: RemoteConfig,
        signer: Signer,
        opener: Arc<dyn ImageOpener>,
    ) -> Result<Self, RemoteError> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self {
            config,
            transport,
            signer,
            opener,
        })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    pub fn transport(&self) -> &HttpTransport {
        &self.transport
    }

    fn signed(&self, method: Method, path: String, claims: &Claims) -> Result<Request, RemoteError> {
        let token = self.signer.token(claims)?;
        Ok(Request::new(method, path)
            .query("jwt", &token)
            .query("AccessKeyId", &self.config.access_key_id)
            .timeout(self.config.timeout))
    }

    fn send(&self, request: Request) -> Result<Response, RemoteError> {
        self.transport.send(request).map_err(|e| match e {
            TransportError::Connection { .. } => RemoteError::Connection(e.to_string()),
            TransportError::Status { .. } => RemoteError::Internal(e.to_string()),
        })
    }
}

fn unexpected(op: &str, name: &str, resp: &Response) -> RemoteError {
    RemoteError::Internal(format!(
        "{op} {name}: HTTP {} {}",
        resp.status,
        resp.text().trim()
    ))
}

impl RemoteStore for YamsClient {
    fn put(&self, image: &Image) -> Result<(), RemoteError> {
        let name = image.name();
        let file = self
            .opener
            .open(name)
            .map_err(|e| RemoteError::ImageRead(e.to_string()))?;

        let path = self.config.objects_path();
        let claims = Claims::new(Method::Post, &path).with_object(name);
        let request = self
            .signed(Method::Post, path, &claims)?
            .file(file, IMAGE_CONTENT_TYPE);

        let resp = self.send(request)?;
        debug!("POST {name} -> {}", resp.status);
        match resp.status {
            403 => Err(RemoteError::Unauthorized(format!("upload {name}: {}", resp.text().trim()))),
            404 => Err(RemoteError::BucketNotFound(self.config.bucket_id.clone())),
            409 => Err(RemoteError::Duplicate(name.to_owned())),
            503 => Err(unexpected("upload", name, &resp)),
            _ => Ok(()),
        }
    }

    fn delete(&self, name: &str, force: bool) -> Result<(), RemoteError> {
        let claims = Claims::new(Method::Delete, &self.config.object_path(name))
            .with_object(name)
            .with_force(force);
        let url_path = self.config.object_url_path(name);
        let resp = self.send(self.signed(Method::Delete, url_path, &claims)?)?;
        debug!("DELETE {name} force={force} -> {}", resp.status);
        match resp.status {
            202 => Ok(()),
            403 => Err(RemoteError::Unauthorized(format!("delete {name}: {}", resp.text().trim()))),
            404 => Err(RemoteError::ObjectNotFound(name.to_owned())),
            _ => Err(unexpected("delete", name, &resp)),
        }
    }

    fn head(&self, name: &str) -> Result<String, RemoteError> {
        // oid and force only apply to PUT and DELETE.
        let claims = Claims::new(Method::Head, &self.config.object_path(name));
        let url_path = self.config.object_url_path(name);
        let resp = self.send(self.signed(Method::Head, url_path, &claims)?)?;
        debug!("HEAD {name} -> {}", resp.status);
        match resp.status {
            200 => Ok(resp.header("Content-Md5").unwrap_or_default().to_owned()),
            404 => Err(RemoteError::ObjectNotFound(name.to_owned())),
            _ => Err(unexpected("head", name, &resp)),
        }
    }

    fn list(&self) -> Result<Vec<RemoteObject>, RemoteError> {
        let path = self.config.objects_path();
        let claims = Claims::new(Method::Get, &path);
        let resp = self.send(self.signed(Method::Get, path, &claims)?)?;
        debug!("GET objects -> {}", resp.status);
        match resp.status {
            200 => {
                let listing: ListResponse = serde_json::from_slice(&resp.body).map_err(|e| {
                    RemoteError::Internal(format!("cannot decode object listing: {e}"))
                })?;
                Ok(listing.objects)
            }
            404 => Err(RemoteError::ObjectNotFound(self.config.bucket_id.clone())),
            _ => Err(unexpected("list", &self.config.bucket_id, &resp)),
        }
    }

    fn max_concurrency(&self) -> usize {
        self.config.max_concurrency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BreakerConfig, ErrorKind};
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
    use std::collections::{HashMap, VecDeque};
    use std::io::Read;
    use std::sync::Mutex;
    use std::time::Duration;
    use yams_store::LocalImageStore;

    const PRIVATE_KEY: &[u8] = include_bytes!("../tests/fixtures/test_key.pem");
    const PUBLIC_KEY: &[u8] = include_bytes!("../tests/fixtures/test_key.pub.pem");

    #[derive(Debug, Clone)]
    struct Seen {
        method: String,
        path: String,
        query: HashMap<String, String>,
        content_type: Option<String>,
        body: Vec<u8>,
    }

    type Reply = (u16, Vec<(&'static str, &'static str)>, &'static str);

    /// tiny_http server answering from a script; `200` once it runs dry.
    struct Scripted {
        url: String,
        server: Arc<tiny_http::Server>,
        seen: Arc<Mutex<Vec<Seen>>>,
    }

    impl Scripted {
        fn start(replies: Vec<Reply>) -> Self {
            let server = Arc::new(tiny_http::Server::http("127.0.0.1:0").unwrap());
            let port = server.server_addr().to_ip().unwrap().port();
            let seen = Arc::new(Mutex::new(Vec::new()));
            let replies = Arc::new(Mutex::new(VecDeque::from(replies)));

            let srv = Arc::clone(&server);
            let log = Arc::clone(&seen);
            std::thread::spawn(move || {
                for mut req in srv.incoming_requests() {
                    let mut body = Vec::new();
                    let _ = req.as_reader().read_to_end(&mut body);
                    let (path, qs) = req.url().split_once('?').unwrap_or((req.url(), ""));
                    let query = qs
                        .split('&')
                        .filter_map(|kv| kv.split_once('='))
                        .map(|(k, v)| (k.to_owned(), v.to_owned()))
                        .collect();
                    log.lock().unwrap().push(Seen {
                        method: req.method().as_str().to_owned(),
                        path: path.to_owned(),
                        query,
                        content_type: req
                            .headers()
                            .iter()
                            .find(|h| h.field.equiv("Content-Type"))
                            .map(|h| h.value.as_str().to_owned()),
                        body,
                    });

                    let (status, headers, text) = replies
                        .lock()
                        .unwrap()
                        .pop_front()
                        .unwrap_or((200, Vec::new(), ""));
                    let mut resp = tiny_http::Response::from_string(text).with_status_code(status);
                    for (k, v) in headers {
                        resp = resp.with_header(
                            tiny_http::Header::from_bytes(k.as_bytes(), v.as_bytes()).unwrap(),
                        );
                    }
                    let _ = req.respond(resp);
                }
            });

            Self {
                url: format!("http://127.0.0.1:{port}/api/v1"),
                server,
                seen,
            }
        }

        fn seen(&self) -> Vec<Seen> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Drop for Scripted {
        fn drop(&mut self) {
            self.server.unblock();
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<LocalImageStore>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("ab")).unwrap();
        std::fs::write(dir.path().join("ab/abc.jpg"), b"hello").unwrap();
        let store = Arc::new(LocalImageStore::new(dir.path()));
        Fixture { _dir: dir, store }
    }

    fn client(url: &str, store: Arc<LocalImageStore>) -> YamsClient {
        let mut config = RemoteConfig::new(url)
            .with_bucket("t1", "d1", "b1")
            .with_credentials("AK1", std::path::PathBuf::new());
        config.timeout = Duration::from_secs(5);
        config.breaker = BreakerConfig {
            min_requests: 1000,
            max_failure_ratio: 1.0,
            max_consecutive_failures: 1000,
            ..BreakerConfig::default()
        };
        YamsClient::with_signer(config, Signer::from_pem(PRIVATE_KEY).unwrap(), store).unwrap()
    }

    fn claims_of(seen: &Seen) -> Claims {
        let mut validation = Validation::new(Algorithm::RS512);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        let key = DecodingKey::from_rsa_pem(PUBLIC_KEY).unwrap();
        decode::<Claims>(&seen.query["jwt"], &key, &validation)
            .unwrap()
            .claims
    }

    #[test]
    fn put_posts_signed_image_bytes() {
        let server = Scripted::start(vec![(201, Vec::new(), "")]);
        let fx = fixture();
        let c = client(&server.url, Arc::clone(&fx.store));
        let image = fx.store.get("abc.jpg").unwrap();
        c.put(&image).unwrap();

        let seen = server.seen();
        assert_eq!(seen.len(), 1);
        let req = &seen[0];
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/api/v1/tenants/t1/domains/d1/buckets/b1/objects");
        assert_eq!(req.query["AccessKeyId"], "AK1");
        assert_eq!(req.content_type.as_deref(), Some(IMAGE_CONTENT_TYPE));
        assert_eq!(req.body, b"hello");

        let claims = claims_of(req);
        assert_eq!(
            claims.rqs,
            "POST\\/tenants/t1/domains/d1/buckets/b1/objects"
        );
        assert_eq!(
            claims.metadata.and_then(|m| m.oid).as_deref(),
            Some("abc.jpg")
        );
    }

    #[test]
    fn put_status_mapping() {
        let cases = [
            (409, Some(ErrorKind::Duplicate)),
            (403, Some(ErrorKind::Unauthorized)),
            (404, Some(ErrorKind::BucketNotFound)),
            (400, Some(ErrorKind::Internal)),
            (500, Some(ErrorKind::Internal)),
            (503, Some(ErrorKind::Internal)),
            (200, None),
            (201, None),
        ];
        let fx = fixture();
        let image = fx.store.get("abc.jpg").unwrap();
        for (status, expected) in cases {
            let server = Scripted::start(vec![(status, Vec::new(), "")]);
            let c = client(&server.url, Arc::clone(&fx.store));
            let got = c.put(&image).err().map(|e| e.kind());
            assert_eq!(got, expected, "status {status}");
        }
    }

    #[test]
    fn put_of_vanished_file_is_image_read_without_request() {
        let server = Scripted::start(vec![]);
        let fx = fixture();
        let c = client(&server.url, Arc::clone(&fx.store));
        let image = fx.store.get("abc.jpg").unwrap();
        std::fs::remove_file(&image.file_path).unwrap();

        let err = c.put(&image).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ImageRead);
        assert!(server.seen().is_empty());
    }

    #[test]
    fn delete_signs_force_and_maps_statuses() {
        let server = Scripted::start(vec![
            (202, Vec::new(), ""),
            (404, Vec::new(), ""),
            (403, Vec::new(), ""),
            (200, Vec::new(), ""),
        ]);
        let fx = fixture();
        let c = client(&server.url, fx.store);

        c.delete("abc.jpg", true).unwrap();
        assert_eq!(
            c.delete("abc.jpg", false).unwrap_err().kind(),
            ErrorKind::ObjectNotFound
        );
        assert_eq!(
            c.delete("abc.jpg", false).unwrap_err().kind(),
            ErrorKind::Unauthorized
        );
        assert_eq!(
            c.delete("abc.jpg", false).unwrap_err().kind(),
            ErrorKind::Internal
        );

        let seen = server.seen();
        assert_eq!(seen[0].method, "DELETE");
        assert_eq!(
            seen[0].path,
            "/api/v1/tenants/t1/domains/d1/buckets/b1/objects/abc.jpg"
        );
        let meta = claims_of(&seen[0]).metadata.unwrap();
        assert_eq!(meta.force, Some(true));
        assert_eq!(claims_of(&seen[1]).metadata.unwrap().force, Some(false));
    }

    #[test]
    fn head_returns_content_md5() {
        let server = Scripted::start(vec![
            (200, vec![("Content-Md5", "5d41402abc4b2a76b9719d911017c592")], ""),
            (200, Vec::new(), ""),
            (404, Vec::new(), ""),
            (503, Vec::new(), ""),
        ]);
        let fx = fixture();
        let c = client(&server.url, fx.store);

        assert_eq!(c.head("abc.jpg").unwrap(), "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(c.head("abc.jpg").unwrap(), "");
        assert_eq!(c.head("abc.jpg").unwrap_err().kind(), ErrorKind::ObjectNotFound);
        assert_eq!(c.head("abc.jpg").unwrap_err().kind(), ErrorKind::Internal);
        assert_eq!(server.seen()[0].method, "HEAD");
    }

    #[test]
    fn head_claims_carry_no_object_metadata() {
        let server = Scripted::start(vec![(200, Vec::new(), "")]);
        let fx = fixture();
        let c = client(&server.url, fx.store);
        c.head("abc.jpg").unwrap();

        let claims = claims_of(&server.seen()[0]);
        assert_eq!(
            claims.rqs,
            "HEAD\\/tenants/t1/domains/d1/buckets/b1/objects/abc.jpg"
        );
        assert!(claims.metadata.is_none());
    }

    #[test]
    fn object_names_are_escaped_in_url_but_not_in_rqs() {
        let server = Scripted::start(vec![(200, Vec::new(), ""), (202, Vec::new(), "")]);
        let fx = fixture();
        let c = client(&server.url, fx.store);
        c.head("ab#1.jpg").unwrap();
        c.delete("ab?x.jpg", true).unwrap();

        let seen = server.seen();
        assert_eq!(
            seen[0].path,
            "/api/v1/tenants/t1/domains/d1/buckets/b1/objects/ab%231.jpg"
        );
        assert_eq!(
            claims_of(&seen[0]).rqs,
            "HEAD\\/tenants/t1/domains/d1/buckets/b1/objects/ab#1.jpg"
        );
        assert_eq!(
            seen[1].path,
            "/api/v1/tenants/t1/domains/d1/buckets/b1/objects/ab%3Fx.jpg"
        );
        assert!(seen[1].query.contains_key("jwt"));
        let delete = claims_of(&seen[1]);
        assert_eq!(
            delete.rqs,
            "DELETE\\/tenants/t1/domains/d1/buckets/b1/objects/ab?x.jpg"
        );
        assert_eq!(delete.metadata.unwrap().oid.as_deref(), Some("ab?x.jpg"));
    }

    #[test]
    fn list_decodes_objects() {
        let server = Scripted::start(vec![
            (
                200,
                Vec::new(),
                r#"{"continuation_token":"","objects":[{"object_id":"abc.jpg","md5":"x","size":5,"last_modified":1}]}"#,
            ),
            (200, Vec::new(), "not json"),
            (404, Vec::new(), ""),
        ]);
        let fx = fixture();
        let c = client(&server.url, fx.store);

        let objects = c.list().unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].id, "abc.jpg");
        assert_eq!(c.list().unwrap_err().kind(), ErrorKind::Internal);
        assert_eq!(c.list().unwrap_err().kind(), ErrorKind::ObjectNotFound);

        let seen = server.seen();
        assert_eq!(seen[0].method, "GET");
        assert!(claims_of(&seen[0]).metadata.is_none());
    }

    #[test]
    fn unreachable_server_is_connection_error() {
        let fx = fixture();
        let c = client("http://127.0.0.1:1/api/v1", fx.store);
        assert_eq!(c.head("abc.jpg").unwrap_err().kind(), ErrorKind::Connection);
    }

    #[test]
    fn new_fails_on_missing_key_file() {
        let fx = fixture();
        let config = RemoteConfig::new("http://127.0.0.1:1")
            .with_credentials("AK", "/nonexistent/key.pem".into());
        let err = YamsClient::new(config, fx.store).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Signing);
    }

    #[test]
    fn max_concurrency_comes_from_config() {
        let fx = fixture();
        let mut c = client("http://127.0.0.1:1", fx.store);
        c.config.max_concurrency = 3;
        assert_eq!(c.max_concurrency(), 3);
    }
}
