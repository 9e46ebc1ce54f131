use crate::breaker::{BreakerError, CircuitBreaker};
use crate::{RemoteConfig, RemoteError};
use std::fs::File;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};
use ureq::RequestBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
    Head,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
pub enum Body {
    #[default]
    Empty,
    Json(Vec<u8>),
    /// Raw bytes streamed from an open file.
    File { file: File, content_type: String },
}

/// One outgoing call, built fluently and consumed by [`HttpTransport::send`].
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Body,
    timeout: Option<Duration>,
}

impl Request {
    /// `path` is appended to the transport's base URL.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Body::Empty,
            timeout: None,
        }
    }

    #[must_use]
    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_owned(), value.to_owned()));
        self
    }

    #[must_use]
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_owned(), value.to_owned()));
        self
    }

    pub fn json<T: serde::Serialize>(mut self, value: &T) -> Result<Self, RemoteError> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| RemoteError::Internal(e.to_string()))?;
        self.body = Body::Json(bytes);
        Ok(self)
    }

    #[must_use]
    pub fn file(mut self, file: File, content_type: &str) -> Self {
        self.body = Body::File {
            file,
            content_type: content_type.to_owned(),
        };
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{method} {path}: {message}")]
    Connection {
        method: Method,
        path: String,
        message: String,
    },
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Blocking HTTP client guarded by a per-instance [`CircuitBreaker`].
pub struct HttpTransport {
    base_url: String,
    agent: ureq::Agent,
    breaker: CircuitBreaker,
    retry_interval: Duration,
}

impl HttpTransport {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let mut builder = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(config.timeout));
        if let Some(ref proxy) = config.socks5_proxy {
            let uri = if proxy.contains("://") {
                proxy.clone()
            } else {
                format!("socks5://{proxy}")
            };
            let proxy = ureq::Proxy::new(&uri)
                .map_err(|e| RemoteError::Config(format!("invalid SOCKS5 proxy '{uri}': {e}")))?;
            builder = builder.proxy(Some(proxy));
            debug!("dialing through SOCKS5 proxy {uri}");
        }

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_owned(),
            agent: ureq::Agent::new_with_config(builder.build()),
            breaker: CircuitBreaker::new(config.breaker.clone()),
            retry_interval: config.retry_interval,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Send through the breaker, waiting while it rejects calls.
    ///
    /// Connection failures and statuses 400 and 500 count as breaker
    /// failures and come back as errors. Every other status is a response.
    pub fn send(&self, request: Request) -> Result<Response, TransportError> {
        let permit = loop {
            match self.breaker.acquire() {
                Ok(permit) => break permit,
                Err(e @ (BreakerError::Open | BreakerError::TooMany)) => {
                    trace!(
                        "{} {}: {e}, retrying in {:?}",
                        request.method,
                        request.path,
                        self.retry_interval
                    );
                    std::thread::sleep(self.retry_interval);
                }
            }
        };

        match self.dispatch(request) {
            Ok(resp) if matches!(resp.status, 400 | 500) => {
                permit.failure();
                Err(TransportError::Status {
                    status: resp.status,
                    body: resp.text(),
                })
            }
            Ok(resp) => {
                permit.success();
                Ok(resp)
            }
            Err(e) => {
                permit.failure();
                Err(e)
            }
        }
    }

    fn dispatch(&self, request: Request) -> Result<Response, TransportError> {
        let Request {
            method,
            path,
            query,
            headers,
            body,
            timeout,
        } = request;
        let url = format!("{}{path}", self.base_url);
        debug!("{method} {url}");

        let result = match method {
            Method::Post => send_body(prepare(self.agent.post(&url), &query, &headers, timeout), body),
            Method::Get => send_plain(prepare(self.agent.get(&url), &query, &headers, timeout), body),
            Method::Delete => {
                send_plain(prepare(self.agent.delete(&url), &query, &headers, timeout), body)
            }
            Method::Head => send_plain(prepare(self.agent.head(&url), &query, &headers, timeout), body),
        };

        let mut resp = result.map_err(|e| TransportError::Connection {
            method,
            path: path.clone(),
            message: e.to_string(),
        })?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_owned(), v.to_owned())))
            .collect();
        let body = if method == Method::Head {
            Vec::new()
        } else {
            resp.body_mut()
                .read_to_vec()
                .map_err(|e| TransportError::Connection {
                    method,
                    path: path.clone(),
                    message: e.to_string(),
                })?
        };
        trace!("{method} {path} -> {status} ({} bytes)", body.len());

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

fn prepare<B>(
    mut builder: RequestBuilder<B>,
    query: &[(String, String)],
    headers: &[(String, String)],
    timeout: Option<Duration>,
) -> RequestBuilder<B> {
    for (k, v) in query {
        builder = builder.query(k, v);
    }
    for (k, v) in headers {
        builder = builder.header(k.as_str(), v.as_str());
    }
    if let Some(timeout) = timeout {
        builder = builder.config().timeout_global(Some(timeout)).build();
    }
    builder
}

fn send_body(
    builder: RequestBuilder<ureq::typestate::WithBody>,
    body: Body,
) -> Result<ureq::http::Response<ureq::Body>, ureq::Error> {
    match body {
        Body::Empty => builder.send_empty(),
        Body::Json(bytes) => builder
            .header("Content-Type", "application/json")
            .send(&bytes[..]),
        Body::File { file, content_type } => {
            builder.header("Content-Type", content_type.as_str()).send(file)
        }
    }
}

fn send_plain(
    builder: RequestBuilder<ureq::typestate::WithoutBody>,
    body: Body,
) -> Result<ureq::http::Response<ureq::Body>, ureq::Error> {
    match body {
        Body::Empty => builder.call(),
        body => send_body(builder.force_send_body(), body),
    }
}
