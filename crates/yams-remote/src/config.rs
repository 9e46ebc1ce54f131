use crate::breaker::BreakerConfig;
use crate::RemoteError;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Bytes escaped in an object-name path segment: all but RFC 3986 unreserved.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub const DEFAULT_MAX_CONCURRENCY: usize = 8;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 250;

/// Source of configuration values, usually the process environment.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Management API base, e.g. `https://mgmt.example.com/api/v1`.
    pub url: String,
    pub access_key_id: String,
    pub tenant_id: String,
    pub domain_id: String,
    pub bucket_id: String,
    pub private_key_path: PathBuf,
    pub max_concurrency: usize,
    pub timeout: Duration,
    /// `host:port` of a SOCKS5 proxy to dial through.
    pub socks5_proxy: Option<String>,
    pub breaker: BreakerConfig,
    /// Pause between attempts rejected by an open breaker.
    pub retry_interval: Duration,
}

impl RemoteConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            access_key_id: String::new(),
            tenant_id: String::new(),
            domain_id: String::new(),
            bucket_id: String::new(),
            private_key_path: PathBuf::new(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            socks5_proxy: None,
            breaker: BreakerConfig::default(),
            retry_interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
        }
    }

    #[must_use]
    pub fn with_bucket(mut self, tenant: &str, domain: &str, bucket: &str) -> Self {
        tenant.clone_into(&mut self.tenant_id);
        domain.clone_into(&mut self.domain_id);
        bucket.clone_into(&mut self.bucket_id);
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, access_key_id: &str, private_key_path: PathBuf) -> Self {
        access_key_id.clone_into(&mut self.access_key_id);
        self.private_key_path = private_key_path;
        self
    }

    /// Load from `YAMS_*` environment variables.
    pub fn from_env() -> Result<Self, RemoteError> {
        Self::from_lookup(&|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, RemoteError> {
        let defaults = BreakerConfig::default();
        let breaker = BreakerConfig {
            name: "yams".to_owned(),
            max_consecutive_failures: parse_var(
                lookup,
                "YAMS_CB_MAX_CONSECUTIVE_FAILURES",
                defaults.max_consecutive_failures,
            )?,
            max_failure_ratio: parse_var(
                lookup,
                "YAMS_CB_MAX_FAILURE_RATIO",
                defaults.max_failure_ratio,
            )?,
            min_requests: parse_var(lookup, "YAMS_CB_MIN_REQUESTS", defaults.min_requests)?,
            open_timeout: Duration::from_secs(parse_var(
                lookup,
                "YAMS_CB_OPEN_TIMEOUT",
                defaults.open_timeout.as_secs(),
            )?),
            counter_reset_interval: Duration::from_secs(parse_var(
                lookup,
                "YAMS_CB_RESET_INTERVAL",
                defaults.counter_reset_interval.as_secs(),
            )?),
        };
        breaker.validate()?;

        let mut config = Self::new(&required_var(lookup, "YAMS_MGMT_URL")?)
            .with_bucket(
                &required_var(lookup, "YAMS_TENANT_ID")?,
                &required_var(lookup, "YAMS_DOMAIN_ID")?,
                &required_var(lookup, "YAMS_BUCKET_ID")?,
            )
            .with_credentials(
                &required_var(lookup, "YAMS_ACCESS_KEY_ID")?,
                PathBuf::from(required_var(lookup, "YAMS_PRIVATE_KEY")?),
            );
        config.max_concurrency =
            parse_var(lookup, "YAMS_MAX_CONCURRENCY", DEFAULT_MAX_CONCURRENCY)?.max(1);
        config.timeout = Duration::from_secs(parse_var(
            lookup,
            "YAMS_TIMEOUT",
            DEFAULT_TIMEOUT_SECS,
        )?);
        config.socks5_proxy = lookup_var(lookup, "YAMS_SOCKS5_PROXY")?
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty());
        config.retry_interval = Duration::from_millis(parse_var(
            lookup,
            "YAMS_CB_RETRY_INTERVAL_MS",
            DEFAULT_RETRY_INTERVAL_MS,
        )?);
        config.breaker = breaker;
        Ok(config)
    }

    /// Path of the bucket's object collection, relative to [`url`](Self::url).
    pub fn objects_path(&self) -> String {
        format!(
            "/tenants/{}/domains/{}/buckets/{}/objects",
            self.tenant_id, self.domain_id, self.bucket_id
        )
    }

    /// Unescaped object path, as named in the token's `rqs` claim.
    pub fn object_path(&self, name: &str) -> String {
        format!("{}/{name}", self.objects_path())
    }

    /// Object path with the name percent-encoded, for the request URL.
    pub fn object_url_path(&self, name: &str) -> String {
        format!(
            "{}/{}",
            self.objects_path(),
            utf8_percent_encode(name, PATH_SEGMENT)
        )
    }
}

/// Resolve `name`, falling back to reading the file named by `<name>_FILE`.
///
/// The file content is returned verbatim.
pub fn lookup_var(lookup: Lookup<'_>, name: &str) -> Result<Option<String>, RemoteError> {
    if let Some(value) = lookup(name) {
        return Ok(Some(value));
    }
    let file_var = format!("{name}_FILE");
    match lookup(&file_var) {
        Some(path) => std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| RemoteError::Config(format!("{file_var}: cannot read '{path}': {e}"))),
        None => Ok(None),
    }
}

/// Like [`lookup_var`] but fails when unset or blank. The value is trimmed.
pub fn required_var(lookup: Lookup<'_>, name: &str) -> Result<String, RemoteError> {
    match lookup_var(lookup, name)? {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_owned()),
        _ => Err(RemoteError::Config(format!("{name} must be set"))),
    }
}

/// Parse an optional variable, using `default` when unset.
pub fn parse_var<T: FromStr>(lookup: Lookup<'_>, name: &str, default: T) -> Result<T, RemoteError> {
    match lookup_var(lookup, name)? {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| RemoteError::Config(format!("{name}: invalid value '{}'", value.trim()))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn base_env() -> HashMap<String, String> {
        env(&[
            ("YAMS_MGMT_URL", "https://mgmt.example.com/api/v1/"),
            ("YAMS_ACCESS_KEY_ID", "AK1"),
            ("YAMS_TENANT_ID", "t1"),
            ("YAMS_DOMAIN_ID", "d1"),
            ("YAMS_BUCKET_ID", "b1"),
            ("YAMS_PRIVATE_KEY", "/keys/yams.pem"),
        ])
    }

    #[test]
    fn from_lookup_reads_required_and_defaults() {
        let vars = base_env();
        let config = RemoteConfig::from_lookup(&|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.url, "https://mgmt.example.com/api/v1");
        assert_eq!(config.access_key_id, "AK1");
        assert_eq!(config.private_key_path, PathBuf::from("/keys/yams.pem"));
        assert_eq!(config.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.socks5_proxy.is_none());
        assert_eq!(
            config.objects_path(),
            "/tenants/t1/domains/d1/buckets/b1/objects"
        );
        assert_eq!(
            config.object_path("a.jpg"),
            "/tenants/t1/domains/d1/buckets/b1/objects/a.jpg"
        );
        assert_eq!(
            config.object_url_path("a.jpg"),
            "/tenants/t1/domains/d1/buckets/b1/objects/a.jpg"
        );
    }

    #[test]
    fn object_url_path_escapes_reserved_characters() {
        let config = RemoteConfig::new("http://h/api/v1").with_bucket("t", "d", "b");
        assert_eq!(
            config.object_url_path("ab#1.jpg"),
            "/tenants/t/domains/d/buckets/b/objects/ab%231.jpg"
        );
        assert_eq!(
            config.object_url_path("ab?x y.jpg"),
            "/tenants/t/domains/d/buckets/b/objects/ab%3Fx%20y.jpg"
        );
        assert_eq!(
            config.object_path("ab#1.jpg"),
            "/tenants/t/domains/d/buckets/b/objects/ab#1.jpg"
        );
    }

    #[test]
    fn from_lookup_reports_missing_variable() {
        let mut vars = base_env();
        vars.remove("YAMS_BUCKET_ID");
        let err = RemoteConfig::from_lookup(&|k| vars.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("YAMS_BUCKET_ID"));
    }

    #[test]
    fn from_lookup_rejects_bad_numbers() {
        let mut vars = base_env();
        vars.insert("YAMS_TIMEOUT".to_owned(), "soon".to_owned());
        let err = RemoteConfig::from_lookup(&|k| vars.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("YAMS_TIMEOUT"));
    }

    #[test]
    fn from_lookup_rejects_out_of_range_ratio() {
        let mut vars = base_env();
        vars.insert("YAMS_CB_MAX_FAILURE_RATIO".to_owned(), "1.5".to_owned());
        assert!(RemoteConfig::from_lookup(&|k| vars.get(k).cloned()).is_err());
    }

    #[test]
    fn file_variant_is_read_when_plain_is_unset() {
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("access_key");
        std::fs::write(&secret, "AK-from-file\n").unwrap();

        let mut vars = base_env();
        vars.remove("YAMS_ACCESS_KEY_ID");
        vars.insert(
            "YAMS_ACCESS_KEY_ID_FILE".to_owned(),
            secret.display().to_string(),
        );
        let lookup = |k: &str| vars.get(k).cloned();
        assert_eq!(
            lookup_var(&lookup, "YAMS_ACCESS_KEY_ID").unwrap().as_deref(),
            Some("AK-from-file\n")
        );
        let config = RemoteConfig::from_lookup(&lookup).unwrap();
        assert_eq!(config.access_key_id, "AK-from-file");
    }

    #[test]
    fn plain_variable_wins_over_file() {
        let vars = env(&[("X", "plain"), ("X_FILE", "/does/not/exist")]);
        let lookup = |k: &str| vars.get(k).cloned();
        assert_eq!(lookup_var(&lookup, "X").unwrap().as_deref(), Some("plain"));
    }

    #[test]
    fn unreadable_file_is_config_error() {
        let vars = env(&[("X_FILE", "/does/not/exist")]);
        let lookup = |k: &str| vars.get(k).cloned();
        assert!(matches!(
            lookup_var(&lookup, "X"),
            Err(RemoteError::Config(_))
        ));
    }

    #[test]
    fn socks5_proxy_and_tuning_are_parsed() {
        let mut vars = base_env();
        vars.insert("YAMS_SOCKS5_PROXY".to_owned(), "127.0.0.1:1080".to_owned());
        vars.insert("YAMS_MAX_CONCURRENCY".to_owned(), "0".to_owned());
        vars.insert("YAMS_CB_OPEN_TIMEOUT".to_owned(), "3".to_owned());
        let config = RemoteConfig::from_lookup(&|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.socks5_proxy.as_deref(), Some("127.0.0.1:1080"));
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.breaker.open_timeout, Duration::from_secs(3));
    }
}
