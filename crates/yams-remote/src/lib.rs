//! Remote side of yams-sync: a signed REST client for YAMS object storage.
//!
//! This crate provides the RS512 request `Signer`, a `CircuitBreaker` that
//! guards every remote call, the blocking `HttpTransport` built on `ureq`, and
//! `YamsClient`, which maps the bucket's object API onto typed operations and
//! typed errors.

pub mod breaker;
pub mod client;
pub mod config;
pub mod http;
pub mod signer;

pub use breaker::{BreakerConfig, BreakerError, BreakerState, CircuitBreaker};
pub use client::YamsClient;
pub use config::RemoteConfig;
pub use http::{HttpTransport, Method, Request, Response, TransportError};
pub use signer::{Claims, ClaimsMetadata, Signer};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use yams_store::Image;

/// Content type sent with every image upload.
pub const IMAGE_CONTENT_TYPE: &str = "images/jpg";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("object '{0}' already exists on remote")]
    Duplicate(String),
    #[error("remote internal error: {0}")]
    Internal(String),
    #[error("failed to read local image: {0}")]
    ImageRead(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("bucket not found: {0}")]
    BucketNotFound(String),
    #[error("object not found: {0}")]
    ObjectNotFound(String),
    #[error("request signing failed: {0}")]
    Signing(String),
    #[error("{0}")]
    Config(String),
}

/// Value-typed classification of a [`RemoteError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Duplicate,
    Internal,
    ImageRead,
    Connection,
    Unauthorized,
    BucketNotFound,
    ObjectNotFound,
    Signing,
    Config,
}

impl RemoteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RemoteError::Duplicate(_) => ErrorKind::Duplicate,
            RemoteError::Internal(_) => ErrorKind::Internal,
            RemoteError::ImageRead(_) => ErrorKind::ImageRead,
            RemoteError::Connection(_) => ErrorKind::Connection,
            RemoteError::Unauthorized(_) => ErrorKind::Unauthorized,
            RemoteError::BucketNotFound(_) => ErrorKind::BucketNotFound,
            RemoteError::ObjectNotFound(_) => ErrorKind::ObjectNotFound,
            RemoteError::Signing(_) => ErrorKind::Signing,
            RemoteError::Config(_) => ErrorKind::Config,
        }
    }
}

/// An object as returned by the bucket listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    #[serde(rename = "object_id")]
    pub id: String,
    #[serde(default)]
    pub md5: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub last_modified: i64,
}

/// Typed operations on one remote bucket.
pub trait RemoteStore: Send + Sync {
    /// Upload the image bytes under the image name.
    fn put(&self, image: &Image) -> Result<(), RemoteError>;

    /// Delete an object; `force` requests immediate (non-soft) removal.
    fn delete(&self, name: &str, force: bool) -> Result<(), RemoteError>;

    /// Content-MD5 of the remote object. Empty when the server omits it.
    fn head(&self, name: &str) -> Result<String, RemoteError>;

    fn list(&self) -> Result<Vec<RemoteObject>, RemoteError>;

    /// Upper bound on concurrent calls this store should receive.
    fn max_concurrency(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_compare_by_value() {
        let a = RemoteError::Duplicate("a.jpg".to_owned());
        let b = RemoteError::Duplicate("b.jpg".to_owned());
        assert_eq!(a.kind(), b.kind());
        assert_ne!(
            a.kind(),
            RemoteError::Internal("boom".to_owned()).kind()
        );
    }

    #[test]
    fn error_display_names_object() {
        let e = RemoteError::ObjectNotFound("x.png".to_owned());
        assert!(e.to_string().contains("x.png"));
    }

    #[test]
    fn remote_object_decodes_wire_names() {
        let obj: RemoteObject = serde_json::from_str(
            r#"{"object_id":"a.jpg","md5":"abc","size":5,"last_modified":1700000000}"#,
        )
        .unwrap();
        assert_eq!(obj.id, "a.jpg");
        assert_eq!(obj.size, 5);
        assert_eq!(obj.last_modified, 1_700_000_000);
    }

    #[test]
    fn remote_object_tolerates_missing_fields() {
        let obj: RemoteObject = serde_json::from_str(r#"{"object_id":"a.jpg"}"#).unwrap();
        assert!(obj.md5.is_empty());
        assert_eq!(obj.size, 0);
    }
}
