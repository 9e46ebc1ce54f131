use crate::http::Method;
use crate::RemoteError;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Per-request JWT claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Request descriptor: `<METHOD>\<path>`.
    pub rqs: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ClaimsMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
}

impl Claims {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            iat: chrono::Utc::now().timestamp(),
            rqs: format!("{}\\{path}", method.as_str()),
            metadata: None,
        }
    }

    #[must_use]
    pub fn with_object(mut self, name: &str) -> Self {
        self.metadata.get_or_insert_with(ClaimsMetadata::default).oid = Some(name.to_owned());
        self
    }

    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.metadata.get_or_insert_with(ClaimsMetadata::default).force = Some(force);
        self
    }
}

/// Issues RS512 tokens with a private key loaded once.
pub struct Signer {
    key: EncodingKey,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    /// Parse a PEM-encoded RSA private key (PKCS#8 or PKCS#1).
    pub fn from_pem(pem: &[u8]) -> Result<Self, RemoteError> {
        let key = EncodingKey::from_rsa_pem(pem)
            .map_err(|e| RemoteError::Signing(format!("invalid RSA private key: {e}")))?;
        Ok(Self { key })
    }

    pub fn from_file(path: &Path) -> Result<Self, RemoteError> {
        let pem = std::fs::read(path).map_err(|e| {
            RemoteError::Signing(format!("cannot read private key {}: {e}", path.display()))
        })?;
        debug!("loaded private key from {}", path.display());
        Self::from_pem(&pem)
    }

    pub fn token(&self, claims: &Claims) -> Result<String, RemoteError> {
        encode(&Header::new(Algorithm::RS512), claims, &self.key)
            .map_err(|e| RemoteError::Signing(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};

    const PRIVATE_KEY: &[u8] = include_bytes!("../tests/fixtures/test_key.pem");
    const PUBLIC_KEY: &[u8] = include_bytes!("../tests/fixtures/test_key.pub.pem");
    const MALFORMED_KEY: &[u8] = include_bytes!("../tests/fixtures/malformed_key.pem");

    fn verify(token: &str) -> Claims {
        let mut validation = Validation::new(Algorithm::RS512);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        let key = DecodingKey::from_rsa_pem(PUBLIC_KEY).unwrap();
        decode::<Claims>(token, &key, &validation).unwrap().claims
    }

    #[test]
    fn put_token_carries_rs512_and_object_claims() {
        let signer = Signer::from_pem(PRIVATE_KEY).unwrap();
        let path = "/tenants/t/domains/d/buckets/b/objects";
        let token = signer
            .token(&Claims::new(Method::Post, path).with_object("a.jpg"))
            .unwrap();

        assert_eq!(decode_header(&token).unwrap().alg, Algorithm::RS512);
        let claims = verify(&token);
        assert_eq!(claims.rqs, format!("POST\\{path}"));
        assert_eq!(
            claims.metadata.and_then(|m| m.oid).as_deref(),
            Some("a.jpg")
        );
        let skew = (chrono::Utc::now().timestamp() - claims.iat).abs();
        assert!(skew <= 5, "iat skew {skew}s");
    }

    #[test]
    fn delete_token_carries_force() {
        let signer = Signer::from_pem(PRIVATE_KEY).unwrap();
        let claims = Claims::new(Method::Delete, "/x/a.jpg")
            .with_object("a.jpg")
            .with_force(true);
        let decoded = verify(&signer.token(&claims).unwrap());
        let meta = decoded.metadata.unwrap();
        assert_eq!(meta.oid.as_deref(), Some("a.jpg"));
        assert_eq!(meta.force, Some(true));
    }

    #[test]
    fn list_token_has_no_metadata() {
        let claims = Claims::new(Method::Get, "/objects");
        let json = serde_json::to_value(&claims).unwrap();
        assert!(json.get("metadata").is_none());
        assert_eq!(json["rqs"], "GET\\/objects");
    }

    #[test]
    fn malformed_key_is_rejected_at_construction() {
        let err = Signer::from_pem(MALFORMED_KEY).unwrap_err();
        assert!(matches!(err, RemoteError::Signing(_)));
    }

    #[test]
    fn missing_key_file_is_signing_error() {
        let err = Signer::from_file(Path::new("/nonexistent/key.pem")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/key.pem"));
    }
}
