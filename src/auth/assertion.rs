//! Client assertion signing for the certificate-based credentials flow
//!
//! The client-credentials grant accepts a signed JWT in place of a shared
//! secret. Signing is kept behind the [`AssertionSigner`] trait so the
//! private key can live elsewhere (e.g. an HSM-backed signer).

use crate::error::{KeywardenError, Result};
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Assertion validity window in seconds.
const ASSERTION_LIFETIME_SECS: i64 = 600;

/// Produces a signed JWT client assertion for a given audience
/// (the token endpoint URL).
pub trait AssertionSigner: Send + Sync {
    fn sign(&self, audience: &str) -> Result<String>;
}

#[derive(Serialize)]
struct AssertionClaims {
    aud: String,
    exp: i64,
    iat: i64,
    iss: String,
    jti: String,
    nbf: i64,
    sub: String,
}

/// Signs assertions with the RSA private key of a client certificate,
/// advertising the certificate thumbprint in the JWT header.
pub struct CertificateSigner {
    client_id: String,
    key: EncodingKey,
    thumbprint: String,
}

impl CertificateSigner {
    /// Build a signer from a PEM bundle holding the certificate and its
    /// private key. Fails if either is missing or unparseable.
    pub fn from_pem<S: Into<String>>(client_id: S, pem_bundle: &str) -> Result<Self> {
        let key = EncodingKey::from_rsa_pem(pem_bundle.as_bytes()).map_err(|e| {
            KeywardenError::config(format!(
                "Failed to parse certificate private key: {}",
                e
            ))
        })?;
        let thumbprint = certificate_thumbprint(pem_bundle)?;

        Ok(Self {
            client_id: client_id.into(),
            key,
            thumbprint,
        })
    }
}

impl AssertionSigner for CertificateSigner {
    fn sign(&self, audience: &str) -> Result<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.x5t_s256 = Some(self.thumbprint.clone());

        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            aud: audience.to_string(),
            exp: now + ASSERTION_LIFETIME_SECS,
            iat: now,
            iss: self.client_id.clone(),
            jti: Uuid::new_v4().to_string(),
            nbf: now,
            sub: self.client_id.clone(),
        };

        encode(&header, &claims, &self.key).map_err(|e| {
            KeywardenError::authentication(format!("Failed to sign client assertion: {}", e))
        })
    }
}

/// SHA-256 thumbprint of the DER-encoded certificate, base64url without
/// padding, as expected in the `x5t#S256` header field.
fn certificate_thumbprint(pem_bundle: &str) -> Result<String> {
    let pem_entries = pem::parse_many(pem_bundle)
        .map_err(|e| KeywardenError::config(format!("Failed to parse PEM content: {}", e)))?;

    let cert = pem_entries
        .iter()
        .find(|p| p.tag() == "CERTIFICATE")
        .ok_or_else(|| KeywardenError::config("No certificate found in PEM bundle"))?;

    let mut hasher = Sha256::new();
    hasher.update(cert.contents());
    let hash = hasher.finalize();

    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Not a real certificate; the thumbprint only hashes the DER payload.
    const FAKE_CERT_PEM: &str = "-----BEGIN CERTIFICATE-----\n\
        dGVzdC1jZXJ0aWZpY2F0ZS1wYXlsb2Fk\n\
        -----END CERTIFICATE-----\n";

    #[test]
    fn test_thumbprint_is_base64url_no_padding() {
        let thumbprint = certificate_thumbprint(FAKE_CERT_PEM).unwrap();
        // SHA-256 is 32 bytes, 43 chars in unpadded base64url.
        assert_eq!(thumbprint.len(), 43);
        assert!(!thumbprint.contains('='));
        assert!(!thumbprint.contains('+'));
        assert!(!thumbprint.contains('/'));
    }

    #[test]
    fn test_thumbprint_is_deterministic() {
        let a = certificate_thumbprint(FAKE_CERT_PEM).unwrap();
        let b = certificate_thumbprint(FAKE_CERT_PEM).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_bundle_without_certificate_is_rejected() {
        let result = certificate_thumbprint(
            "-----BEGIN PUBLIC KEY-----\nZm9v\n-----END PUBLIC KEY-----\n",
        );
        assert!(matches!(result, Err(KeywardenError::ConfigError(_))));
    }

    #[test]
    fn test_garbage_pem_is_config_error() {
        let result = CertificateSigner::from_pem("client-1", "not a pem bundle");
        assert!(matches!(result, Err(KeywardenError::ConfigError(_))));
    }
}
