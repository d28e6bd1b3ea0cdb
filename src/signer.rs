use base64::{engine::general_purpose, Engine as _};
use blake2::{Blake2b512, Digest};
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey};
use reqwest::{header, RequestBuilder};
use tracing::{info, warn};

use crate::config::{ConfigError, RelayConfig, SigningConfig};

/// Signs ledger request bodies with the subscriber's ed25519 key.
///
/// The credential follows the network's signature scheme: the body is
/// digested with BLAKE2b-512, the digest is folded into a
/// `(created)/(expires)/digest` signing string, and the signature plus the
/// composite key identity `subscriberId|uniqueKeyId|ed25519` travel in the
/// `Authorization` header.
#[derive(Clone)]
pub struct RequestSigner {
    subscriber_id: String,
    unique_key_id: String,
    signing_key: SigningKey,
    validity_secs: i64,
}

impl RequestSigner {
    pub fn new(config: &SigningConfig) -> Result<RequestSigner, ConfigError> {
        let raw = general_purpose::STANDARD
            .decode(config.private_key.trim())
            .map_err(|e| ConfigError::InvalidSigningKey(format!("not valid base64: {}", e)))?;

        // Accepts a bare 32-byte seed or a 64-byte seed+public concatenation.
        let mut seed = [0u8; 32];
        match raw.len() {
            32 | 64 => seed.copy_from_slice(&raw[..32]),
            n => {
                return Err(ConfigError::InvalidSigningKey(format!(
                    "expected 32 or 64 key bytes, got {}",
                    n
                )));
            }
        }

        Ok(RequestSigner {
            subscriber_id: config.subscriber_id.clone(),
            unique_key_id: config.unique_key_id.clone(),
            signing_key: SigningKey::from_bytes(&seed),
            validity_secs: config.validity_secs as i64,
        })
    }

    pub fn authorization_header(&self, body: &[u8]) -> String {
        self.authorization_header_at(body, Utc::now().timestamp())
    }

    /// Builds the header for an explicit `created` timestamp. Split out from
    /// [`RequestSigner::authorization_header`] so the output is reproducible.
    pub fn authorization_header_at(&self, body: &[u8], created: i64) -> String {
        let expires = created + self.validity_secs;
        let digest = general_purpose::STANDARD.encode(Blake2b512::digest(body));
        let signing_string = format!(
            "(created): {}\n(expires): {}\ndigest: BLAKE-512={}",
            created, expires, digest
        );
        let signature = general_purpose::STANDARD
            .encode(self.signing_key.sign(signing_string.as_bytes()).to_bytes());

        format!(
            "Signature keyId=\"{}|{}|ed25519\",algorithm=\"ed25519\",created=\"{}\",expires=\"{}\",headers=\"(created) (expires) digest\",signature=\"{}\"",
            self.subscriber_id, self.unique_key_id, created, expires, signature
        )
    }
}

/// Credential attached to outbound ledger calls, fixed once at construction.
/// Signing wins over a static API key; with neither configured the relay
/// runs unauthenticated.
#[derive(Clone)]
pub enum AuthScheme {
    Signature(RequestSigner),
    ApiKey { header: String, key: String },
    Anonymous,
}

impl AuthScheme {
    pub fn from_config(config: &RelayConfig) -> Result<AuthScheme, ConfigError> {
        if let Some(signing) = &config.signing {
            let signer = RequestSigner::new(signing)?;
            info!(
                subscriber_id = %signing.subscriber_id,
                unique_key_id = %signing.unique_key_id,
                "🔏 ledger requests will carry a signature credential"
            );
            return Ok(AuthScheme::Signature(signer));
        }

        if let Some(key) = &config.api_key {
            info!(header = %config.auth_header, "🔑 ledger requests will carry a static API key");
            return Ok(AuthScheme::ApiKey {
                header: config.auth_header.clone(),
                key: key.clone(),
            });
        }

        warn!("no ledger credential configured, requests will be unauthenticated");
        Ok(AuthScheme::Anonymous)
    }

    pub fn apply(&self, request: RequestBuilder, body: &[u8]) -> RequestBuilder {
        match self {
            AuthScheme::Signature(signer) => {
                request.header(header::AUTHORIZATION, signer.authorization_header(body))
            }
            AuthScheme::ApiKey { header, key } => request.header(header.as_str(), key.as_str()),
            AuthScheme::Anonymous => request,
        }
    }
}
