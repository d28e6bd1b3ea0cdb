use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::model::Role;

const DEFAULT_CALL_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_SIGNATURE_VALIDITY_SECS: u64 = 30;
const DEFAULT_AUTH_HEADER: &str = "X-API-Key";
pub const DEFAULT_SERVICE_PORT: u16 = 8080;

/// Raw layered settings: optional config files overridden by `DEG`-prefixed
/// environment variables, e.g. DEG_LEDGER__BASE_URL, DEG_LEDGER__ROLE.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    pub ledger: Option<LedgerSettings>,
    pub service: Option<ServiceSettings>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LedgerSettings {
    #[serde(alias = "baseUrl")]
    pub base_url: Option<String>,
    pub role: Option<String>,
    pub enabled: Option<bool>,
    #[serde(alias = "callTimeoutMs", alias = "asyncTimeoutMs")]
    pub call_timeout_ms: Option<u64>,
    #[serde(alias = "retryCount")]
    pub retry_count: Option<u32>,
    #[serde(alias = "apiKey")]
    pub api_key: Option<String>,
    #[serde(alias = "authHeader")]
    pub auth_header: Option<String>,
    #[serde(alias = "subscriberId")]
    pub subscriber_id: Option<String>,
    #[serde(alias = "uniqueKeyId")]
    pub unique_key_id: Option<String>,
    #[serde(alias = "signingPrivateKey")]
    pub signing_private_key: Option<String>,
    #[serde(alias = "signatureValiditySecs")]
    pub signature_validity_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServiceSettings {
    pub port: Option<u16>,
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let s = Config::builder()
            // Project config from config/config.{toml,json,ini}
            .add_source(File::with_name("config/config").required(false))
            // Local overrides, not checked in
            .add_source(File::with_name("config/local").required(false))
            // Environment overrides, e.g. DEG_LEDGER__BASE_URL
            .add_source(Environment::with_prefix("DEG").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ledger base url is required (set ledger.base_url or DEG_LEDGER__BASE_URL)")]
    MissingBaseUrl,
    #[error("invalid ledger base url {url:?}: {source}")]
    InvalidBaseUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("invalid role {0:?}, expected BUYER, SELLER, BUYER_DISCOM or SELLER_DISCOM")]
    InvalidRole(String),
    #[error("ledger call timeout must be a positive number of milliseconds")]
    InvalidCallTimeout,
    #[error("incomplete signing configuration: {0} is missing")]
    IncompleteSigning(&'static str),
    #[error("invalid signing key: {0}")]
    InvalidSigningKey(String),
    #[error("failed to build http client: {0}")]
    HttpClient(String),
    #[error("failed to load settings: {0}")]
    Settings(#[from] config::ConfigError),
}

/// Validated relay configuration. Construction fails loudly; a relay with a
/// half-formed credential or an unparseable ledger address must not start.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub base_url: Url,
    pub role: Role,
    pub enabled: bool,
    pub call_timeout: Duration,
    pub retry_count: u32,
    pub api_key: Option<String>,
    pub auth_header: String,
    pub signing: Option<SigningConfig>,
}

#[derive(Debug, Clone)]
pub struct SigningConfig {
    pub subscriber_id: String,
    pub unique_key_id: String,
    /// Base64-encoded ed25519 seed (32 bytes, or 64-byte seed+public).
    pub private_key: String,
    pub validity_secs: u64,
}

impl RelayConfig {
    pub fn load() -> Result<RelayConfig, ConfigError> {
        let settings = Settings::new()?;
        RelayConfig::from_settings(&settings)
    }

    pub fn from_settings(settings: &Settings) -> Result<RelayConfig, ConfigError> {
        let ledger = settings.ledger.clone().unwrap_or_default();

        let raw_url = ledger
            .base_url
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingBaseUrl)?;
        let base_url = Url::parse(raw_url.trim()).map_err(|source| ConfigError::InvalidBaseUrl {
            url: raw_url.clone(),
            source,
        })?;

        let role = match ledger.role.as_deref().map(str::trim) {
            None | Some("") => Role::default(),
            Some(raw) => {
                Role::parse(raw).ok_or_else(|| ConfigError::InvalidRole(raw.to_string()))?
            }
        };

        let timeout_ms = ledger.call_timeout_ms.unwrap_or(DEFAULT_CALL_TIMEOUT_MS);
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidCallTimeout);
        }

        let validity_secs = ledger
            .signature_validity_secs
            .unwrap_or(DEFAULT_SIGNATURE_VALIDITY_SECS);

        let subscriber_id = resolve_secret(ledger.subscriber_id, "SUBSCRIBER_ID");
        let unique_key_id = resolve_secret(ledger.unique_key_id, "UNIQUE_KEY_ID");
        let private_key = resolve_secret(ledger.signing_private_key, "SIGNING_PRIVATE_KEY");

        // Signing material is all-or-none: one field without its siblings is
        // a deployment mistake, not a request for unauthenticated mode.
        let signing = match (subscriber_id, unique_key_id, private_key) {
            (None, None, None) => None,
            (subscriber_id, unique_key_id, private_key) => Some(SigningConfig {
                subscriber_id: subscriber_id
                    .ok_or(ConfigError::IncompleteSigning("subscriber_id"))?,
                unique_key_id: unique_key_id
                    .ok_or(ConfigError::IncompleteSigning("unique_key_id"))?,
                private_key: private_key
                    .ok_or(ConfigError::IncompleteSigning("signing_private_key"))?,
                validity_secs,
            }),
        };

        Ok(RelayConfig {
            base_url,
            role,
            enabled: ledger.enabled.unwrap_or(true),
            call_timeout: Duration::from_millis(timeout_ms),
            retry_count: ledger.retry_count.unwrap_or(0),
            api_key: ledger.api_key.filter(|key| !key.is_empty()),
            auth_header: ledger
                .auth_header
                .filter(|header| !header.is_empty())
                .unwrap_or_else(|| DEFAULT_AUTH_HEADER.to_string()),
            signing,
        })
    }
}

/// Settings value with an environment fallback. The env names are shared
/// with the platform key-manager deployment so one injected secret serves
/// both components.
fn resolve_secret(configured: Option<String>, env_key: &str) -> Option<String> {
    let configured = configured.filter(|value| !value.is_empty());
    if configured.is_some() {
        return configured;
    }

    match env::var(env_key) {
        Ok(value) if !value.is_empty() => {
            info!(source = env_key, "signing field resolved from environment");
            Some(value)
        }
        _ => None,
    }
}
