use async_trait::async_trait;
use reqwest::{header, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::config::{ConfigError, RelayConfig};
use crate::metrics;
use crate::model::{LedgerApiError, LedgerReceipt, LedgerRecord};
use crate::signer::AuthScheme;

pub const LEDGER_PUT_PATH: &str = "/ledger/put";

const BACKOFF_BASE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("ledger rejected record (status {status}, code {code}): {message}")]
    Rejected {
        status: StatusCode,
        code: String,
        message: String,
    },
    #[error("unexpected ledger response (status {status}): {body}")]
    UnexpectedStatus { status: StatusCode, body: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("delivery deadline elapsed")]
    DeadlineElapsed,
    #[error("failed to encode ledger record: {0}")]
    Encode(String),
}

/// Destination for mapped records. The dispatcher only sees this seam, so
/// tests can swap the HTTP client for an in-memory double.
#[async_trait]
pub trait LedgerSink: Send + Sync {
    async fn deliver(
        &self,
        record: &LedgerRecord,
        deadline: Instant,
    ) -> Result<LedgerReceipt, DeliveryError>;
}

/// HTTP client for the ledger record API. One pooled reqwest client per
/// relay; the configured call timeout caps each attempt, the caller's
/// deadline caps the delivery as a whole.
pub struct LedgerClient {
    http: reqwest::Client,
    endpoint: Url,
    auth: AuthScheme,
    retry_count: u32,
}

impl LedgerClient {
    pub fn new(config: &RelayConfig, auth: AuthScheme) -> Result<LedgerClient, ConfigError> {
        // String-joined on purpose: a base url with a path component keeps it
        // as a prefix (`/api` becomes `/api/ledger/put`).
        let raw = format!(
            "{}{}",
            config.base_url.as_str().trim_end_matches('/'),
            LEDGER_PUT_PATH
        );
        let endpoint = Url::parse(&raw).map_err(|source| ConfigError::InvalidBaseUrl {
            url: raw.clone(),
            source,
        })?;

        let http = reqwest::Client::builder()
            .timeout(config.call_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(LedgerClient {
            http,
            endpoint,
            auth,
            retry_count: config.retry_count,
        })
    }

    async fn send_once(
        &self,
        record: &LedgerRecord,
        body: &[u8],
    ) -> Result<LedgerReceipt, DeliveryError> {
        let request_id = request_id();
        debug!(
            request_id = %request_id,
            url = %self.endpoint,
            order_item_id = %record.order_item_id,
            "posting record to ledger"
        );

        let request = self
            .http
            .post(self.endpoint.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json")
            .header("X-Request-ID", &request_id);
        let request = self.auth.apply(request, body);

        let response = request
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        if status.is_success() {
            let receipt: LedgerReceipt =
                serde_json::from_str(&text).map_err(|_| DeliveryError::UnexpectedStatus {
                    status,
                    body: truncate_body(text.clone()),
                })?;
            debug!(
                request_id = %request_id,
                record_id = %receipt.record_id,
                "ledger accepted record"
            );
            return Ok(receipt);
        }

        match status {
            StatusCode::BAD_REQUEST
            | StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN
            | StatusCode::CONFLICT => match serde_json::from_str::<LedgerApiError>(&text) {
                Ok(api_error) => {
                    if let Some(details) = &api_error.details {
                        warn!(
                            request_id = %request_id,
                            code = %api_error.code,
                            details = %details,
                            "ledger rejection details"
                        );
                    }
                    Err(DeliveryError::Rejected {
                        status,
                        code: api_error.code,
                        message: api_error.message,
                    })
                }
                Err(_) => Err(DeliveryError::UnexpectedStatus {
                    status,
                    body: truncate_body(text),
                }),
            },
            _ => Err(DeliveryError::UnexpectedStatus {
                status,
                body: truncate_body(text),
            }),
        }
    }
}

#[async_trait]
impl LedgerSink for LedgerClient {
    async fn deliver(
        &self,
        record: &LedgerRecord,
        deadline: Instant,
    ) -> Result<LedgerReceipt, DeliveryError> {
        let body =
            serde_json::to_vec(record).map_err(|e| DeliveryError::Encode(e.to_string()))?;
        let mut last_error: Option<DeliveryError> = None;

        for attempt in 0..=self.retry_count {
            if attempt > 0 {
                // Linear backoff, capped by the caller's deadline: waking at
                // the deadline aborts without consuming the remaining wait.
                let backoff = BACKOFF_BASE * attempt;
                let wake = Instant::now() + backoff;
                sleep_until(wake.min(deadline)).await;
                if Instant::now() >= deadline {
                    warn!(
                        order_item_id = %record.order_item_id,
                        attempt,
                        "delivery deadline reached during backoff"
                    );
                    return Err(DeliveryError::DeadlineElapsed);
                }
                warn!(
                    order_item_id = %record.order_item_id,
                    attempt,
                    max_retries = self.retry_count,
                    "retrying ledger delivery"
                );
                metrics::inc_delivery_retries();
            }

            match timeout_at(deadline, self.send_once(record, &body)).await {
                Err(_) => {
                    warn!(
                        order_item_id = %record.order_item_id,
                        attempt,
                        "delivery deadline reached mid-flight"
                    );
                    return Err(DeliveryError::DeadlineElapsed);
                }
                Ok(Ok(receipt)) => return Ok(receipt),
                Ok(Err(error)) => {
                    warn!(
                        order_item_id = %record.order_item_id,
                        attempt,
                        error = %error,
                        "ledger delivery attempt failed"
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or(DeliveryError::DeadlineElapsed))
    }
}

fn request_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

fn truncate_body(body: String) -> String {
    const LIMIT: usize = 2000;
    if body.chars().count() <= LIMIT {
        return body;
    }
    let mut truncated: String = body.chars().take(LIMIT).collect();
    truncated.push_str("... (truncated)");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    fn config_with_base(base: &str) -> RelayConfig {
        RelayConfig {
            base_url: Url::parse(base).unwrap(),
            role: Role::Buyer,
            enabled: true,
            call_timeout: Duration::from_millis(5_000),
            retry_count: 0,
            api_key: None,
            auth_header: "X-API-Key".to_string(),
            signing: None,
        }
    }

    #[test]
    fn endpoint_appends_put_path_to_base() {
        let client =
            LedgerClient::new(&config_with_base("https://ledger.example.org"), AuthScheme::Anonymous)
                .unwrap();
        assert_eq!(
            client.endpoint.as_str(),
            "https://ledger.example.org/ledger/put"
        );
    }

    #[test]
    fn endpoint_keeps_base_path_prefix_and_drops_trailing_slash() {
        let client = LedgerClient::new(
            &config_with_base("https://ledger.example.org/api/v1/"),
            AuthScheme::Anonymous,
        )
        .unwrap();
        assert_eq!(
            client.endpoint.as_str(),
            "https://ledger.example.org/api/v1/ledger/put"
        );
    }

    #[test]
    fn request_ids_are_short_correlation_tokens() {
        let id = request_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(request_id(), request_id());
    }

    #[test]
    fn oversized_error_bodies_are_truncated() {
        let long = "x".repeat(5_000);
        let out = truncate_body(long);
        assert!(out.len() < 2_100);
        assert!(out.ends_with("... (truncated)"));
        assert_eq!(truncate_body("short".to_string()), "short");
    }
}
