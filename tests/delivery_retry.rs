//! Ledger Delivery Tests
//!
//! Drives the HTTP client against a stub ledger on a loopback socket:
//! receipt decoding, rejection codes, retry exhaustion and deadlines.

use base64::{engine::general_purpose, Engine as _};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use url::Url;

use deg_ledger_relay::client::{DeliveryError, LedgerClient, LedgerSink};
use deg_ledger_relay::config::{RelayConfig, SigningConfig};
use deg_ledger_relay::model::{LedgerRecord, Role, TradeDetail, TradeType, TradeUnit};
use deg_ledger_relay::signer::AuthScheme;

struct CapturedRequest {
    request_line: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl CapturedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find_map(|(k, v)| k.eq_ignore_ascii_case(name).then_some(v.as_str()))
    }
}

struct StubLedger {
    base_url: String,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

/// One response per connection, then close. `respond` gets the zero-based
/// hit index and the request body and returns `(status, response body)`.
async fn spawn_stub<F>(respond: F) -> StubLedger
where
    F: Fn(usize, &str) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let hits = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);

    let accept_hits = hits.clone();
    let accept_requests = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            let hits = accept_hits.clone();
            let requests = accept_requests.clone();
            let respond = respond.clone();
            tokio::spawn(async move {
                serve_connection(socket, hits, requests, respond).await;
            });
        }
    });

    StubLedger {
        base_url,
        hits,
        requests,
    }
}

async fn serve_connection<F>(
    mut socket: TcpStream,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    respond: Arc<F>,
) where
    F: Fn(usize, &str) -> (u16, String) + Send + Sync + 'static,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 2048];
    let header_end = loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break end;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect();
    let content_length: usize = headers
        .iter()
        .find_map(|(k, v)| {
            if k.eq_ignore_ascii_case("content-length") {
                v.parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);

    let body_start = header_end + 4;
    while buf.len() < body_start + content_length {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let body = String::from_utf8_lossy(&buf[body_start..body_start + content_length]).to_string();

    let index = hits.fetch_add(1, Ordering::SeqCst);
    requests.lock().unwrap().push(CapturedRequest {
        request_line,
        headers,
        body: body.clone(),
    });

    let (status, response_body) = respond.as_ref()(index, &body);
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason(status),
        response_body.len(),
        response_body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        409 => "Conflict",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn receipt_json(record_id: &str) -> String {
    json!({
        "success": true,
        "recordId": record_id,
        "creationTime": "2025-06-02T09:15:02Z",
        "rowDigest": "9f2c",
        "message": "stored"
    })
    .to_string()
}

fn record(order_item_id: &str) -> LedgerRecord {
    LedgerRecord {
        role: Role::Buyer,
        transaction_id: "T1".to_string(),
        order_item_id: order_item_id.to_string(),
        platform_id_buyer: "buyer-app.example.org".to_string(),
        platform_id_seller: "seller-app.example.org".to_string(),
        discom_id_buyer: String::new(),
        discom_id_seller: String::new(),
        buyer_id: "consumer-3".to_string(),
        seller_id: "prosumer-9".to_string(),
        trade_time: "2025-06-02T09:15:00Z".to_string(),
        delivery_start_time: String::new(),
        delivery_end_time: String::new(),
        trade_details: vec![TradeDetail {
            trade_qty: dec!(2.5),
            trade_type: TradeType::Energy,
            trade_unit: TradeUnit::Kwh,
        }],
        client_reference: format!("onix-T1-{}", order_item_id),
    }
}

fn relay_config(base_url: &str, retry_count: u32) -> RelayConfig {
    RelayConfig {
        base_url: Url::parse(base_url).unwrap(),
        role: Role::Buyer,
        enabled: true,
        call_timeout: Duration::from_secs(2),
        retry_count,
        api_key: None,
        auth_header: "X-API-Key".to_string(),
        signing: None,
    }
}

fn far_deadline() -> Instant {
    Instant::now() + Duration::from_secs(10)
}

/// Test a clean delivery: request shape on the wire, receipt decoded back
#[tokio::test]
async fn test_delivery_posts_record_and_decodes_receipt() {
    let stub = spawn_stub(|_, _| (200, receipt_json("rec-77"))).await;
    let client =
        LedgerClient::new(&relay_config(&stub.base_url, 0), AuthScheme::Anonymous).unwrap();

    let receipt = client.deliver(&record("OI-1"), far_deadline()).await.unwrap();
    assert!(receipt.success);
    assert_eq!(receipt.record_id, "rec-77");
    assert_eq!(receipt.row_digest, "9f2c");

    let requests = stub.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(
        request.request_line.starts_with("POST /ledger/put HTTP/1.1"),
        "{}",
        request.request_line
    );
    assert_eq!(request.header("content-type"), Some("application/json"));
    assert_eq!(request.header("accept"), Some("application/json"));
    assert_eq!(request.header("x-request-id").map(str::len), Some(8));

    let body: Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(body["clientReference"], "onix-T1-OI-1");
    assert_eq!(body["role"], "BUYER");
    assert_eq!(body["tradeDetails"][0]["tradeQty"], json!(2.5));

    println!("✅ Delivery posts the record and decodes the receipt");
}

/// Test rejection decoding: the ledger's error code and message survive
#[tokio::test]
async fn test_rejection_surfaces_ledger_error_code() {
    let stub = spawn_stub(|_, _| {
        (
            409,
            json!({
                "code": "DUPLICATE_RECORD",
                "message": "already recorded",
                "details": { "existingId": "rec-1" }
            })
            .to_string(),
        )
    })
    .await;
    let client =
        LedgerClient::new(&relay_config(&stub.base_url, 0), AuthScheme::Anonymous).unwrap();

    let err = client
        .deliver(&record("OI-1"), far_deadline())
        .await
        .unwrap_err();
    match err {
        DeliveryError::Rejected {
            status,
            code,
            message,
        } => {
            assert_eq!(status.as_u16(), 409);
            assert_eq!(code, "DUPLICATE_RECORD");
            assert_eq!(message, "already recorded");
        }
        other => panic!("expected rejection, got {:?}", other),
    }

    println!("✅ Rejection carries the ledger's error code");
}

/// Test that a rejection status with a garbled body degrades gracefully
#[tokio::test]
async fn test_undecodable_rejection_is_unexpected_status() {
    let stub = spawn_stub(|_, _| (400, "oops, not json".to_string())).await;
    let client =
        LedgerClient::new(&relay_config(&stub.base_url, 0), AuthScheme::Anonymous).unwrap();

    let err = client
        .deliver(&record("OI-1"), far_deadline())
        .await
        .unwrap_err();
    match err {
        DeliveryError::UnexpectedStatus { status, body } => {
            assert_eq!(status.as_u16(), 400);
            assert!(body.contains("oops"));
        }
        other => panic!("expected unexpected-status, got {:?}", other),
    }

    println!("✅ Undecodable rejection body reported as unexpected status");
}

/// Test that a 2xx without a decodable receipt is not treated as success
#[tokio::test]
async fn test_invalid_receipt_body_is_unexpected_status() {
    let stub = spawn_stub(|_, _| (200, "ok".to_string())).await;
    let client =
        LedgerClient::new(&relay_config(&stub.base_url, 0), AuthScheme::Anonymous).unwrap();

    let err = client
        .deliver(&record("OI-1"), far_deadline())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeliveryError::UnexpectedStatus { status, .. } if status.as_u16() == 200
    ));

    println!("✅ Garbled receipt body is not silently accepted");
}

/// Test the retry loop: retry_count 2 means three attempts on the wire
#[tokio::test]
async fn test_server_errors_retry_until_exhausted() {
    let stub = spawn_stub(|_, _| (500, json!({"error": "storage down"}).to_string())).await;
    let client =
        LedgerClient::new(&relay_config(&stub.base_url, 2), AuthScheme::Anonymous).unwrap();

    let started = Instant::now();
    let err = client
        .deliver(&record("OI-1"), far_deadline())
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(
        err,
        DeliveryError::UnexpectedStatus { status, .. } if status.as_u16() == 500
    ));
    assert_eq!(stub.hits.load(Ordering::SeqCst), 3);
    // Linear backoff: 100ms before the second attempt, 200ms before the third.
    assert!(elapsed >= Duration::from_millis(290), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2), "elapsed {:?}", elapsed);

    println!("✅ Retries exhausted after {} attempts", 3);
}

/// Test that retry_count 0 sends exactly one request
#[tokio::test]
async fn test_zero_retry_sends_exactly_once() {
    let stub = spawn_stub(|_, _| (503, "try later".to_string())).await;
    let client =
        LedgerClient::new(&relay_config(&stub.base_url, 0), AuthScheme::Anonymous).unwrap();

    let err = client
        .deliver(&record("OI-1"), far_deadline())
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::UnexpectedStatus { .. }));
    assert_eq!(stub.hits.load(Ordering::SeqCst), 1);

    println!("✅ Zero retry budget means a single attempt");
}

/// Test that a failing attempt followed by a success resolves the delivery
#[tokio::test]
async fn test_recovery_on_a_later_attempt() {
    let stub = spawn_stub(|index, _| {
        if index == 0 {
            (500, "flake".to_string())
        } else {
            (200, receipt_json("rec-2"))
        }
    })
    .await;
    let client =
        LedgerClient::new(&relay_config(&stub.base_url, 3), AuthScheme::Anonymous).unwrap();

    let receipt = client.deliver(&record("OI-1"), far_deadline()).await.unwrap();
    assert_eq!(receipt.record_id, "rec-2");
    assert_eq!(stub.hits.load(Ordering::SeqCst), 2);

    println!("✅ Delivery recovered on attempt two");
}

/// Test deadline pre-emption: waking at the deadline aborts the loop early
#[tokio::test]
async fn test_deadline_cuts_the_retry_loop_short() {
    let stub = spawn_stub(|_, _| (500, "still down".to_string())).await;
    let client =
        LedgerClient::new(&relay_config(&stub.base_url, 5), AuthScheme::Anonymous).unwrap();

    let started = Instant::now();
    let err = client
        .deliver(&record("OI-1"), started + Duration::from_millis(250))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, DeliveryError::DeadlineElapsed));
    // Attempt at ~0ms, retry at ~100ms; the 200ms backoff before the third
    // attempt crosses the 250ms deadline, so the budget for attempts 3..=6
    // is never spent.
    assert_eq!(stub.hits.load(Ordering::SeqCst), 2);
    assert!(elapsed >= Duration::from_millis(240), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(600), "elapsed {:?}", elapsed);

    println!("✅ Deadline pre-empted the retry loop after 2 attempts");
}

/// Test that an unreachable ledger surfaces as a transport error
#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    // Reserved port, nothing listens there.
    let client = LedgerClient::new(
        &relay_config("http://127.0.0.1:9", 0),
        AuthScheme::Anonymous,
    )
    .unwrap();

    let err = client
        .deliver(&record("OI-1"), far_deadline())
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::Transport(_)));

    println!("✅ Connection refused maps to a transport error");
}

/// Test the static API key credential
#[tokio::test]
async fn test_api_key_header_is_attached() {
    let stub = spawn_stub(|_, _| (200, receipt_json("rec-5"))).await;
    let auth = AuthScheme::ApiKey {
        header: "X-API-Key".to_string(),
        key: "sekret-9".to_string(),
    };
    let client = LedgerClient::new(&relay_config(&stub.base_url, 0), auth).unwrap();

    client.deliver(&record("OI-1"), far_deadline()).await.unwrap();

    let requests = stub.requests.lock().unwrap();
    assert_eq!(requests[0].header("x-api-key"), Some("sekret-9"));
    assert_eq!(requests[0].header("authorization"), None);

    println!("✅ API key travels in the configured header");
}

/// Test that a signing credential outranks a configured API key
#[tokio::test]
async fn test_signature_header_wins_over_api_key() {
    let stub = spawn_stub(|_, _| (200, receipt_json("rec-6"))).await;

    let mut config = relay_config(&stub.base_url, 0);
    config.api_key = Some("fallback-key".to_string());
    config.signing = Some(SigningConfig {
        subscriber_id: "buyer-app.example.org".to_string(),
        unique_key_id: "bap-key-1".to_string(),
        private_key: general_purpose::STANDARD.encode([3u8; 32]),
        validity_secs: 30,
    });
    let auth = AuthScheme::from_config(&config).unwrap();
    let client = LedgerClient::new(&config, auth).unwrap();

    client.deliver(&record("OI-1"), far_deadline()).await.unwrap();

    let requests = stub.requests.lock().unwrap();
    let authorization = requests[0].header("authorization").unwrap();
    assert!(authorization
        .starts_with("Signature keyId=\"buyer-app.example.org|bap-key-1|ed25519\""));
    assert!(authorization.contains("algorithm=\"ed25519\""));
    assert!(authorization.contains("headers=\"(created) (expires) digest\""));
    assert_eq!(requests[0].header("x-api-key"), None);

    println!("✅ Signature credential outranks the API key");
}
