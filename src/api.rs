use actix_web::{web, HttpRequest, HttpResponse, Responder};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

use crate::recorder::LedgerRecorder;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Network callback intake. Recording happens in the background, so the
/// caller always gets the protocol ACK; a broken payload is the relay's
/// problem to log, never the sender's to retry.
pub async fn ingest(
    req: HttpRequest,
    body: web::Bytes,
    recorder: web::Data<Arc<LedgerRecorder>>,
) -> impl Responder {
    let outcome = recorder.handle(req.path(), &body);
    debug!(path = %req.path(), outcome = ?outcome, "network callback processed");

    HttpResponse::Ok().json(json!({ "message": { "ack": { "status": "ACK" } } }))
}

pub async fn metrics_export() -> impl Responder {
    let mut buffer = Vec::new();
    if let Err(err) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        error!(error = %err, "failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/bap/receiver/{action}").route(web::post().to(ingest)))
        .service(web::resource("/bpp/caller/{action}").route(web::post().to(ingest)))
        .service(web::resource("/health").route(web::get().to(health_check)))
        .service(web::resource("/metrics").route(web::get().to(metrics_export)));
}
