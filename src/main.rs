use actix_web::{web, App, HttpServer};
use std::env;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use deg_ledger_relay::api;
use deg_ledger_relay::config::{RelayConfig, Settings, DEFAULT_SERVICE_PORT};
use deg_ledger_relay::recorder::LedgerRecorder;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    info!("╔═══════════════════════════════════════════════════════════════╗");
    info!("║               DEG LEDGER RELAY                                ║");
    info!("║               Confirmed Trades -> Energy Ledger               ║");
    info!("╚═══════════════════════════════════════════════════════════════╝");

    // Load environment variables
    dotenv::dotenv().ok();

    let settings = match Settings::new() {
        Ok(settings) => settings,
        Err(e) => {
            error!("❌ Failed to load settings: {}", e);
            std::process::exit(1);
        }
    };

    let config = match RelayConfig::from_settings(&settings) {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Invalid relay configuration: {}", e);
            std::process::exit(1);
        }
    };

    let recorder = match LedgerRecorder::new(config) {
        Ok(recorder) => Arc::new(recorder),
        Err(e) => {
            error!("❌ Failed to initialize ledger recorder: {}", e);
            std::process::exit(1);
        }
    };
    info!("✅ Ledger recorder initialized");

    let port = env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .or_else(|| settings.service.as_ref().and_then(|s| s.port))
        .unwrap_or(DEFAULT_SERVICE_PORT);
    let bind_address = format!("0.0.0.0:{}", port);
    info!("🚀 Starting callback intake on {}", bind_address);

    let recorder_for_api = recorder.clone();
    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(cors)
            .app_data(web::Data::new(recorder_for_api.clone()))
            .configure(api::config)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    // Confirmed trades already accepted for dispatch must reach the ledger
    // before the process exits.
    info!(
        in_flight = recorder.in_flight(),
        "intake stopped, draining outstanding deliveries"
    );
    recorder.drain().await;
    info!("✅ Drained, shutting down");

    Ok(())
}
