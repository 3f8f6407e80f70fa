// src/main.rs
// Zone notifier entry point: engine wiring, zone reload loop, price
// pollers and the debug API

use axum::{extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use zone_notifier::config::{MonitorConfig, TriggerConfig};
use zone_notifier::engine::{TestTriggerReport, TriggerEngine};
use zone_notifier::notifier::{NotificationSink, TelegramNotifier};
use zone_notifier::price_feed::PriceFeed;
use zone_notifier::zone_cache::{run_reload_loop, ZoneCache};

#[derive(Debug, Parser)]
#[command(name = "zone_notifier", about = "Watches prices against buy/sell zones and pushes chat alerts")]
struct Cli {
    /// Zone snapshot file (overrides ZONE_CACHE_FILE)
    #[arg(long)]
    zone_file: Option<String>,
    /// Debug API bind address (overrides HTTP_BIND)
    #[arg(long)]
    bind: Option<String>,
}

#[derive(Clone)]
struct AppState {
    engine: Arc<TriggerEngine>,
    zone_cache: Arc<ZoneCache>,
    price_feed: Arc<PriceFeed>,
    notifier: Arc<TelegramNotifier>,
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let status = json!({
        "status": "ok",
        "symbols_with_zones": state.zone_cache.symbols().await.len(),
        "total_zones": state.zone_cache.total_zones().await,
        "live_prices": state.price_feed.latest_prices().len(),
        "pending_batches": state.engine.pending_batches().await,
        "telegram_enabled": state.notifier.is_enabled(),
        "timestamp": chrono::Utc::now()
    });
    Json(status)
}

async fn stats_api(State(state): State<AppState>) -> Json<Value> {
    let response = json!({
        "trigger_stats": state.engine.trigger_statistics().await,
        "recent_alerts": state.engine.recent_alerts().await,
        "latest_prices": state.price_feed.latest_prices(),
    });
    Json(response)
}

async fn zones_api(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.zone_cache.snapshot().await))
}

#[derive(Debug, Deserialize)]
struct TestTriggerRequest {
    symbol: String,
    price: f64,
    #[serde(default)]
    force_notification: bool,
}

async fn test_trigger_api(
    State(state): State<AppState>,
    Json(request): Json<TestTriggerRequest>,
) -> Json<TestTriggerReport> {
    let report = state
        .engine
        .test_price_trigger(&request.symbol, request.price, request.force_notification)
        .await;
    Json(report)
}

async fn test_notification_api(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let message = "🤖 *Zone Notifier Test*\n\nTelegram notifications are working correctly!\n\n✅ Ready to deliver zone triggers.";
    let success = state.notifier.send(message).await;

    let response = json!({
        "success": success,
        "message": if success {
            "Test notification sent successfully"
        } else {
            "Failed to send test notification"
        }
    });

    let status_code = if success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (status_code, Json(response))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "zone_notifier=info,info".into()))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let trigger_config = TriggerConfig::from_env();
    let mut monitor_config = MonitorConfig::from_env();
    if let Some(zone_file) = cli.zone_file {
        monitor_config.zone_file = zone_file;
    }
    if let Some(bind) = cli.bind {
        monitor_config.http_bind = bind;
    }

    let zone_cache = Arc::new(ZoneCache::new());
    match ZoneCache::load_file(&monitor_config.zone_file).await {
        Ok(snapshot) => {
            let changed = zone_cache.apply_snapshot(snapshot).await;
            info!(
                "🗂️ Loaded {} zone(s) for {} symbol(s) from {}",
                zone_cache.total_zones().await,
                changed.len(),
                monitor_config.zone_file
            );
        }
        Err(e) => {
            warn!(
                "🗂️ No usable zone snapshot at startup ({}), starting empty",
                e
            );
        }
    }

    let notifier = Arc::new(TelegramNotifier::new());
    let sink: Arc<dyn NotificationSink> = notifier.clone();
    let engine = Arc::new(TriggerEngine::new(
        trigger_config,
        Arc::clone(&zone_cache),
        sink,
    ));

    tokio::spawn(run_reload_loop(
        Arc::clone(&zone_cache),
        Arc::clone(&engine),
        monitor_config.zone_file.clone(),
        monitor_config.zone_reload_interval,
    ));

    let price_feed = Arc::new(PriceFeed::new(Arc::clone(&engine), &monitor_config));
    Arc::clone(&price_feed).spawn_pollers(&monitor_config.symbols);

    let state = AppState {
        engine,
        zone_cache,
        price_feed,
        notifier,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/stats", get(stats_api))
        .route("/api/zones", get(zones_api))
        .route("/api/test-trigger", post(test_trigger_api))
        .route("/api/test-notification", post(test_notification_api))
        .layer(cors)
        .with_state(state);

    info!("🚀 Debug API listening on {}", monitor_config.http_bind);
    let listener = tokio::net::TcpListener::bind(&monitor_config.http_bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
