// src/config.rs
// Environment-driven configuration for the trigger engine and the monitor

use chrono::Duration;
use std::env;
use std::time::Duration as StdDuration;
use tracing::info;

fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse::<i64>()
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse::<u64>()
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse::<f64>()
        .unwrap_or(default)
}

/// Tunables of the trigger engine proper: the three cooldown scopes, the
/// batch window and the zone-identity rounding precision.
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// Per-symbol gate over notifications of any kind.
    pub global_cooldown: Duration,
    /// Minimum interval between two fires of the same zone.
    pub retrigger_cooldown: Duration,
    /// Minimum interval between two crossing notifications of the same
    /// (symbol, side, zone price, kind).
    pub crossing_cooldown: Duration,
    /// Delay between the first queued trigger and the batch flush.
    pub batch_window: StdDuration,
    /// Decimals kept when rounding zone price/tolerance into a map key.
    pub key_decimals: u32,
    /// Cap on the in-memory recent-alert ring.
    pub recent_alert_limit: usize,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            global_cooldown: Duration::minutes(15),
            retrigger_cooldown: Duration::minutes(15),
            crossing_cooldown: Duration::minutes(5),
            batch_window: StdDuration::from_secs(5),
            key_decimals: 8,
            recent_alert_limit: 100,
        }
    }
}

impl TriggerConfig {
    pub fn from_env() -> Self {
        let global_minutes = env_i64("GLOBAL_TRIGGER_COOLDOWN_MINUTES", 15);
        let retrigger_minutes = env_i64("ZONE_RETRIGGER_COOLDOWN_MINUTES", 15);
        let crossing_minutes = env_i64("CROSSING_COOLDOWN_MINUTES", 5);
        let batch_seconds = env_u64("NOTIFICATION_BATCH_SECONDS", 5);
        let key_decimals = env_u64("ZONE_KEY_DECIMALS", 8) as u32;
        let recent_alert_limit = env_u64("RECENT_ALERT_LIMIT", 100) as usize;

        info!("🎯 Trigger engine configuration:");
        info!("   Global cooldown: {} min", global_minutes);
        info!("   Zone retrigger cooldown: {} min", retrigger_minutes);
        info!("   Crossing cooldown: {} min", crossing_minutes);
        info!("   Batch window: {} s", batch_seconds);

        Self {
            global_cooldown: Duration::minutes(global_minutes),
            retrigger_cooldown: Duration::minutes(retrigger_minutes),
            crossing_cooldown: Duration::minutes(crossing_minutes),
            batch_window: StdDuration::from_secs(batch_seconds),
            key_decimals,
            recent_alert_limit,
        }
    }
}

/// Everything around the engine: which symbols to poll, where prices and
/// zone snapshots come from, and where the debug API listens.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub symbols: Vec<String>,
    pub poll_interval: StdDuration,
    /// Ticker endpoint with a `{symbol}` placeholder.
    pub ticker_url: String,
    /// Inter-tick move (percent of previous price) above which the
    /// missed-crossing check runs before the regular one.
    pub gap_check_pct: f64,
    pub zone_file: String,
    pub zone_reload_interval: StdDuration,
    pub http_bind: String,
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        let symbols: Vec<String> = env::var("MONITOR_SYMBOLS")
            .unwrap_or_else(|_| "BTC-USDT,ETH-USDT".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let poll_seconds = env_u64("PRICE_POLL_SECONDS", 5);
        let ticker_url = env::var("PRICE_TICKER_URL").unwrap_or_else(|_| {
            "https://www.okx.com/api/v5/market/ticker?instId={symbol}".to_string()
        });
        let gap_check_pct = env_f64("MISSED_CHECK_MIN_MOVE_PCT", 0.5);
        let zone_file =
            env::var("ZONE_CACHE_FILE").unwrap_or_else(|_| "shared_zones.json".to_string());
        let zone_reload_seconds = env_u64("ZONE_RELOAD_SECONDS", 60);
        let http_bind = env::var("HTTP_BIND").unwrap_or_else(|_| "127.0.0.1:8090".to_string());

        info!("📡 Monitor configuration:");
        info!("   Symbols: {:?}", symbols);
        info!("   Poll interval: {} s", poll_seconds);
        info!("   Zone snapshot: {} (reload every {} s)", zone_file, zone_reload_seconds);
        info!("   Debug API: {}", http_bind);

        Self {
            symbols,
            poll_interval: StdDuration::from_secs(poll_seconds),
            ticker_url,
            gap_check_pct,
            zone_file,
            zone_reload_interval: StdDuration::from_secs(zone_reload_seconds),
            http_bind,
        }
    }
}
