// src/zone_cache.rs
// File-backed zone source: holds the latest buy/sell zone lists per
// symbol, reloaded from the snapshot the analysis step writes

use crate::errors::MonitorError;
use crate::types::SymbolZones;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// On-disk shape of the zone snapshot file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ZoneSnapshot {
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub symbols: HashMap<String, SymbolZones>,
}

#[derive(Debug, Default)]
pub struct ZoneCache {
    zones: RwLock<HashMap<String, SymbolZones>>,
}

impl ZoneCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn zones_for(&self, symbol: &str) -> Option<SymbolZones> {
        self.zones.read().await.get(symbol).cloned()
    }

    pub async fn symbols(&self) -> Vec<String> {
        self.zones.read().await.keys().cloned().collect()
    }

    pub async fn snapshot(&self) -> HashMap<String, SymbolZones> {
        self.zones.read().await.clone()
    }

    pub async fn total_zones(&self) -> usize {
        self.zones
            .read()
            .await
            .values()
            .map(|z| z.buy_zones.len() + z.sell_zones.len())
            .sum()
    }

    /// Replaces the cache contents and returns the symbols whose zone set
    /// actually changed (new, removed, or different lists) — the caller
    /// runs the trigger-state refresh hook for exactly those.
    pub async fn apply_snapshot(&self, snapshot: ZoneSnapshot) -> Vec<String> {
        let mut zones = self.zones.write().await;
        let mut changed = Vec::new();

        for (symbol, incoming) in &snapshot.symbols {
            match zones.get(symbol) {
                Some(existing) if existing.same_zones(incoming) => {}
                _ => changed.push(symbol.clone()),
            }
        }
        for symbol in zones.keys() {
            if !snapshot.symbols.contains_key(symbol) {
                changed.push(symbol.clone());
            }
        }

        *zones = snapshot.symbols;

        if !changed.is_empty() {
            info!("🗂️ Zone snapshot applied, {} symbol(s) changed", changed.len());
        } else {
            debug!("🗂️ Zone snapshot applied, no changes");
        }

        changed
    }

    pub async fn load_file(path: &str) -> Result<ZoneSnapshot, MonitorError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let snapshot: ZoneSnapshot = serde_json::from_str(&raw)?;
        Ok(snapshot)
    }
}

/// Reload loop: re-reads the snapshot file on a fixed interval and runs
/// the engine's refresh hook for every changed symbol. A malformed or
/// missing file keeps the previous zones.
pub async fn run_reload_loop(
    cache: std::sync::Arc<ZoneCache>,
    engine: std::sync::Arc<crate::engine::TriggerEngine>,
    path: String,
    interval: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match ZoneCache::load_file(&path).await {
            Ok(snapshot) => {
                let changed = cache.apply_snapshot(snapshot).await;
                for symbol in changed {
                    engine.clear_expired_triggers(&symbol).await;
                }
            }
            Err(e) => {
                warn!("🗂️ Zone snapshot reload failed, keeping previous zones: {}", e);
            }
        }
    }
}
