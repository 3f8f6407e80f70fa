// src/price_feed.rs
// Per-symbol polling loop driving the trigger engine

use crate::config::MonitorConfig;
use crate::engine::TriggerEngine;
use crate::errors::MonitorError;
use crate::types::PriceUpdate;
use chrono::Utc;
use dashmap::DashMap;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct PriceFeed {
    client: Client,
    engine: Arc<TriggerEngine>,
    latest: DashMap<String, PriceUpdate>,
    poll_interval: Duration,
    ticker_url: String,
    gap_check_pct: f64,
}

impl PriceFeed {
    pub fn new(engine: Arc<TriggerEngine>, config: &MonitorConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            engine,
            latest: DashMap::new(),
            poll_interval: config.poll_interval,
            ticker_url: config.ticker_url.clone(),
            gap_check_pct: config.gap_check_pct,
        }
    }

    pub fn latest_prices(&self) -> HashMap<String, PriceUpdate> {
        self.latest
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// One polling task per symbol; each symbol's engine state is only
    /// ever touched by its own task.
    pub fn spawn_pollers(self: Arc<Self>, symbols: &[String]) {
        for symbol in symbols {
            let feed = Arc::clone(&self);
            let symbol = symbol.clone();
            tokio::spawn(async move {
                feed.poll_symbol(symbol).await;
            });
        }
        info!("📡 Price pollers started");
    }

    async fn poll_symbol(self: Arc<Self>, symbol: String) {
        let mut previous: Option<f64> = None;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            "📡 Polling {} every {:?}",
            symbol, self.poll_interval
        );

        loop {
            ticker.tick().await;

            let price = match self.fetch_price(&symbol).await {
                Ok(price) => price,
                Err(e) => {
                    warn!("📡 Price fetch failed for {}: {}", symbol, e);
                    continue;
                }
            };

            if let Some(prev) = previous {
                let move_pct = ((price - prev) / prev).abs() * 100.0;
                if move_pct >= self.gap_check_pct {
                    debug!(
                        "📡 {} moved {:.3}% in one tick ({:.5} → {:.5}), running gap check",
                        symbol, move_pct, prev, price
                    );
                    self.engine
                        .check_possible_missed_triggers(&symbol, prev, price)
                        .await;
                }
            }

            self.engine.check_price_triggers(&symbol, price).await;

            self.latest.insert(
                symbol.clone(),
                PriceUpdate {
                    symbol: symbol.clone(),
                    price,
                    timestamp: Utc::now(),
                },
            );
            previous = Some(price);
        }
    }

    async fn fetch_price(&self, symbol: &str) -> Result<f64, MonitorError> {
        let url = self.ticker_url.replace("{symbol}", symbol);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body: serde_json::Value = response.json().await?;

        parse_last_price(&body).ok_or(MonitorError::PriceMissing)
    }
}

/// Pulls the last-trade price out of a ticker payload. Handles the OKX
/// shape (`data[0].last`) plus the flat `last`/`price` fields other
/// ticker endpoints use.
fn parse_last_price(body: &serde_json::Value) -> Option<f64> {
    let candidate = body
        .get("data")
        .and_then(|d| d.get(0))
        .and_then(|row| row.get("last"))
        .or_else(|| body.get("last"))
        .or_else(|| body.get("price"))?;

    match candidate {
        serde_json::Value::String(s) => s.parse::<f64>().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
