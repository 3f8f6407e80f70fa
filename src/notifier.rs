// src/notifier.rs
// Notification sink trait, Telegram delivery and message formatting

use crate::errors::MonitorError;
use crate::types::{CrossingEvent, TriggerEvent, TriggerSide};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Delivery seam between the engine and the chat transport. Returns false
/// on failure; the engine never retries a failed send.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, message: &str) -> bool;
}

#[derive(Debug)]
pub struct TelegramNotifier {
    client: Client,
    bot_token: Option<String>,
    chat_id: Option<String>,
    enabled: bool,
    // Simple rate limiting - just track last send time
    last_send: Arc<Mutex<Option<Instant>>>,
}

impl TelegramNotifier {
    pub fn new() -> Self {
        let bot_token = env::var("TELEGRAM_BOT_TOKEN").ok();
        let chat_id = env::var("TELEGRAM_CHAT_ID").ok();

        let enabled = bot_token.is_some() && chat_id.is_some();

        if enabled {
            info!("📱 Telegram notifier initialized with rate limiting");
        } else {
            warn!("📱 Telegram notifier disabled - missing TELEGRAM_BOT_TOKEN or TELEGRAM_CHAT_ID");
        }

        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            bot_token,
            chat_id,
            enabled,
            last_send: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Wait at least 1 second between sends
    async fn wait_for_rate_limit(&self) {
        let mut last_send = self.last_send.lock().await;

        if let Some(last_time) = *last_send {
            let elapsed = last_time.elapsed();
            let min_interval = Duration::from_millis(1000);

            if elapsed < min_interval {
                let wait_time = min_interval - elapsed;
                drop(last_send); // Release lock before sleeping
                sleep(wait_time).await;

                let mut last_send = self.last_send.lock().await;
                *last_send = Some(Instant::now());
            } else {
                *last_send = Some(Instant::now());
            }
        } else {
            *last_send = Some(Instant::now());
        }
    }

    /// Send message with retry on transport-level rate limits
    async fn send_message_with_retry(&self, message: &str) -> Result<(), MonitorError> {
        let bot_token = self
            .bot_token
            .as_ref()
            .ok_or_else(|| MonitorError::Telegram("notifier not configured".to_string()))?;
        let chat_id = self
            .chat_id
            .as_ref()
            .ok_or_else(|| MonitorError::Telegram("notifier not configured".to_string()))?;

        let url = format!("https://api.telegram.org/bot{}/sendMessage", bot_token);

        let payload = json!({
            "chat_id": chat_id,
            "text": message,
            "parse_mode": "Markdown",
            "disable_web_page_preview": true
        });

        // Try up to 3 times with increasing delays
        for attempt in 1..=3u64 {
            match self.client.post(&url).json(&payload).send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        return Ok(());
                    }

                    let status = response.status().as_u16();
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());

                    if error_text.contains("Too Many Requests") {
                        warn!(
                            "📱 Telegram rate limited, waiting 5 seconds (attempt {})",
                            attempt
                        );
                        sleep(Duration::from_secs(5)).await;
                        continue;
                    }

                    return Err(MonitorError::Telegram(format!(
                        "HTTP {}: {}",
                        status, error_text
                    )));
                }
                Err(e) => {
                    if attempt < 3 {
                        let wait_time = attempt * 2; // 2, 4 seconds
                        warn!(
                            "📱 Telegram send failed (attempt {}), retrying in {}s: {}",
                            attempt, wait_time, e
                        );
                        sleep(Duration::from_secs(wait_time)).await;
                        continue;
                    }
                    return Err(MonitorError::Telegram(format!(
                        "Failed after 3 attempts: {}",
                        e
                    )));
                }
            }
        }

        Err(MonitorError::Telegram(
            "Failed to send message after retries".to_string(),
        ))
    }
}

impl Default for TelegramNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    async fn send(&self, message: &str) -> bool {
        if !self.enabled {
            debug!("📱 Telegram disabled, dropping message");
            return true;
        }

        self.wait_for_rate_limit().await;

        match self.send_message_with_retry(message).await {
            Ok(()) => true,
            Err(e) => {
                error!("📱 Failed to send Telegram notification: {}", e);
                false
            }
        }
    }
}

fn side_emoji(side: TriggerSide) -> &'static str {
    match side {
        TriggerSide::Buy => "🟢",
        TriggerSide::Sell => "🔴",
    }
}

pub fn format_trigger_message(event: &TriggerEvent) -> String {
    let emoji = side_emoji(event.side);
    let confidence_pct = event.confidence * 100.0;

    format!(
        "{} *{} ZONE TRIGGER* {}\n\
        \n\
        📊 *Symbol:* `{}`\n\
        📍 *Current Price:* `{:.5}`\n\
        🎯 *Zone Price:* `{:.5}`\n\
        📏 *Tolerance:* `±{:.5}`\n\
        💪 *Confidence:* `{:.0}%`\n\
        📅 *Time:* `{}`\n\
        \n\
        ⚡ *Price is in the {} zone!*",
        emoji,
        event.side.as_str(),
        emoji,
        event.symbol,
        event.current_price,
        event.target_price,
        event.tolerance,
        confidence_pct,
        event.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        event.side.as_str()
    )
}

pub fn format_merged_trigger_message(
    symbol: &str,
    side: TriggerSide,
    events: &[TriggerEvent],
) -> String {
    let emoji = side_emoji(side);

    let mut message = format!(
        "{} *MULTI-ZONE {} TRIGGER* {}\n\
        \n\
        📊 *Symbol:* `{}`\n\
        🔢 *Zones hit:* `{}`\n",
        emoji,
        side.as_str(),
        emoji,
        symbol,
        events.len()
    );

    for (index, event) in events.iter().enumerate() {
        message.push_str(&format!(
            "\n{}. 🎯 `{:.5}` ±`{:.5}` — conf `{:.0}%` @ `{:.5}`",
            index + 1,
            event.target_price,
            event.tolerance,
            event.confidence * 100.0,
            event.current_price
        ));
    }

    message.push_str(&format!(
        "\n\n⚡ *{} zones triggered within one batch window!*",
        events.len()
    ));

    message
}

pub fn format_crossing_message(event: &CrossingEvent) -> String {
    let emoji = match event.kind {
        crate::types::CrossingKind::Enter => "📥",
        crate::types::CrossingKind::Exit => "📤",
        crate::types::CrossingKind::Through => "⏩",
    };

    format!(
        "{} *ZONE {} CROSSING*\n\
        \n\
        📊 *Symbol:* `{}`\n\
        📈 *Side:* `{}`\n\
        📍 *Price:* `{:.5}` (was `{:.5}`)\n\
        🎯 *Zone:* `{:.5}` ±`{:.5}`\n\
        📅 *Time:* `{}`",
        emoji,
        event.kind.as_str(),
        event.symbol,
        event.side.as_str(),
        event.current_price,
        event.previous_price,
        event.target_price,
        event.tolerance,
        event.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

pub fn format_test_message(symbol: &str, test_price: f64, zones_in_band: usize) -> String {
    format!(
        "🧪 *TRIGGER TEST*\n\
        \n\
        📊 *Symbol:* `{}`\n\
        📍 *Test Price:* `{:.5}`\n\
        🎯 *Zones containing price:* `{}`\n\
        \n\
        ✅ Dry run - no trigger state was changed.",
        symbol, test_price, zones_in_band
    )
}
