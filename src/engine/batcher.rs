// src/engine/batcher.rs
// Deferred flush queue: first trigger for a (symbol, side) arms a one-shot
// timer, later triggers in the same window just append

use crate::notifier::{format_merged_trigger_message, format_trigger_message, NotificationSink};
use crate::types::{TriggerEvent, TriggerSide};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type BatchKey = (String, TriggerSide);

pub struct NotificationBatcher {
    window: Duration,
    pending: Arc<Mutex<HashMap<BatchKey, Vec<TriggerEvent>>>>,
    sink: Arc<dyn NotificationSink>,
}

impl NotificationBatcher {
    pub fn new(window: Duration, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            window,
            pending: Arc::new(Mutex::new(HashMap::new())),
            sink,
        }
    }

    /// Queues a fired trigger. The flush fires exactly once per batch,
    /// `window` after the first event; it is never rescheduled by later
    /// events and never cancelled.
    pub async fn enqueue(&self, event: TriggerEvent) {
        let key: BatchKey = (event.symbol.clone(), event.side);
        let mut pending = self.pending.lock().await;

        match pending.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                slot.get_mut().push(event);
                debug!(
                    "📦 Appended to pending {} {} batch ({} events)",
                    key.0,
                    key.1.as_str(),
                    slot.get().len()
                );
            }
            Entry::Vacant(slot) => {
                slot.insert(vec![event]);
                debug!(
                    "📦 Opened {} {} batch, flushing in {:?}",
                    key.0,
                    key.1.as_str(),
                    self.window
                );

                let pending = Arc::clone(&self.pending);
                let sink = Arc::clone(&self.sink);
                let window = self.window;
                tokio::spawn(async move {
                    tokio::time::sleep(window).await;
                    Self::flush(pending, sink, key).await;
                });
            }
        }
    }

    async fn flush(
        pending: Arc<Mutex<HashMap<BatchKey, Vec<TriggerEvent>>>>,
        sink: Arc<dyn NotificationSink>,
        key: BatchKey,
    ) {
        let events = { pending.lock().await.remove(&key) };
        let Some(events) = events else {
            return;
        };

        let message = if events.len() == 1 {
            format_trigger_message(&events[0])
        } else {
            format_merged_trigger_message(&key.0, key.1, &events)
        };

        info!(
            "📤 Flushing {} {} batch with {} event(s)",
            key.0,
            key.1.as_str(),
            events.len()
        );

        if !sink.send(&message).await {
            warn!(
                "📤 Delivery failed for {} {} batch, dropping {} event(s)",
                key.0,
                key.1.as_str(),
                events.len()
            );
        }
    }

    /// Number of batches currently waiting on their flush timer.
    pub async fn pending_batches(&self) -> usize {
        self.pending.lock().await.len()
    }
}
