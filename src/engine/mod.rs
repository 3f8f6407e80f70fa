// src/engine/mod.rs
// Zone trigger detection engine: dwell tracking, the three cooldown
// scopes, missed-crossing compensation and batched delivery

pub mod batcher;
pub mod cooldown;
pub mod zone_state;

use crate::config::TriggerConfig;
use crate::notifier::{format_crossing_message, format_test_message, NotificationSink};
use crate::types::{
    CrossingEvent, CrossingKind, TradingZone, TriggerEvent, TriggerSide,
};
use crate::zone_cache::ZoneCache;
use batcher::NotificationBatcher;
use chrono::{DateTime, Utc};
use cooldown::CooldownLedger;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use zone_state::{CrossingKey, ZoneKey, ZoneStateTracker};

/// Row of the in-memory recent-alert ring, surfaced on the debug API.
#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: TriggerSide,
    pub kind: String,
    pub price: f64,
    pub target_price: f64,
}

impl AlertRecord {
    fn trigger(event: &TriggerEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            symbol: event.symbol.clone(),
            side: event.side,
            kind: "TRIGGER".to_string(),
            price: event.current_price,
            target_price: event.target_price,
        }
    }

    fn crossing(event: &CrossingEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            symbol: event.symbol.clone(),
            side: event.side,
            kind: format!("CROSSING:{}", event.kind.as_str()),
            price: event.current_price,
            target_price: event.target_price,
        }
    }
}

/// Operational counters, read-only.
#[derive(Debug, Default, Serialize)]
pub struct TriggerStats {
    pub total_recorded_fires: usize,
    pub fires_in_cooldown: usize,
    pub dwell_flags_set: usize,
    pub symbols_in_global_cooldown: usize,
}

#[derive(Debug, Serialize)]
pub struct TestZoneMatch {
    pub side: TriggerSide,
    pub zone: TradingZone,
    pub in_zone: bool,
    pub distance: f64,
}

#[derive(Debug, Serialize)]
pub struct TestTriggerReport {
    pub symbol: String,
    pub test_price: f64,
    pub zones_checked: usize,
    pub zones_in_band: usize,
    pub zones: Vec<TestZoneMatch>,
    pub notification_sent: bool,
}

// Write guards over the engine maps, held together for the duration of
// one synchronous scan. Nothing awaits while these are alive.
struct ScanGuards<'a> {
    tracker: &'a mut ZoneStateTracker,
    global: &'a mut CooldownLedger<String>,
    zones: &'a mut CooldownLedger<ZoneKey>,
    crossings: &'a mut CooldownLedger<CrossingKey>,
}

/// One engine instance per process. Owns every piece of trigger state:
/// dwell tracker, the three cooldown ledgers, the pending batches and the
/// recent-alert ring. Constructed once and shared behind an Arc.
pub struct TriggerEngine {
    config: TriggerConfig,
    zones: Arc<ZoneCache>,
    sink: Arc<dyn NotificationSink>,
    batcher: NotificationBatcher,
    tracker: RwLock<ZoneStateTracker>,
    global_cooldowns: RwLock<CooldownLedger<String>>,
    zone_cooldowns: RwLock<CooldownLedger<ZoneKey>>,
    crossing_cooldowns: RwLock<CooldownLedger<CrossingKey>>,
    last_prices: RwLock<HashMap<String, f64>>,
    recent_alerts: RwLock<VecDeque<AlertRecord>>,
}

impl TriggerEngine {
    pub fn new(
        config: TriggerConfig,
        zones: Arc<ZoneCache>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let batcher = NotificationBatcher::new(config.batch_window, Arc::clone(&sink));
        Self {
            tracker: RwLock::new(ZoneStateTracker::new(config.key_decimals)),
            global_cooldowns: RwLock::new(CooldownLedger::new(config.global_cooldown)),
            zone_cooldowns: RwLock::new(CooldownLedger::new(config.retrigger_cooldown)),
            crossing_cooldowns: RwLock::new(CooldownLedger::new(config.crossing_cooldown)),
            last_prices: RwLock::new(HashMap::new()),
            recent_alerts: RwLock::new(VecDeque::new()),
            batcher,
            config,
            zones,
            sink,
        }
    }

    /// One polled price sample. BUY zones are evaluated before SELL zones
    /// and a side stops at its first fire; a single sample never emits
    /// both a BUY and a SELL trigger. Never propagates an error to the
    /// polling loop.
    pub async fn check_price_triggers(&self, symbol: &str, price: f64) {
        let previous_price = {
            let mut last = self.last_prices.write().await;
            let prev = last.get(symbol).copied();
            last.insert(symbol.to_string(), price);
            prev.unwrap_or(price)
        };

        let Some(zones) = self.zones.zones_for(symbol).await else {
            return; // No configuration for this symbol is not an error
        };
        if zones.is_empty() {
            return;
        }

        // The global cooldown suppresses trigger fires only; transition
        // classification, dwell bookkeeping and crossing notifications
        // still run so an EXIT observed during the window clears the
        // dwell flag.
        let global_ready = self
            .global_cooldowns
            .read()
            .await
            .is_ready(&symbol.to_string());
        if !global_ready {
            debug!("⏳ {} inside global cooldown, triggers suppressed", symbol);
        }

        let (fired, crossings) = {
            let mut tracker = self.tracker.write().await;
            let mut global = self.global_cooldowns.write().await;
            let mut zone_cds = self.zone_cooldowns.write().await;
            let mut crossing_cds = self.crossing_cooldowns.write().await;
            let mut guards = ScanGuards {
                tracker: &mut *tracker,
                global: &mut *global,
                zones: &mut *zone_cds,
                crossings: &mut *crossing_cds,
            };

            // Dwell cleanup runs before transition classification so a
            // sample that exits one zone while entering another does not
            // leak a stale fired flag.
            guards.tracker.clear_lapsed_fired_flags(symbol, price);

            let mut fired = Vec::new();
            let mut crossings = Vec::new();

            let buy_fired = self.scan_side(
                &mut guards,
                symbol,
                TriggerSide::Buy,
                &zones.buy_zones,
                price,
                previous_price,
                global_ready,
                &mut fired,
                &mut crossings,
            );

            if !buy_fired {
                self.scan_side(
                    &mut guards,
                    symbol,
                    TriggerSide::Sell,
                    &zones.sell_zones,
                    price,
                    previous_price,
                    global_ready,
                    &mut fired,
                    &mut crossings,
                );
            }

            (fired, crossings)
        };

        self.deliver(fired, crossings).await;
    }

    /// Gap compensation: between two polls the true price path is
    /// unknown, so a narrow band can be jumped over without ever being
    /// sampled inside. Invoked by the feed on large inter-tick deltas,
    /// never from inside `check_price_triggers`. Best effort only.
    pub async fn check_possible_missed_triggers(
        &self,
        symbol: &str,
        previous_price: f64,
        current_price: f64,
    ) {
        let Some(zones) = self.zones.zones_for(symbol).await else {
            return;
        };
        if zones.is_empty() {
            return;
        }

        let global_ready = self
            .global_cooldowns
            .read()
            .await
            .is_ready(&symbol.to_string());
        if !global_ready {
            debug!(
                "⏳ {} inside global cooldown, missed-crossing triggers suppressed",
                symbol
            );
        }

        let (fired, crossings) = {
            let mut tracker = self.tracker.write().await;
            let mut global = self.global_cooldowns.write().await;
            let mut zone_cds = self.zone_cooldowns.write().await;
            let mut crossing_cds = self.crossing_cooldowns.write().await;
            let mut guards = ScanGuards {
                tracker: &mut *tracker,
                global: &mut *global,
                zones: &mut *zone_cds,
                crossings: &mut *crossing_cds,
            };

            let mut fired = Vec::new();
            let mut crossings = Vec::new();

            let buy_fired = self.scan_side_for_gaps(
                &mut guards,
                symbol,
                TriggerSide::Buy,
                &zones.buy_zones,
                previous_price,
                current_price,
                global_ready,
                &mut fired,
                &mut crossings,
            );

            if !buy_fired {
                self.scan_side_for_gaps(
                    &mut guards,
                    symbol,
                    TriggerSide::Sell,
                    &zones.sell_zones,
                    previous_price,
                    current_price,
                    global_ready,
                    &mut fired,
                    &mut crossings,
                );
            }

            (fired, crossings)
        };

        if !fired.is_empty() {
            info!(
                "🕳️ {} gap check {:.5} → {:.5} synthesized {} trigger(s)",
                symbol,
                previous_price,
                current_price,
                fired.len()
            );
        }

        self.deliver(fired, crossings).await;
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_side(
        &self,
        guards: &mut ScanGuards<'_>,
        symbol: &str,
        side: TriggerSide,
        zones: &[TradingZone],
        price: f64,
        previous_price: f64,
        global_ready: bool,
        fired: &mut Vec<TriggerEvent>,
        crossings: &mut Vec<CrossingEvent>,
    ) -> bool {
        for zone in zones {
            let key = guards.tracker.key(symbol, side, zone);
            let (was_in, is_in) = guards.tracker.update_and_classify(&key, zone, price);

            match (was_in, is_in) {
                (false, true) => {
                    let fired_now = global_ready
                        && self.attempt_fire(guards, &key, symbol, side, zone, price, false, fired);
                    self.attempt_crossing(
                        guards,
                        symbol,
                        side,
                        zone,
                        CrossingKind::Enter,
                        price,
                        previous_price,
                        crossings,
                    );
                    if fired_now {
                        // First fire wins the side; adjacent overlapping
                        // zones stay silent this tick
                        return true;
                    }
                }
                (true, false) => {
                    // Exits never trigger
                    self.attempt_crossing(
                        guards,
                        symbol,
                        side,
                        zone,
                        CrossingKind::Exit,
                        price,
                        previous_price,
                        crossings,
                    );
                }
                (true, true) => {
                    // Sustained dwell: the per-zone retrigger cooldown
                    // replaces the dwell-flag guard
                    if global_ready && guards.zones.is_ready(&key) {
                        let fired_now =
                            self.attempt_fire(guards, &key, symbol, side, zone, price, true, fired);
                        if fired_now {
                            return true;
                        }
                    }
                }
                (false, false) => {}
            }
        }
        false
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_side_for_gaps(
        &self,
        guards: &mut ScanGuards<'_>,
        symbol: &str,
        side: TriggerSide,
        zones: &[TradingZone],
        previous_price: f64,
        current_price: f64,
        global_ready: bool,
        fired: &mut Vec<TriggerEvent>,
        crossings: &mut Vec<CrossingEvent>,
    ) -> bool {
        let mut any_fired = false;

        for zone in zones {
            let lower = zone.lower_bound();
            let upper = zone.upper_bound();

            let was_outside = previous_price < lower || previous_price > upper;
            let entered = was_outside && zone.contains(current_price);
            let jumped_through = (previous_price < lower && current_price > upper)
                || (previous_price > upper && current_price < lower);

            if !entered && !jumped_through {
                continue;
            }

            let key = guards.tracker.key(symbol, side, zone);
            // Record the real observation so the next polled sample
            // classifies against up-to-date dwell state
            guards.tracker.update_and_classify(&key, zone, current_price);

            if global_ready {
                // The true crossing price inside the band is unknown;
                // the zone center stands in for it
                let fired_now =
                    self.attempt_fire(guards, &key, symbol, side, zone, zone.price, false, fired);
                any_fired = any_fired || fired_now;
            }

            let kind = if jumped_through {
                CrossingKind::Through
            } else {
                CrossingKind::Enter
            };
            self.attempt_crossing(
                guards,
                symbol,
                side,
                zone,
                kind,
                current_price,
                previous_price,
                crossings,
            );
        }

        any_fired
    }

    #[allow(clippy::too_many_arguments)]
    fn attempt_fire(
        &self,
        guards: &mut ScanGuards<'_>,
        key: &ZoneKey,
        symbol: &str,
        side: TriggerSide,
        zone: &TradingZone,
        effective_price: f64,
        sustained_dwell: bool,
        fired: &mut Vec<TriggerEvent>,
    ) -> bool {
        if !sustained_dwell && guards.tracker.is_fired(key) {
            debug!(
                "🔕 {} {} zone @ {:.5} already fired this dwell",
                symbol,
                side.as_str(),
                zone.price
            );
            return false;
        }

        guards.tracker.mark_fired(key);
        guards.global.record(symbol.to_string());
        guards.zones.record(key.clone());

        info!(
            "🔔 {} {} trigger fired @ {:.5} (zone {:.5} ±{:.5}, conf {:.0}%)",
            symbol,
            side.as_str(),
            effective_price,
            zone.price,
            zone.tolerance,
            zone.confidence * 100.0
        );

        fired.push(TriggerEvent::new(symbol, side, effective_price, zone));
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn attempt_crossing(
        &self,
        guards: &mut ScanGuards<'_>,
        symbol: &str,
        side: TriggerSide,
        zone: &TradingZone,
        kind: CrossingKind,
        price: f64,
        previous_price: f64,
        crossings: &mut Vec<CrossingEvent>,
    ) {
        let key = CrossingKey::new(symbol, side, zone, kind, self.config.key_decimals);
        if !guards.crossings.is_ready(&key) {
            debug!(
                "🔕 {} {} {} crossing in cooldown",
                symbol,
                side.as_str(),
                kind.as_str()
            );
            return;
        }
        guards.crossings.record(key);

        crossings.push(CrossingEvent::new(
            symbol,
            side,
            kind,
            price,
            previous_price,
            zone,
        ));
    }

    /// Triggers go through the batcher; crossings go straight to the
    /// sink. Failed sends are dropped, never retried.
    async fn deliver(&self, fired: Vec<TriggerEvent>, crossings: Vec<CrossingEvent>) {
        for event in fired {
            self.push_recent(AlertRecord::trigger(&event)).await;
            self.batcher.enqueue(event).await;
        }

        for crossing in crossings {
            self.push_recent(AlertRecord::crossing(&crossing)).await;
            info!(
                "🚪 {} {} {} crossing @ {:.5}",
                crossing.symbol,
                crossing.side.as_str(),
                crossing.kind.as_str(),
                crossing.current_price
            );
            if !self.sink.send(&format_crossing_message(&crossing)).await {
                warn!(
                    "📤 Crossing delivery failed for {} {} {}, dropping",
                    crossing.symbol,
                    crossing.side.as_str(),
                    crossing.kind.as_str()
                );
            }
        }
    }

    async fn push_recent(&self, record: AlertRecord) {
        let mut ring = self.recent_alerts.write().await;
        ring.push_back(record);
        while ring.len() > self.config.recent_alert_limit {
            ring.pop_front();
        }
    }

    /// Refresh hook: wipes every piece of state scoped to `symbol` so
    /// triggers from a previous zone configuration cannot bleed into the
    /// new one. Does not touch an in-flight pending batch.
    pub async fn clear_expired_triggers(&self, symbol: &str) {
        self.tracker.write().await.clear_symbol(symbol);
        self.zone_cooldowns
            .write()
            .await
            .retain(|key| key.symbol != symbol);
        self.crossing_cooldowns
            .write()
            .await
            .retain(|key| key.symbol != symbol);
        self.global_cooldowns.write().await.retain(|key| key != symbol);

        info!("🧹 Cleared trigger state for {}", symbol);
    }

    /// Read-only operational counters.
    pub async fn trigger_statistics(&self) -> TriggerStats {
        let tracker = self.tracker.read().await;
        let global = self.global_cooldowns.read().await;
        let zones = self.zone_cooldowns.read().await;
        let crossings = self.crossing_cooldowns.read().await;

        TriggerStats {
            total_recorded_fires: zones.len() + crossings.len(),
            fires_in_cooldown: zones.active_count() + crossings.active_count(),
            dwell_flags_set: tracker.fired_count(),
            symbols_in_global_cooldown: global.active_count(),
        }
    }

    pub async fn recent_alerts(&self) -> Vec<AlertRecord> {
        self.recent_alerts.read().await.iter().cloned().collect()
    }

    pub async fn pending_batches(&self) -> usize {
        self.batcher.pending_batches().await
    }

    /// Dry run: the same zone-membership check as the trigger scan, with
    /// no cooldown or dwell state touched. Optionally pushes a real
    /// notification through the sink.
    pub async fn test_price_trigger(
        &self,
        symbol: &str,
        test_price: f64,
        force_notification: bool,
    ) -> TestTriggerReport {
        let zones = self.zones.zones_for(symbol).await.unwrap_or_default();

        let mut report_zones = Vec::new();
        for (side, list) in [
            (TriggerSide::Buy, &zones.buy_zones),
            (TriggerSide::Sell, &zones.sell_zones),
        ] {
            for zone in list {
                report_zones.push(TestZoneMatch {
                    side,
                    zone: zone.clone(),
                    in_zone: zone.contains(test_price),
                    distance: (test_price - zone.price).abs(),
                });
            }
        }

        let zones_checked = report_zones.len();
        let zones_in_band = report_zones.iter().filter(|z| z.in_zone).count();

        let mut notification_sent = false;
        if force_notification {
            notification_sent = self
                .sink
                .send(&format_test_message(symbol, test_price, zones_in_band))
                .await;
        }

        info!(
            "🧪 Trigger test for {} @ {:.5}: {}/{} zones contain the price",
            symbol, test_price, zones_in_band, zones_checked
        );

        TestTriggerReport {
            symbol: symbol.to_string(),
            test_price,
            zones_checked,
            zones_in_band,
            zones: report_zones,
            notification_sent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::testing::RecordingSink;
    use crate::types::SymbolZones;
    use crate::zone_cache::ZoneSnapshot;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration as StdDuration;

    fn zone(price: f64, tolerance: f64) -> TradingZone {
        TradingZone {
            price,
            tolerance,
            confidence: 0.8,
        }
    }

    fn test_config() -> TriggerConfig {
        TriggerConfig {
            // Most tests opt out of the global gate; it gets its own test
            global_cooldown: ChronoDuration::zero(),
            retrigger_cooldown: ChronoDuration::minutes(15),
            crossing_cooldown: ChronoDuration::minutes(5),
            batch_window: StdDuration::from_secs(5),
            key_decimals: 8,
            recent_alert_limit: 100,
        }
    }

    async fn engine_with(
        config: TriggerConfig,
        symbol_zones: Vec<(&str, SymbolZones)>,
    ) -> (Arc<TriggerEngine>, Arc<RecordingSink>) {
        let cache = Arc::new(ZoneCache::new());
        let mut snapshot = ZoneSnapshot::default();
        for (symbol, zones) in symbol_zones {
            snapshot.symbols.insert(symbol.to_string(), zones);
        }
        cache.apply_snapshot(snapshot).await;

        let sink = Arc::new(RecordingSink::new());
        let engine = Arc::new(TriggerEngine::new(config, cache, sink.clone()));
        (engine, sink)
    }

    fn buy_zones(zones: Vec<TradingZone>) -> SymbolZones {
        SymbolZones {
            buy_zones: zones,
            sell_zones: vec![],
            computed_at: None,
        }
    }

    fn triggers(sink: &RecordingSink) -> Vec<String> {
        sink.sent()
            .into_iter()
            .filter(|m| m.contains("ZONE TRIGGER") || m.contains("MULTI-ZONE"))
            .collect()
    }

    fn crossings_of(sink: &RecordingSink, kind: &str) -> Vec<String> {
        let needle = format!("ZONE {} CROSSING", kind);
        sink.sent()
            .into_iter()
            .filter(|m| m.contains(&needle))
            .collect()
    }

    async fn flush_batches() {
        tokio::time::sleep(StdDuration::from_secs(6)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_enter_dwell_exit_scenario() {
        // Samples 98 → 100.5 → 100.2 → 97 against buy zone 100 ±1:
        // sample 2 fires ENTER + trigger, sample 3 fires nothing,
        // sample 4 fires EXIT only and clears the dwell flag
        let (engine, sink) = engine_with(
            test_config(),
            vec![("XUSD", buy_zones(vec![zone(100.0, 1.0)]))],
        )
        .await;

        engine.check_price_triggers("XUSD", 98.0).await;
        assert!(sink.sent().is_empty());

        engine.check_price_triggers("XUSD", 100.5).await;
        engine.check_price_triggers("XUSD", 100.2).await;
        engine.check_price_triggers("XUSD", 97.0).await;
        flush_batches().await;

        assert_eq!(triggers(&sink).len(), 1);
        assert_eq!(crossings_of(&sink, "ENTER").len(), 1);
        assert_eq!(crossings_of(&sink, "EXIT").len(), 1);

        let stats = engine.trigger_statistics().await;
        assert_eq!(stats.dwell_flags_set, 0); // Cleared by the exit
    }

    #[tokio::test(start_paused = true)]
    async fn test_dwell_fires_at_most_once() {
        let (engine, sink) = engine_with(
            test_config(),
            vec![("XUSD", buy_zones(vec![zone(100.0, 1.0)]))],
        )
        .await;

        for price in [100.5, 100.3, 100.9, 100.1] {
            engine.check_price_triggers("XUSD", price).await;
        }
        flush_batches().await;

        assert_eq!(triggers(&sink).len(), 1);
        let stats = engine.trigger_statistics().await;
        assert_eq!(stats.dwell_flags_set, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reentry_after_exit_fires_again() {
        let (engine, sink) = engine_with(
            test_config(),
            vec![("XUSD", buy_zones(vec![zone(100.0, 1.0)]))],
        )
        .await;

        engine.check_price_triggers("XUSD", 100.5).await;
        flush_batches().await;
        engine.check_price_triggers("XUSD", 97.0).await;
        engine.check_price_triggers("XUSD", 100.5).await;
        flush_batches().await;

        // Two separate dwells, two triggers (global cooldown disabled)
        assert_eq!(triggers(&sink).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_sample_never_fires_both_sides() {
        let zones = SymbolZones {
            buy_zones: vec![zone(100.0, 1.0)],
            sell_zones: vec![zone(100.4, 1.0)],
            computed_at: None,
        };
        let (engine, sink) = engine_with(test_config(), vec![("XUSD", zones)]).await;

        // 100.4 is inside both bands; BUY is evaluated first and wins
        engine.check_price_triggers("XUSD", 100.4).await;
        flush_batches().await;

        let fired = triggers(&sink);
        assert_eq!(fired.len(), 1);
        assert!(fired[0].contains("BUY"));
        // The SELL side was not scanned at all this tick
        assert_eq!(crossings_of(&sink, "ENTER").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_fire_stops_the_side_scan() {
        // Overlapping buy zones in list order; only the first fires
        let (engine, sink) = engine_with(
            test_config(),
            vec![(
                "XUSD",
                buy_zones(vec![zone(100.0, 1.0), zone(100.2, 1.0)]),
            )],
        )
        .await;

        engine.check_price_triggers("XUSD", 100.1).await;
        flush_batches().await;

        let fired = triggers(&sink);
        assert_eq!(fired.len(), 1);
        assert!(fired[0].contains("100.00000"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_cooldown_suppresses_triggers_not_crossings() {
        let mut config = test_config();
        config.global_cooldown = ChronoDuration::minutes(15);
        let (engine, sink) = engine_with(
            config,
            vec![(
                "XUSD",
                buy_zones(vec![zone(100.0, 1.0), zone(105.0, 1.0)]),
            )],
        )
        .await;

        engine.check_price_triggers("XUSD", 100.5).await; // Fires, arms global cooldown
        engine.check_price_triggers("XUSD", 103.0).await; // Exits zone 1
        engine.check_price_triggers("XUSD", 105.2).await; // Enters zone 2: suppressed
        flush_batches().await;

        assert_eq!(triggers(&sink).len(), 1);
        // The second entry still produced its crossing notification
        assert_eq!(crossings_of(&sink, "ENTER").len(), 2);
        assert_eq!(crossings_of(&sink, "EXIT").len(), 1);

        let stats = engine.trigger_statistics().await;
        assert_eq!(stats.symbols_in_global_cooldown, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suppressed_entry_fires_after_global_expires() {
        let mut config = test_config();
        config.global_cooldown = ChronoDuration::minutes(15);
        let (engine, sink) = engine_with(
            config,
            vec![(
                "XUSD",
                buy_zones(vec![zone(100.0, 1.0), zone(105.0, 1.0)]),
            )],
        )
        .await;

        engine.check_price_triggers("XUSD", 100.5).await;
        engine.check_price_triggers("XUSD", 105.2).await; // Suppressed by global
        flush_batches().await;
        assert_eq!(triggers(&sink).len(), 1);

        // Expire the global window, keep dwelling in zone 2. The entry
        // was never fired, so the dwell flag is clear and the per-zone
        // ledger empty: the sustained dwell path fires.
        engine
            .global_cooldowns
            .write()
            .await
            .backdate("XUSD".to_string(), ChronoDuration::minutes(16));
        engine.check_price_triggers("XUSD", 105.3).await;
        flush_batches().await;

        let fired = triggers(&sink);
        assert_eq!(fired.len(), 2);
        assert!(fired[1].contains("105.00000"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_dwell_retriggers_after_zone_cooldown() {
        let (engine, sink) = engine_with(
            test_config(),
            vec![("XUSD", buy_zones(vec![zone(100.0, 1.0)]))],
        )
        .await;

        engine.check_price_triggers("XUSD", 100.5).await;
        engine.check_price_triggers("XUSD", 100.4).await; // Still inside, cooldown holds
        flush_batches().await;
        assert_eq!(triggers(&sink).len(), 1);

        let key = {
            let tracker = engine.tracker.read().await;
            tracker.key("XUSD", TriggerSide::Buy, &zone(100.0, 1.0))
        };
        engine
            .zone_cooldowns
            .write()
            .await
            .backdate(key, ChronoDuration::minutes(16));

        engine.check_price_triggers("XUSD", 100.4).await;
        flush_batches().await;

        assert_eq!(triggers(&sink).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_through_crossing_fires_at_zone_center() {
        // Zone 50 ±0.5 skipped over entirely by 48 → 53
        let (engine, sink) = engine_with(
            test_config(),
            vec![("XUSD", buy_zones(vec![zone(50.0, 0.5)]))],
        )
        .await;

        engine.check_possible_missed_triggers("XUSD", 48.0, 53.0).await;
        flush_batches().await;

        let fired = triggers(&sink);
        assert_eq!(fired.len(), 1);
        // The effective observed price is the zone center
        assert!(fired[0].contains("*Current Price:* `50.00000`"));
        assert_eq!(crossings_of(&sink, "THROUGH").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_simple_entry_fires_once() {
        let (engine, sink) = engine_with(
            test_config(),
            vec![("XUSD", buy_zones(vec![zone(50.0, 0.5)]))],
        )
        .await;

        engine.check_possible_missed_triggers("XUSD", 48.0, 50.2).await;
        // The gap fire set the dwell flag; the regular check of the same
        // sample must not duplicate the trigger
        engine.check_price_triggers("XUSD", 50.2).await;
        flush_batches().await;

        assert_eq!(triggers(&sink).len(), 1);
        assert_eq!(crossings_of(&sink, "ENTER").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_check_respects_global_cooldown() {
        let mut config = test_config();
        config.global_cooldown = ChronoDuration::minutes(15);
        let zones = SymbolZones {
            buy_zones: vec![zone(100.0, 1.0), zone(50.0, 0.5)],
            sell_zones: vec![],
            computed_at: None,
        };
        let (engine, sink) = engine_with(config, vec![("XUSD", zones)]).await;

        engine.check_price_triggers("XUSD", 100.5).await; // Arms global
        engine.check_possible_missed_triggers("XUSD", 48.0, 53.0).await;
        flush_batches().await;

        // Only the first trigger; the gap crossing is still notified
        assert_eq!(triggers(&sink).len(), 1);
        assert_eq!(crossings_of(&sink, "THROUGH").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_fires_merge_into_one_batch() {
        let (engine, sink) = engine_with(
            test_config(),
            vec![(
                "XUSD",
                buy_zones(vec![zone(100.0, 1.0), zone(103.0, 1.0), zone(106.0, 1.0)]),
            )],
        )
        .await;

        engine.check_price_triggers("XUSD", 100.5).await;
        tokio::time::sleep(StdDuration::from_secs(1)).await;
        engine.check_price_triggers("XUSD", 103.5).await;
        tokio::time::sleep(StdDuration::from_secs(1)).await;
        engine.check_price_triggers("XUSD", 106.5).await;
        flush_batches().await;

        let fired = triggers(&sink);
        assert_eq!(fired.len(), 1);
        assert!(fired[0].contains("MULTI-ZONE BUY TRIGGER"));
        assert!(fired[0].contains("*Zones hit:* `3`"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_crossings_respect_crossing_cooldown() {
        let (engine, sink) = engine_with(
            test_config(),
            vec![("XUSD", buy_zones(vec![zone(100.0, 1.0)]))],
        )
        .await;

        engine.check_price_triggers("XUSD", 100.5).await;
        flush_batches().await;
        engine.check_price_triggers("XUSD", 97.0).await;
        engine.check_price_triggers("XUSD", 100.5).await;
        flush_batches().await;
        engine.check_price_triggers("XUSD", 97.0).await;

        // Both dwells fired a trigger, but each crossing kind was
        // notified once inside its 5-minute window
        assert_eq!(triggers(&sink).len(), 2);
        assert_eq!(crossings_of(&sink, "ENTER").len(), 1);
        assert_eq!(crossings_of(&sink, "EXIT").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_expired_triggers_resets_symbol_state() {
        let (engine, sink) = engine_with(
            test_config(),
            vec![
                ("XUSD", buy_zones(vec![zone(100.0, 1.0)])),
                ("YUSD", buy_zones(vec![zone(10.0, 0.1)])),
            ],
        )
        .await;

        engine.check_price_triggers("XUSD", 100.5).await;
        engine.check_price_triggers("YUSD", 10.05).await;
        flush_batches().await;

        engine.clear_expired_triggers("XUSD").await;

        let stats = engine.trigger_statistics().await;
        assert_eq!(stats.dwell_flags_set, 1); // YUSD untouched

        // A fresh sample inside the band is a new entry after the clear
        engine.check_price_triggers("XUSD", 100.5).await;
        flush_batches().await;
        assert_eq!(triggers(&sink).len(), 3);
    }

    #[tokio::test]
    async fn test_symbol_without_zones_is_skipped() {
        let (engine, sink) = engine_with(test_config(), vec![]).await;

        engine.check_price_triggers("XUSD", 100.5).await;
        engine.check_possible_missed_triggers("XUSD", 48.0, 53.0).await;

        assert!(sink.sent().is_empty());
        let stats = engine.trigger_statistics().await;
        assert_eq!(stats.total_recorded_fires, 0);
    }

    #[tokio::test]
    async fn test_trigger_test_is_a_dry_run() {
        let zones = SymbolZones {
            buy_zones: vec![zone(100.0, 1.0)],
            sell_zones: vec![zone(110.0, 1.0)],
            computed_at: None,
        };
        let (engine, sink) = engine_with(test_config(), vec![("XUSD", zones)]).await;

        let report = engine.test_price_trigger("XUSD", 100.5, false).await;
        assert_eq!(report.zones_checked, 2);
        assert_eq!(report.zones_in_band, 1);
        assert!(!report.notification_sent);
        assert!(sink.sent().is_empty());

        // No cooldown or dwell state was touched
        let stats = engine.trigger_statistics().await;
        assert_eq!(stats.total_recorded_fires, 0);
        assert_eq!(stats.dwell_flags_set, 0);

        let report = engine.test_price_trigger("XUSD", 100.5, true).await;
        assert!(report.notification_sent);
        assert_eq!(sink.sent().len(), 1);
        assert!(sink.sent()[0].contains("TRIGGER TEST"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_statistics_count_recorded_fires() {
        let (engine, sink) = engine_with(
            test_config(),
            vec![("XUSD", buy_zones(vec![zone(100.0, 1.0)]))],
        )
        .await;

        engine.check_price_triggers("XUSD", 100.5).await;
        flush_batches().await;
        assert_eq!(triggers(&sink).len(), 1);

        let stats = engine.trigger_statistics().await;
        // One zone fire plus one ENTER crossing
        assert_eq!(stats.total_recorded_fires, 2);
        assert_eq!(stats.fires_in_cooldown, 2);
        assert_eq!(stats.dwell_flags_set, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recent_alerts_ring_is_capped() {
        let mut config = test_config();
        config.recent_alert_limit = 3;
        config.crossing_cooldown = ChronoDuration::zero();
        let (engine, _sink) = engine_with(
            config,
            vec![("XUSD", buy_zones(vec![zone(100.0, 1.0)]))],
        )
        .await;

        for _ in 0..4 {
            engine.check_price_triggers("XUSD", 100.5).await;
            engine.check_price_triggers("XUSD", 97.0).await;
        }
        flush_batches().await;

        let alerts = engine.recent_alerts().await;
        assert_eq!(alerts.len(), 3);
    }
}
