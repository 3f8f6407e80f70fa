// src/engine/zone_state.rs
// Per-zone dwell state: is the price currently inside the band, and has
// a trigger already fired during this dwell

use crate::types::{CrossingKind, TradingZone, TriggerSide};
use std::collections::HashMap;

/// Zone identity that survives float noise across snapshot refreshes.
/// Price and tolerance are rounded to a fixed number of decimals and
/// stored as integer ticks so the key stays Eq/Hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ZoneKey {
    pub symbol: String,
    pub side: TriggerSide,
    price_ticks: i64,
    tolerance_ticks: i64,
}

fn to_ticks(value: f64, decimals: u32) -> i64 {
    (value * 10f64.powi(decimals as i32)).round() as i64
}

impl ZoneKey {
    pub fn new(symbol: &str, side: TriggerSide, zone: &TradingZone, decimals: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            price_ticks: to_ticks(zone.price, decimals),
            tolerance_ticks: to_ticks(zone.tolerance, decimals),
        }
    }

    fn band(&self, decimals: u32) -> (f64, f64) {
        let scale = 10f64.powi(decimals as i32);
        let center = self.price_ticks as f64 / scale;
        let tolerance = self.tolerance_ticks as f64 / scale;
        (center - tolerance, center + tolerance)
    }
}

/// Crossing-cooldown key: zone price but not tolerance, plus the kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CrossingKey {
    pub symbol: String,
    pub side: TriggerSide,
    price_ticks: i64,
    kind: CrossingKind,
}

impl CrossingKey {
    pub fn new(
        symbol: &str,
        side: TriggerSide,
        zone: &TradingZone,
        kind: CrossingKind,
        decimals: u32,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            price_ticks: to_ticks(zone.price, decimals),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DwellState {
    pub inside: bool,
    pub fired: bool,
}

#[derive(Debug)]
pub struct ZoneStateTracker {
    states: HashMap<ZoneKey, DwellState>,
    decimals: u32,
}

impl ZoneStateTracker {
    pub fn new(decimals: u32) -> Self {
        Self {
            states: HashMap::new(),
            decimals,
        }
    }

    pub fn key(&self, symbol: &str, side: TriggerSide, zone: &TradingZone) -> ZoneKey {
        ZoneKey::new(symbol, side, zone, self.decimals)
    }

    /// Clears the fired flag of every tracked zone of `symbol` whose band
    /// no longer contains `price`. Must run before transition
    /// classification so a sample that exits one zone while entering
    /// another does not leak a stale flag.
    pub fn clear_lapsed_fired_flags(&mut self, symbol: &str, price: f64) {
        for (key, state) in self.states.iter_mut() {
            if key.symbol != symbol || !state.fired {
                continue;
            }
            let (lower, upper) = key.band(self.decimals);
            if price < lower || price > upper {
                state.fired = false;
            }
        }
    }

    /// Records the new inside/outside observation and reports the
    /// transition. Absent state reads as "not inside".
    pub fn update_and_classify(
        &mut self,
        key: &ZoneKey,
        zone: &TradingZone,
        price: f64,
    ) -> (bool, bool) {
        let is_in = zone.contains(price);
        let state = self.states.entry(key.clone()).or_default();
        let was_in = state.inside;
        state.inside = is_in;
        (was_in, is_in)
    }

    pub fn is_fired(&self, key: &ZoneKey) -> bool {
        self.states.get(key).map(|s| s.fired).unwrap_or(false)
    }

    pub fn mark_fired(&mut self, key: &ZoneKey) {
        self.states.entry(key.clone()).or_default().fired = true;
    }

    pub fn clear_symbol(&mut self, symbol: &str) {
        self.states.retain(|key, _| key.symbol != symbol);
    }

    pub fn fired_count(&self) -> usize {
        self.states.values().filter(|s| s.fired).count()
    }
}
