// src/types.rs
// Data structures shared by the trigger engine and its collaborators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TriggerSide {
    Buy,
    Sell,
}

impl TriggerSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSide::Buy => "BUY",
            TriggerSide::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CrossingKind {
    Enter,
    Exit,
    Through,
}

impl CrossingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrossingKind::Enter => "ENTER",
            CrossingKind::Exit => "EXIT",
            CrossingKind::Through => "THROUGH",
        }
    }
}

/// A price level with a symmetric tolerance band and a confidence score.
/// Immutable snapshot row read from the zone source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingZone {
    pub price: f64,
    pub tolerance: f64,
    pub confidence: f64,
}

impl TradingZone {
    pub fn lower_bound(&self) -> f64 {
        self.price - self.tolerance
    }

    pub fn upper_bound(&self) -> f64 {
        self.price + self.tolerance
    }

    /// Band membership with inclusive bounds.
    pub fn contains(&self, price: f64) -> bool {
        price >= self.lower_bound() && price <= self.upper_bound()
    }
}

/// Latest zone lists for one symbol. Supplied order is evaluation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolZones {
    #[serde(default)]
    pub buy_zones: Vec<TradingZone>,
    #[serde(default)]
    pub sell_zones: Vec<TradingZone>,
    #[serde(default)]
    pub computed_at: Option<DateTime<Utc>>,
}

impl SymbolZones {
    pub fn is_empty(&self) -> bool {
        self.buy_zones.is_empty() && self.sell_zones.is_empty()
    }

    /// Snapshot equality that ignores the computation timestamp.
    pub fn same_zones(&self, other: &SymbolZones) -> bool {
        self.buy_zones == other.buy_zones && self.sell_zones == other.sell_zones
    }
}

/// One fired trigger, queued for batched delivery.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerEvent {
    pub id: Uuid,
    pub symbol: String,
    pub side: TriggerSide,
    pub current_price: f64,
    pub target_price: f64,
    pub tolerance: f64,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn new(symbol: &str, side: TriggerSide, current_price: f64, zone: &TradingZone) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            current_price,
            target_price: zone.price,
            tolerance: zone.tolerance,
            confidence: zone.confidence,
            timestamp: Utc::now(),
        }
    }
}

/// Lower-significance boundary-crossed notification, delivered directly
/// (never batched).
#[derive(Debug, Clone, Serialize)]
pub struct CrossingEvent {
    pub symbol: String,
    pub side: TriggerSide,
    pub kind: CrossingKind,
    pub current_price: f64,
    pub previous_price: f64,
    pub target_price: f64,
    pub tolerance: f64,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl CrossingEvent {
    pub fn new(
        symbol: &str,
        side: TriggerSide,
        kind: CrossingKind,
        current_price: f64,
        previous_price: f64,
        zone: &TradingZone,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            kind,
            current_price,
            previous_price,
            target_price: zone.price,
            tolerance: zone.tolerance,
            confidence: zone.confidence,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub symbol: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}
