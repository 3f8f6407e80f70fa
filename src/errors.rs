// src/errors.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Zone snapshot read error: {0}")]
    SnapshotIo(#[from] std::io::Error),
    #[error("Zone snapshot parse error: {0}")]
    SnapshotParse(#[from] serde_json::Error),
    #[error("Price fetch error: {0}")]
    PriceFetch(#[from] reqwest::Error),
    #[error("Ticker response missing a usable last price")]
    PriceMissing,
    #[error("Telegram error: {0}")]
    Telegram(String),
}
