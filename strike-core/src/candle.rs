//! OHLCV aggregate over a fixed time bucket.

use crate::{InstrumentKey, Timeframe};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLCV candle.
///
/// `volume` is a per-bucket delta, not the session cumulative carried on
/// the wire. Immutable once the aggregator closes it.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Candle {
    pub key: InstrumentKey,
    pub timeframe: Timeframe,
    /// Start of the bucket this candle covers.
    pub bucket_start: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Candle {
    /// Open a candle from the first tick of a bucket.
    pub fn open(
        key: InstrumentKey,
        timeframe: Timeframe,
        bucket_start: DateTime<Utc>,
        price: f64,
        volume: u64,
    ) -> Self {
        Self {
            key,
            timeframe,
            bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }

    /// Fold a subsequent in-bucket trade into the candle.
    pub fn update(&mut self, price: f64, volume_delta: u64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += volume_delta;
    }

    /// Range invariant every closed candle satisfies by construction.
    pub fn is_well_formed(&self) -> bool {
        self.high >= self.open.max(self.close) && self.low <= self.open.min(self.close)
    }
}
