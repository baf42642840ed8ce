//! Real-time market update for a single instrument.

use crate::InstrumentKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One decoded market update.
///
/// `volume` is cumulative for the trading session, not a per-tick delta;
/// downstream consumers derive deltas themselves. Fields a sparse feed
/// variant does not carry are left at zero, mirroring the wire contract.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Tick {
    pub key: InstrumentKey,
    pub last_price: f64,
    pub day_open: f64,
    pub day_high: f64,
    pub day_low: f64,
    pub day_close: f64,
    /// Cumulative session volume.
    pub volume: u64,
    pub open_interest: u64,
    pub bid: f64,
    pub bid_qty: u64,
    pub ask: f64,
    pub ask_qty: u64,
    pub greeks: Option<Greeks>,
    pub time: DateTime<Utc>,
}

impl Tick {
    /// Minimal tick carrying only a last price, as produced by the
    /// LTP-only feed variant.
    pub fn with_last_price(key: InstrumentKey, last_price: f64, time: DateTime<Utc>) -> Self {
        Self {
            key,
            last_price,
            day_open: 0.0,
            day_high: 0.0,
            day_low: 0.0,
            day_close: 0.0,
            volume: 0,
            open_interest: 0,
            bid: 0.0,
            bid_qty: 0,
            ask: 0.0,
            ask_qty: 0,
            greeks: None,
            time,
        }
    }

    /// Mid price when both sides of the book are quoted, else the last
    /// traded price.
    pub fn mid_or_last(&self) -> f64 {
        if self.bid > 0.0 && self.ask > 0.0 {
            (self.bid + self.ask) / 2.0
        } else {
            self.last_price
        }
    }
}

/// Option sensitivity metrics carried as feed fields; never computed here.
#[derive(Copy, Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    /// Implied volatility, quoted alongside the greeks on the wire.
    pub iv: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_mid_or_last() {
        let mut tick = Tick::with_last_price(InstrumentKey::new("NSE_FO|1"), 100.0, Utc::now());
        assert_eq!(tick.mid_or_last(), 100.0);

        tick.bid = 99.0;
        tick.ask = 101.0;
        assert_eq!(tick.mid_or_last(), 100.0);

        tick.ask = 0.0;
        assert_eq!(tick.mid_or_last(), 100.0);
    }
}
