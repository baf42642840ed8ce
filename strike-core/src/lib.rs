//! Core domain types for the Strike intraday trading pipeline.
//!
//! Every other crate in the workspace speaks in terms of these types: the
//! feed layer produces [`Tick`]s keyed by [`InstrumentKey`], the trading
//! layer folds them into [`Candle`]s, raises [`Signal`]s, and drives
//! [`Trade`] lifecycles. External collaborators (persistence, alerting)
//! are reached through the [`MarketStore`] and [`Notifier`] traits so the
//! pipeline itself never owns an I/O surface.

use chrono::{DateTime, TimeZone, Utc};
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

pub mod candle;
pub mod notify;
pub mod signal;
pub mod store;
pub mod tick;
pub mod trade;

pub use candle::Candle;
pub use notify::{DailySummary, NotificationEvent, Notifier};
pub use signal::{Signal, SignalKind, SignalMetadata};
pub use store::{MarketStore, NoopStore, StoreError};
pub use tick::{Greeks, Tick};
pub use trade::{CostBreakdown, OrderId, Trade, TradeId, TradeStatus};

/// Opaque exchange + identifier string uniquely addressing a tradable
/// contract (eg. `NSE_FO|60965`).
#[derive(
    Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct InstrumentKey(SmolStr);

impl InstrumentKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(SmolStr::new(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InstrumentKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Buy/Sell side of an order or trade.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    #[display("BUY")]
    Buy,
    #[display("SELL")]
    Sell,
}

impl Side {
    /// Side of the order that closes a position opened on this side.
    pub fn opposing(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Candle timeframe tag.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize, Display)]
pub enum Timeframe {
    #[display("1m")]
    M1,
    #[display("5m")]
    M5,
    #[display("15m")]
    M15,
}

impl Timeframe {
    /// Bucket width in seconds.
    pub fn secs(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
        }
    }

    /// Floor `time` to the start of the bucket containing it.
    pub fn bucket_start(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        let secs = time.timestamp();
        let floored = secs - secs.rem_euclid(self.secs());
        Utc.timestamp_opt(floored, 0)
            .single()
            .unwrap_or(time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_key_round_trip() {
        let key = InstrumentKey::new("NSE_FO|60965");
        assert_eq!(key.as_str(), "NSE_FO|60965");
        assert_eq!(key.to_string(), "NSE_FO|60965");

        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#""NSE_FO|60965""#);
    }

    #[test]
    fn test_side_opposing() {
        assert_eq!(Side::Buy.opposing(), Side::Sell);
        assert_eq!(Side::Sell.opposing(), Side::Buy);
    }

    #[test]
    fn test_timeframe_bucket_start_floors_to_minute() {
        let time = Utc.with_ymd_and_hms(2024, 9, 9, 10, 15, 42).unwrap();
        let bucket = Timeframe::M1.bucket_start(time);
        assert_eq!(bucket, Utc.with_ymd_and_hms(2024, 9, 9, 10, 15, 0).unwrap());

        let bucket = Timeframe::M5.bucket_start(time);
        assert_eq!(bucket, Utc.with_ymd_and_hms(2024, 9, 9, 10, 15, 0).unwrap());

        let time = Utc.with_ymd_and_hms(2024, 9, 9, 10, 17, 3).unwrap();
        let bucket = Timeframe::M5.bucket_start(time);
        assert_eq!(bucket, Utc.with_ymd_and_hms(2024, 9, 9, 10, 15, 0).unwrap());
    }
}
