//! Persistence collaborator interface.
//!
//! The pipeline treats storage as fire-and-forget: implementations must
//! queue or complete quickly and never block the tick hot path. A failed
//! write is the caller's to log; it is never escalated into rolling back
//! in-memory state.

use crate::{Candle, Tick, Trade};
use thiserror::Error;

/// Error surfaced by a [`MarketStore`] implementation.
#[derive(Debug, Clone, Error)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

/// Append/upsert sink for market data and trade state.
pub trait MarketStore: Send + Sync {
    fn record_tick(&self, tick: &Tick) -> Result<(), StoreError>;
    fn record_candle(&self, candle: &Candle) -> Result<(), StoreError>;
    fn upsert_trade(&self, trade: &Trade) -> Result<(), StoreError>;
}

/// Store that discards everything; default when no persistence is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStore;

impl MarketStore for NoopStore {
    fn record_tick(&self, _: &Tick) -> Result<(), StoreError> {
        Ok(())
    }

    fn record_candle(&self, _: &Candle) -> Result<(), StoreError> {
        Ok(())
    }

    fn upsert_trade(&self, _: &Trade) -> Result<(), StoreError> {
        Ok(())
    }
}
