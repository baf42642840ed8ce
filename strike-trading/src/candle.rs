//! Tick-to-candle aggregation.
//!
//! One mutable in-progress candle per instrument for the configured
//! timeframe. Session volume arrives cumulative on the wire; the
//! aggregator derives per-tick deltas, clamping a decrease to zero (a
//! decrease means the venue reset its session counter, never negative
//! trading). Close callbacks fire synchronously, in registration order,
//! before the closed candle is returned, so no consumer can observe a
//! close out of order with the data it carries.

use fnv::FnvHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use strike_core::{Candle, InstrumentKey, MarketStore, Tick, Timeframe};
use tracing::{debug, warn};

/// Default bound on per-instrument candle history.
pub const DEFAULT_MAX_HISTORY: usize = 1000;

type CandleCallback = Box<dyn Fn(&Candle) + Send + Sync>;

/// Folds ticks into per-instrument candles for one timeframe.
///
/// Owned by the pipeline consumer task; not internally synchronised.
pub struct CandleAggregator {
    timeframe: Timeframe,
    max_history: usize,
    store: Arc<dyn MarketStore>,
    current: FnvHashMap<InstrumentKey, Candle>,
    history: FnvHashMap<InstrumentKey, VecDeque<Candle>>,
    last_volumes: FnvHashMap<InstrumentKey, u64>,
    callbacks: Vec<CandleCallback>,
}

impl CandleAggregator {
    pub fn new(timeframe: Timeframe, store: Arc<dyn MarketStore>) -> Self {
        Self {
            timeframe,
            max_history: DEFAULT_MAX_HISTORY,
            store,
            current: FnvHashMap::default(),
            history: FnvHashMap::default(),
            last_volumes: FnvHashMap::default(),
            callbacks: Vec::new(),
        }
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history.max(1);
        self
    }

    /// Register a synchronous close subscriber. Subscribers run in
    /// registration order on the aggregator's thread.
    pub fn register_close_callback(
        &mut self,
        callback: impl Fn(&Candle) + Send + Sync + 'static,
    ) {
        self.callbacks.push(Box::new(callback));
    }

    /// Fold one tick in. Returns the candle closed by this tick, if any.
    pub fn update(&mut self, tick: &Tick) -> Option<Candle> {
        let volume_delta = self.volume_delta(tick);
        let bucket = self.timeframe.bucket_start(tick.time);

        match self.current.get_mut(&tick.key) {
            None => {
                self.current.insert(
                    tick.key.clone(),
                    Candle::open(
                        tick.key.clone(),
                        self.timeframe,
                        bucket,
                        tick.last_price,
                        volume_delta,
                    ),
                );
                None
            }
            Some(candle) if bucket == candle.bucket_start => {
                candle.update(tick.last_price, volume_delta);
                None
            }
            Some(candle) if bucket > candle.bucket_start => {
                let closed = candle.clone();
                self.current.insert(
                    tick.key.clone(),
                    Candle::open(
                        tick.key.clone(),
                        self.timeframe,
                        bucket,
                        tick.last_price,
                        volume_delta,
                    ),
                );
                self.finish(closed.clone());
                Some(closed)
            }
            Some(candle) => {
                // Out-of-order delivery: the tick belongs to a bucket
                // that already closed. Dropped, never applied
                // retroactively.
                debug!(
                    key = %tick.key,
                    tick_bucket = %bucket,
                    current_bucket = %candle.bucket_start,
                    "late tick dropped"
                );
                None
            }
        }
    }

    /// Closed candles for an instrument, oldest first.
    pub fn history(&self, key: &InstrumentKey) -> Vec<Candle> {
        self.history
            .get(key)
            .map(|candles| candles.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The in-progress candle for an instrument, if one exists.
    pub fn current(&self, key: &InstrumentKey) -> Option<&Candle> {
        self.current.get(key)
    }

    fn finish(&mut self, closed: Candle) {
        // Subscribers observe the close before anything else happens.
        for callback in &self.callbacks {
            callback(&closed);
        }

        if let Err(error) = self.store.record_candle(&closed) {
            // Fire-and-forget: the in-memory close stands regardless.
            warn!(%error, key = %closed.key, "candle persist failed");
        }

        let history = self.history.entry(closed.key.clone()).or_default();
        if history.len() >= self.max_history {
            history.pop_front();
        }
        history.push_back(closed);
    }

    fn volume_delta(&mut self, tick: &Tick) -> u64 {
        match self.last_volumes.get_mut(&tick.key) {
            None => {
                // First sight of the instrument: establish the baseline,
                // contribute nothing.
                self.last_volumes.insert(tick.key.clone(), tick.volume);
                0
            }
            Some(last) => {
                let delta = if tick.volume >= *last {
                    tick.volume - *last
                } else {
                    // Session counter reset; clamp rather than go
                    // negative.
                    debug!(
                        key = %tick.key,
                        previous = *last,
                        current = tick.volume,
                        "cumulative volume decreased, clamping delta to zero"
                    );
                    0
                };
                *last = tick.volume;
                delta
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use strike_core::NoopStore;

    fn tick(key: &str, price: f64, volume: u64, secs: i64) -> Tick {
        let mut tick = Tick::with_last_price(
            InstrumentKey::new(key),
            price,
            Utc.with_ymd_and_hms(2024, 9, 9, 10, 15, 0).unwrap() + chrono::Duration::seconds(secs),
        );
        tick.volume = volume;
        tick
    }

    fn aggregator() -> CandleAggregator {
        CandleAggregator::new(Timeframe::M1, Arc::new(NoopStore))
    }

    #[test]
    fn test_cumulative_volume_decrease_clamps_to_zero() {
        let mut agg = aggregator();

        // Ticks at 10s intervals inside one bucket with cumulative
        // volumes [1000, 1200, 1150]: the decrease contributes zero.
        assert!(agg.update(&tick("NSE_FO|1", 40.0, 1000, 0)).is_none());
        assert!(agg.update(&tick("NSE_FO|1", 41.0, 1200, 10)).is_none());
        assert!(agg.update(&tick("NSE_FO|1", 40.5, 1150, 20)).is_none());

        // Next bucket closes the candle.
        let closed = agg.update(&tick("NSE_FO|1", 40.8, 1160, 60)).unwrap();
        assert_eq!(closed.volume, 200);
        assert_eq!(closed.close, 40.5);
        assert_eq!(closed.open, 40.0);
        assert_eq!(closed.high, 41.0);
        assert!(closed.is_well_formed());
    }

    #[test]
    fn test_close_and_roll_on_new_bucket() {
        let mut agg = aggregator();

        agg.update(&tick("NSE_FO|1", 40.0, 100, 0));
        agg.update(&tick("NSE_FO|1", 42.0, 150, 30));
        let closed = agg.update(&tick("NSE_FO|1", 41.0, 180, 61)).unwrap();

        assert_eq!(
            closed.bucket_start,
            Utc.with_ymd_and_hms(2024, 9, 9, 10, 15, 0).unwrap()
        );
        assert_eq!(closed.high, 42.0);

        let current = agg.current(&InstrumentKey::new("NSE_FO|1")).unwrap();
        assert_eq!(
            current.bucket_start,
            Utc.with_ymd_and_hms(2024, 9, 9, 10, 16, 0).unwrap()
        );
        assert_eq!(current.open, 41.0);
        assert_eq!(current.volume, 30);

        assert_eq!(agg.history(&InstrumentKey::new("NSE_FO|1")).len(), 1);
    }

    #[test]
    fn test_late_tick_is_dropped() {
        let mut agg = aggregator();

        agg.update(&tick("NSE_FO|1", 40.0, 100, 0));
        agg.update(&tick("NSE_FO|1", 41.0, 120, 65));

        // Belongs to the already-closed 10:15 bucket.
        let late = tick("NSE_FO|1", 99.0, 200, 30);
        assert!(agg.update(&late).is_none());

        let current = agg.current(&InstrumentKey::new("NSE_FO|1")).unwrap();
        assert_eq!(current.high, 41.0);
    }

    #[test]
    fn test_instruments_aggregate_independently() {
        let mut agg = aggregator();

        agg.update(&tick("NSE_FO|1", 40.0, 100, 0));
        agg.update(&tick("NSE_FO|2", 90.0, 500, 5));
        let closed = agg.update(&tick("NSE_FO|1", 41.0, 130, 70));

        assert_eq!(closed.unwrap().key.as_str(), "NSE_FO|1");
        assert!(agg.current(&InstrumentKey::new("NSE_FO|2")).is_some());
    }

    #[test]
    fn test_close_callbacks_fire_in_order_before_return() {
        let mut agg = aggregator();
        let first = Arc::new(AtomicUsize::new(0));
        let order_witness = Arc::new(AtomicUsize::new(0));

        let first_clone = Arc::clone(&first);
        let witness_clone = Arc::clone(&order_witness);
        agg.register_close_callback(move |_| {
            first_clone.store(1, Ordering::SeqCst);
        });
        agg.register_close_callback(move |candle| {
            // The first callback must already have run.
            assert_eq!(candle.close, 42.0);
            witness_clone.store(2, Ordering::SeqCst);
        });

        agg.update(&tick("NSE_FO|1", 42.0, 100, 0));
        let closed = agg.update(&tick("NSE_FO|1", 43.0, 120, 60));

        assert!(closed.is_some());
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(order_witness.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut agg = aggregator().with_max_history(3);

        for minute in 0..6 {
            agg.update(&tick("NSE_FO|1", 40.0 + minute as f64, 100, minute * 60));
        }

        let history = agg.history(&InstrumentKey::new("NSE_FO|1"));
        assert_eq!(history.len(), 3);
        // Oldest retained candle is the third one.
        assert_eq!(history[0].open, 42.0);
    }
}
