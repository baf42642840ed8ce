//! Last-price cache fed by every decoded tick.
//!
//! The canonical fallback price source for the risk engine whenever the
//! live connection is down. Staleness is surfaced explicitly so callers
//! decide what a too-old price means for them; the cache never silently
//! serves one as fresh.

use fnv::FnvHashMap;
use parking_lot::RwLock;
use std::time::{Duration, Instant};
use strike_core::InstrumentKey;

/// Default age past which a cached price is reported as stale.
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(30);

#[derive(Copy, Clone, Debug)]
struct PricePoint {
    price: f64,
    at: Instant,
}

/// Caller-facing answer for a price lookup.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PriceVerdict {
    Fresh(f64),
    /// Known price, but last heard longer ago than the staleness
    /// threshold.
    Stale { price: f64, age: Duration },
    Missing,
}

impl PriceVerdict {
    /// The price regardless of freshness, if any is known.
    pub fn any_price(&self) -> Option<f64> {
        match self {
            PriceVerdict::Fresh(price) => Some(*price),
            PriceVerdict::Stale { price, .. } => Some(*price),
            PriceVerdict::Missing => None,
        }
    }

    pub fn fresh_price(&self) -> Option<f64> {
        match self {
            PriceVerdict::Fresh(price) => Some(*price),
            _ => None,
        }
    }
}

/// Shared instrument -> last price map. Written by the feed receive path
/// only; read concurrently by the monitor loops.
#[derive(Debug)]
pub struct PriceCache {
    prices: RwLock<FnvHashMap<InstrumentKey, PricePoint>>,
    staleness: Duration,
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new(DEFAULT_STALENESS)
    }
}

impl PriceCache {
    pub fn new(staleness: Duration) -> Self {
        Self {
            prices: RwLock::new(FnvHashMap::default()),
            staleness,
        }
    }

    pub fn update(&self, key: &InstrumentKey, price: f64) {
        self.prices.write().insert(
            key.clone(),
            PricePoint {
                price,
                at: Instant::now(),
            },
        );
    }

    /// Look up the latest known price with a staleness verdict.
    pub fn latest(&self, key: &InstrumentKey) -> PriceVerdict {
        match self.prices.read().get(key) {
            Some(point) => {
                let age = point.at.elapsed();
                if age <= self.staleness {
                    PriceVerdict::Fresh(point.price)
                } else {
                    PriceVerdict::Stale {
                        price: point.price,
                        age,
                    }
                }
            }
            None => PriceVerdict::Missing,
        }
    }

    pub fn len(&self) -> usize {
        self.prices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.read().is_empty()
    }
}
