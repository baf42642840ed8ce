//! Incremental anomaly detection over live ticks.
//!
//! Per instrument the detector keeps a fixed-size rolling window of
//! prices and positive volume deltas, with running sum and sum-of-squares
//! maintained incrementally: on overflow the evicted value's contribution
//! is subtracted before the new one is added, so each tick costs O(1)
//! regardless of window size. Statistics for a check are taken over the
//! window *before* the triggering tick is folded in, so the tick is
//! measured against its own history rather than against itself.

use fnv::FnvHashMap;
use std::collections::VecDeque;
use std::time::Duration;
use strike_core::{InstrumentKey, Signal, SignalKind, SignalMetadata, Tick};
use tracing::debug;

/// Detector thresholds and window sizing.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub window_size: usize,
    /// Minimum samples before any statistic is trusted.
    pub min_samples: usize,
    /// Z-score above which a price move is a spike.
    pub spike_z_threshold: f64,
    /// Multiple of average volume above which a tick is a surge.
    pub volume_surge_ratio: f64,
    /// Absolute rate-of-change (percent) across the window that flags
    /// momentum.
    pub momentum_roc_pct: f64,
    /// Signals weaker than this are discarded.
    pub min_signal_strength: f64,
    /// Re-emission suppression per (instrument, kind).
    pub cooldown: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: 50,
            min_samples: 10,
            spike_z_threshold: 2.0,
            volume_surge_ratio: 2.5,
            momentum_roc_pct: 1.5,
            min_signal_strength: 0.6,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Fixed-capacity window with incrementally maintained moments.
#[derive(Debug, Clone)]
struct RollingStats {
    window: VecDeque<f64>,
    capacity: usize,
    sum: f64,
    sum_sq: f64,
}

impl RollingStats {
    fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    fn push(&mut self, value: f64) {
        if self.window.len() == self.capacity {
            if let Some(evicted) = self.window.pop_front() {
                self.sum -= evicted;
                self.sum_sq -= evicted * evicted;
            }
        }
        self.window.push_back(value);
        self.sum += value;
        self.sum_sq += value * value;
    }

    fn len(&self) -> usize {
        self.window.len()
    }

    fn oldest(&self) -> Option<f64> {
        self.window.front().copied()
    }

    fn mean(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.sum / self.window.len() as f64
        }
    }

    /// Population standard deviation from the running moments. Floating
    /// point drift can push the variance fractionally negative; clamp.
    fn std_dev(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let n = self.window.len() as f64;
        let mean = self.sum / n;
        let variance = (self.sum_sq / n) - mean * mean;
        variance.max(0.0).sqrt()
    }
}

struct InstrumentState {
    prices: RollingStats,
    volumes: RollingStats,
    last_cumulative_volume: u64,
}

/// Emits [`Signal`]s for statistically anomalous price/volume behaviour.
///
/// Owned by the pipeline consumer task; not internally synchronised.
pub struct SignalDetector {
    config: DetectorConfig,
    states: FnvHashMap<InstrumentKey, InstrumentState>,
    cooldowns: FnvHashMap<(InstrumentKey, SignalKind), chrono::DateTime<chrono::Utc>>,
}

impl SignalDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            states: FnvHashMap::default(),
            cooldowns: FnvHashMap::default(),
        }
    }

    /// Process one tick and return signals that cleared both the
    /// strength floor and the per-(instrument, kind) cooldown.
    pub fn process_tick(&mut self, tick: &Tick) -> Vec<Signal> {
        let Some(state) = self.states.get_mut(&tick.key) else {
            // First sight: establish the volume baseline; no statistics
            // are possible yet.
            let mut state = InstrumentState {
                prices: RollingStats::new(self.config.window_size),
                volumes: RollingStats::new(self.config.window_size),
                last_cumulative_volume: tick.volume,
            };
            state.prices.push(tick.last_price);
            self.states.insert(tick.key.clone(), state);
            return Vec::new();
        };

        let tick_volume = tick.volume.saturating_sub(state.last_cumulative_volume) as f64;
        state.last_cumulative_volume = tick.volume;

        let mut candidates = Vec::new();

        // Spike: z-score of the new price against the existing window.
        if state.prices.len() >= self.config.min_samples {
            let mean = state.prices.mean();
            let std_dev = state.prices.std_dev();
            if std_dev > 1e-6 {
                let z_score = (tick.last_price - mean).abs() / std_dev;
                if z_score > self.config.spike_z_threshold {
                    candidates.push((
                        SignalKind::Spike,
                        (z_score / 10.0).min(1.0),
                        SignalMetadata::Spike {
                            z_score,
                            mean,
                            std_dev,
                            price: tick.last_price,
                        },
                    ));
                }
            }
        }

        // Volume surge: the new delta against the average of prior
        // positive deltas.
        if state.volumes.len() >= self.config.min_samples && tick_volume > 0.0 {
            let average = state.volumes.mean();
            if average > 0.0 {
                let ratio = tick_volume / average;
                if ratio > self.config.volume_surge_ratio {
                    candidates.push((
                        SignalKind::VolumeSurge,
                        (ratio / 10.0).min(1.0),
                        SignalMetadata::VolumeSurge {
                            ratio,
                            average_volume: average,
                            tick_volume,
                        },
                    ));
                }
            }
        }

        // Momentum: rate of change from the oldest window price to now.
        if state.prices.len() >= self.config.min_samples {
            if let Some(start_price) = state.prices.oldest() {
                if start_price > 0.0 {
                    let roc_pct = (tick.last_price - start_price) / start_price * 100.0;
                    if roc_pct.abs() > self.config.momentum_roc_pct {
                        candidates.push((
                            SignalKind::Momentum,
                            (roc_pct.abs() / 5.0).min(1.0),
                            SignalMetadata::Momentum {
                                roc_pct,
                                window_start_price: start_price,
                            },
                        ));
                    }
                }
            }
        }

        state.prices.push(tick.last_price);
        if tick_volume > 0.0 {
            state.volumes.push(tick_volume);
        }

        candidates
            .into_iter()
            .filter(|(kind, strength, _)| {
                if *strength < self.config.min_signal_strength {
                    debug!(key = %tick.key, %kind, strength, "signal below strength floor");
                    return false;
                }
                self.cooldown_elapsed(&tick.key, *kind, tick.time)
            })
            .map(|(kind, strength, metadata)| Signal {
                key: tick.key.clone(),
                kind,
                strength,
                metadata,
                price: tick.last_price,
                time: tick.time,
            })
            .collect()
    }

    /// True (and the timer restarted) when the cooldown for this
    /// (instrument, kind) has elapsed.
    fn cooldown_elapsed(
        &mut self,
        key: &InstrumentKey,
        kind: SignalKind,
        now: chrono::DateTime<chrono::Utc>,
    ) -> bool {
        let window = chrono::Duration::from_std(self.config.cooldown)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        match self.cooldowns.get(&(key.clone(), kind)) {
            Some(last) if now.signed_duration_since(*last) < window => {
                debug!(%key, %kind, "signal suppressed by cooldown");
                false
            }
            _ => {
                self.cooldowns.insert((key.clone(), kind), now);
                true
            }
        }
    }

    /// Full-window recomputation used to cross-check the incremental
    /// moments; test-only support.
    #[cfg(test)]
    fn recomputed_stats(&self, key: &InstrumentKey) -> Option<(f64, f64)> {
        let state = self.states.get(key)?;
        let n = state.prices.window.len() as f64;
        if n == 0.0 {
            return None;
        }
        let mean = state.prices.window.iter().sum::<f64>() / n;
        let variance = state
            .prices
            .window
            .iter()
            .map(|price| (price - mean) * (price - mean))
            .sum::<f64>()
            / n;
        Some((mean, variance.sqrt()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn tick_at(key: &str, price: f64, volume: u64, secs: i64) -> Tick {
        let mut tick = Tick::with_last_price(
            InstrumentKey::new(key),
            price,
            Utc.with_ymd_and_hms(2024, 9, 9, 10, 0, 0).unwrap() + chrono::Duration::seconds(secs),
        );
        tick.volume = volume;
        tick
    }

    fn detector(config: DetectorConfig) -> SignalDetector {
        SignalDetector::new(config)
    }

    /// Feed alternating 98/102 prices: mean 100, population std 2.
    fn prime_price_window(detector: &mut SignalDetector, key: &str, samples: usize) {
        for i in 0..samples {
            let price = if i % 2 == 0 { 98.0 } else { 102.0 };
            detector.process_tick(&tick_at(key, price, 0, i as i64));
        }
    }

    #[test]
    fn test_spike_strength_matches_z_score() {
        let mut detector = detector(DetectorConfig {
            spike_z_threshold: 3.0,
            min_signal_strength: 0.1,
            momentum_roc_pct: f64::MAX,
            ..Default::default()
        });

        prime_price_window(&mut detector, "NSE_FO|1", 20);

        // Window mean 100, std 2: a tick at 108 is z = 4.0, strength
        // min(4/10, 1) = 0.4.
        let signals = detector.process_tick(&tick_at("NSE_FO|1", 108.0, 0, 30));
        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.kind, SignalKind::Spike);
        assert!((signal.strength - 0.4).abs() < 1e-9);
        match &signal.metadata {
            SignalMetadata::Spike { z_score, mean, std_dev, price } => {
                assert!((z_score - 4.0).abs() < 1e-9);
                assert!((mean - 100.0).abs() < 1e-9);
                assert!((std_dev - 2.0).abs() < 1e-9);
                assert_eq!(*price, 108.0);
            }
            other => panic!("expected spike metadata, got {other:?}"),
        }
    }

    #[test]
    fn test_spike_below_strength_floor_is_discarded() {
        let mut detector = detector(DetectorConfig {
            spike_z_threshold: 3.0,
            min_signal_strength: 0.6,
            momentum_roc_pct: f64::MAX,
            ..Default::default()
        });

        prime_price_window(&mut detector, "NSE_FO|1", 20);

        // Strength 0.4 < floor 0.6: nothing emitted.
        let signals = detector.process_tick(&tick_at("NSE_FO|1", 108.0, 0, 30));
        assert!(signals.is_empty());
    }

    #[test]
    fn test_cooldown_suppresses_repeat_emissions() {
        let mut detector = detector(DetectorConfig {
            spike_z_threshold: 3.0,
            min_signal_strength: 0.0,
            momentum_roc_pct: f64::MAX,
            cooldown: Duration::from_secs(60),
            ..Default::default()
        });

        prime_price_window(&mut detector, "NSE_FO|1", 20);

        let first = detector.process_tick(&tick_at("NSE_FO|1", 108.0, 0, 30));
        assert_eq!(first.len(), 1);

        // 10 seconds later, still anomalous: suppressed regardless of
        // tick rate.
        let second = detector.process_tick(&tick_at("NSE_FO|1", 109.0, 0, 40));
        assert!(second.iter().all(|s| s.kind != SignalKind::Spike));

        // 61 seconds after the first emission: allowed again.
        let third = detector.process_tick(&tick_at("NSE_FO|1", 115.0, 0, 91));
        assert_eq!(
            third.iter().filter(|s| s.kind == SignalKind::Spike).count(),
            1
        );
    }

    #[test]
    fn test_cooldown_is_per_instrument_and_kind() {
        let mut detector = detector(DetectorConfig {
            spike_z_threshold: 3.0,
            min_signal_strength: 0.0,
            momentum_roc_pct: f64::MAX,
            ..Default::default()
        });

        prime_price_window(&mut detector, "NSE_FO|1", 20);
        prime_price_window(&mut detector, "NSE_FO|2", 20);

        assert_eq!(
            detector
                .process_tick(&tick_at("NSE_FO|1", 108.0, 0, 30))
                .len(),
            1
        );
        // A different instrument is not affected by the first cooldown.
        assert_eq!(
            detector
                .process_tick(&tick_at("NSE_FO|2", 108.0, 0, 31))
                .len(),
            1
        );
    }

    #[test]
    fn test_volume_surge_detection() {
        let mut detector = detector(DetectorConfig {
            spike_z_threshold: f64::MAX,
            momentum_roc_pct: f64::MAX,
            volume_surge_ratio: 2.5,
            min_signal_strength: 0.0,
            ..Default::default()
        });

        // Steady 100-unit deltas build the volume window.
        let mut cumulative = 0;
        for i in 0..15 {
            cumulative += 100;
            detector.process_tick(&tick_at("NSE_FO|1", 100.0, cumulative, i));
        }

        // A 500-unit delta is 5x the average: strength min(5/10, 1).
        cumulative += 500;
        let signals = detector.process_tick(&tick_at("NSE_FO|1", 100.0, cumulative, 20));
        let surge = signals
            .iter()
            .find(|s| s.kind == SignalKind::VolumeSurge)
            .expect("volume surge expected");
        assert!((surge.strength - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_momentum_detection_signed_roc() {
        let mut detector = detector(DetectorConfig {
            spike_z_threshold: f64::MAX,
            volume_surge_ratio: f64::MAX,
            momentum_roc_pct: 1.5,
            min_signal_strength: 0.0,
            window_size: 10,
            cooldown: Duration::ZERO,
            ..Default::default()
        });

        // Ramp from 100 to ~104; over a 10-wide window the oldest
        // retained price keeps the ROC above 1.5%.
        let mut signals = Vec::new();
        for i in 0..20 {
            let price = 100.0 + i as f64 * 0.4;
            signals = detector.process_tick(&tick_at("NSE_FO|1", price, 0, i));
        }

        let momentum = signals
            .iter()
            .find(|s| s.kind == SignalKind::Momentum)
            .expect("momentum expected");
        match &momentum.metadata {
            SignalMetadata::Momentum { roc_pct, .. } => assert!(*roc_pct > 1.5),
            other => panic!("expected momentum metadata, got {other:?}"),
        }
    }

    #[test]
    fn test_incremental_stats_match_full_recomputation() {
        let mut detector = detector(DetectorConfig {
            window_size: 25,
            ..Default::default()
        });
        let key = InstrumentKey::new("NSE_FO|1");

        // Push well past the window capacity so eviction arithmetic is
        // exercised.
        let prices = (0..200).map(|i| 100.0 + ((i * 37) % 17) as f64 * 0.85);
        for (i, price) in prices.enumerate() {
            detector.process_tick(&tick_at("NSE_FO|1", price, 0, i as i64));
        }

        let state = detector.states.get(&key).unwrap();
        let incremental_mean = state.prices.mean();
        let incremental_std = state.prices.std_dev();
        let (full_mean, full_std) = detector.recomputed_stats(&key).unwrap();

        assert!((incremental_mean - full_mean).abs() < 1e-9);
        assert!((incremental_std - full_std).abs() < 1e-9);
    }

    #[test]
    fn test_no_signals_before_min_samples() {
        let mut detector = detector(DetectorConfig {
            spike_z_threshold: 0.1,
            min_signal_strength: 0.0,
            ..Default::default()
        });

        for i in 0..9 {
            let signals = detector.process_tick(&tick_at("NSE_FO|1", 100.0 + i as f64, 0, i));
            assert!(signals.is_empty(), "no signal should fire at sample {i}");
        }
    }
}
