//! Account-level risk gates and position sizing.
//!
//! Equity is always recomputed from the trade history (principal plus
//! cumulative realized P&L) rather than carried as a running counter, so
//! it cannot drift from the trades that produced it. Daily bounds scale
//! off that current equity, not a cached opening balance.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use strike_core::{InstrumentKey, Trade};
use thiserror::Error;

/// Why a trade open was denied. Expected in normal operation; logged at
/// low severity and never propagated past the execution engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskDenied {
    #[error("max concurrent positions reached ({open}/{max})")]
    MaxPositions { open: usize, max: usize },

    #[error("an open trade already exists for {key}")]
    AlreadyOpen { key: InstrumentKey },

    #[error("daily loss limit hit: realized {realized:.2} <= -{limit:.2}")]
    DailyLossLimit { realized: f64, limit: f64 },

    #[error("daily profit target hit: realized {realized:.2} >= {target:.2}")]
    DailyProfitTarget { realized: f64, target: f64 },

    #[error("daily trade cap reached ({count}/{cap})")]
    DailyTradeCap { count: usize, cap: usize },

    #[error("price {price:.2} too large for any position at current equity")]
    InsufficientCapital { price: f64 },
}

/// Risk configuration. Percentages are fractions of current equity.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Starting account capital.
    pub principal: f64,
    /// Fraction of equity allocated per position.
    pub allocation_pct: f64,
    /// Absolute cap on a single position's notional.
    pub absolute_position_cap: f64,
    pub daily_loss_limit_pct: f64,
    pub daily_profit_target_pct: f64,
    pub max_concurrent_positions: usize,
    pub daily_trade_cap: usize,
    /// Exchange-local offset used to delimit the trading day.
    pub market_offset: FixedOffset,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            principal: 100_000.0,
            allocation_pct: 0.30,
            absolute_position_cap: 30_000.0,
            daily_loss_limit_pct: 0.02,
            daily_profit_target_pct: 0.04,
            max_concurrent_positions: 3,
            daily_trade_cap: 20,
            market_offset: FixedOffset::east_opt(5 * 3600 + 1800)
                .expect("static offset is valid"),
        }
    }
}

/// Validates candidate opens and sizes positions against the live trade
/// history.
#[derive(Debug, Clone)]
pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Current equity: principal plus every realized net P&L on record.
    pub fn equity(&self, trades: &[Trade]) -> f64 {
        self.config.principal + trades.iter().filter_map(|trade| trade.pnl).sum::<f64>()
    }

    /// Realized net P&L for trades closed on the current trading day.
    pub fn realized_pnl_today(&self, trades: &[Trade], now: DateTime<Utc>) -> f64 {
        let today = self.trading_day(now);
        trades
            .iter()
            .filter(|trade| {
                trade
                    .exit_time
                    .is_some_and(|exit| self.trading_day(exit) == today)
            })
            .filter_map(|trade| trade.pnl)
            .sum()
    }

    /// All four open gates, in order: concurrency, per-instrument
    /// exclusivity, daily P&L bounds, daily trade cap.
    pub fn validate_open(
        &self,
        key: &InstrumentKey,
        trades: &[Trade],
        now: DateTime<Utc>,
    ) -> Result<(), RiskDenied> {
        let open: Vec<&Trade> = trades.iter().filter(|trade| trade.is_open()).collect();

        if open.len() >= self.config.max_concurrent_positions {
            return Err(RiskDenied::MaxPositions {
                open: open.len(),
                max: self.config.max_concurrent_positions,
            });
        }

        if open.iter().any(|trade| &trade.key == key) {
            return Err(RiskDenied::AlreadyOpen { key: key.clone() });
        }

        let equity = self.equity(trades);
        let realized = self.realized_pnl_today(trades, now);
        let loss_limit = equity * self.config.daily_loss_limit_pct;
        let profit_target = equity * self.config.daily_profit_target_pct;

        if realized <= -loss_limit {
            return Err(RiskDenied::DailyLossLimit {
                realized,
                limit: loss_limit,
            });
        }
        if realized >= profit_target {
            return Err(RiskDenied::DailyProfitTarget {
                realized,
                target: profit_target,
            });
        }

        let today = self.trading_day(now);
        let opened_today = trades
            .iter()
            .filter(|trade| self.trading_day(trade.entry_time) == today)
            .count();
        if opened_today >= self.config.daily_trade_cap {
            return Err(RiskDenied::DailyTradeCap {
                count: opened_today,
                cap: self.config.daily_trade_cap,
            });
        }

        Ok(())
    }

    /// Position size: `min(equity * allocation, absolute cap) / price`,
    /// floored, at least one unit.
    pub fn position_size(
        &self,
        trades: &[Trade],
        price: f64,
    ) -> Result<u64, RiskDenied> {
        if price <= 0.0 {
            return Err(RiskDenied::InsufficientCapital { price });
        }
        let allocation = (self.equity(trades) * self.config.allocation_pct)
            .min(self.config.absolute_position_cap);
        let quantity = (allocation / price).floor() as u64;
        Ok(quantity.max(1))
    }

    fn trading_day(&self, time: DateTime<Utc>) -> NaiveDate {
        time.with_timezone(&self.config.market_offset).date_naive()
    }
}
