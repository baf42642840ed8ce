//! Trade lifecycle types.

use crate::{InstrumentKey, Side};
use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Monotonic identifier assigned by the execution engine.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct TradeId(pub u64);

/// Venue (or simulated) order identifier.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize, Display, From)]
pub struct OrderId(SmolStr);

impl OrderId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id.as_ref()))
    }
}

/// Trade lifecycle states. `Open` is the only non-terminal state.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    #[display("OPEN")]
    Open,
    /// Closed by square-off or an explicit instruction.
    #[display("CLOSED")]
    Closed,
    #[display("STOPPED_OUT")]
    StoppedOut,
    #[display("TAKE_PROFIT")]
    TakeProfit,
    #[display("TRAILING_SL")]
    TrailingSl,
}

impl TradeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeStatus::Open)
    }
}

/// Itemised transaction costs for one round trip (entry + exit).
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct CostBreakdown {
    /// Flat fee, charged per order on both legs.
    pub brokerage: f64,
    /// Securities transaction tax on the sell leg.
    pub securities_tax: f64,
    /// Exchange transaction charge on both legs.
    pub transaction_charges: f64,
    /// Services tax levied on brokerage + transaction charges.
    pub services_tax: f64,
    /// Regulator turnover fee on both legs.
    pub regulatory_fee: f64,
    /// Stamp duty on the buy leg.
    pub stamp_duty: f64,
}

impl CostBreakdown {
    pub fn total(&self) -> f64 {
        self.brokerage
            + self.securities_tax
            + self.transaction_charges
            + self.services_tax
            + self.regulatory_fee
            + self.stamp_duty
    }
}

/// One position lifecycle: opened by the execution engine on a validated
/// signal, mutated only by the engine, terminal once closed.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Trade {
    pub id: TradeId,
    pub key: InstrumentKey,
    pub side: Side,
    pub quantity: u64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Ratchets monotonically toward the market; never loosened.
    pub trailing_stop: f64,
    pub status: TradeStatus,
    pub entry_order_id: OrderId,
    pub exit_order_id: Option<OrderId>,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    /// Realized net P&L, populated on close.
    pub pnl: Option<f64>,
    pub costs: Option<CostBreakdown>,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    /// Entry notional value.
    pub fn notional(&self) -> f64 {
        self.entry_price * self.quantity as f64
    }

    /// Gross P&L at `exit_price`, before transaction costs.
    pub fn gross_pnl(&self, exit_price: f64) -> f64 {
        let per_unit = match self.side {
            Side::Buy => exit_price - self.entry_price,
            Side::Sell => self.entry_price - exit_price,
        };
        per_unit * self.quantity as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn trade(side: Side) -> Trade {
        Trade {
            id: TradeId(1),
            key: InstrumentKey::new("NSE_FO|1"),
            side,
            quantity: 100,
            entry_price: 50.0,
            stop_loss: 47.5,
            take_profit: 52.0,
            trailing_stop: 47.5,
            status: TradeStatus::Open,
            entry_order_id: OrderId::new("ord-1"),
            exit_order_id: None,
            entry_time: Utc::now(),
            exit_time: None,
            exit_price: None,
            pnl: None,
            costs: None,
        }
    }

    #[test]
    fn test_gross_pnl_by_side() {
        assert_eq!(trade(Side::Buy).gross_pnl(52.0), 200.0);
        assert_eq!(trade(Side::Buy).gross_pnl(48.0), -200.0);
        assert_eq!(trade(Side::Sell).gross_pnl(48.0), 200.0);
        assert_eq!(trade(Side::Sell).gross_pnl(52.0), -200.0);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TradeStatus::Open.is_terminal());
        for status in [
            TradeStatus::Closed,
            TradeStatus::StoppedOut,
            TradeStatus::TakeProfit,
            TradeStatus::TrailingSl,
        ] {
            assert!(status.is_terminal());
        }
    }

    #[test]
    fn test_cost_breakdown_total() {
        let costs = CostBreakdown {
            brokerage: 40.0,
            securities_tax: 3.1,
            transaction_charges: 5.0,
            services_tax: 8.1,
            regulatory_fee: 0.01,
            stamp_duty: 0.15,
        };
        assert!((costs.total() - 56.36).abs() < 1e-9);
    }
}
