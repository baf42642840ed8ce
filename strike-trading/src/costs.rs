//! Transaction-cost model applied to every round trip.
//!
//! Paper and live trades share this model so simulated P&L carries the
//! same drag a real fill would. Rates default to the prevailing intraday
//! options charges; all of them are configurable.

use strike_core::{CostBreakdown, Side};

/// Rates applied per round trip. Leg values are notionals (price x
/// quantity) of the buy and sell orders.
#[derive(Debug, Clone)]
pub struct CostModel {
    /// Flat fee charged per order; a round trip pays it twice.
    pub brokerage_per_order: f64,
    /// Securities transaction tax on the sell leg.
    pub securities_tax_rate: f64,
    /// Exchange transaction charge on both legs.
    pub transaction_charge_rate: f64,
    /// Services tax on brokerage + transaction charges.
    pub services_tax_rate: f64,
    /// Regulator turnover fee on both legs.
    pub regulatory_fee_rate: f64,
    /// Stamp duty on the buy leg.
    pub stamp_duty_rate: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            brokerage_per_order: 20.0,
            securities_tax_rate: 0.000625,
            transaction_charge_rate: 0.000503,
            services_tax_rate: 0.18,
            regulatory_fee_rate: 0.000001,
            stamp_duty_rate: 0.00003,
        }
    }
}

impl CostModel {
    /// Cost a free round trip; mostly for paper setups that want raw
    /// P&L.
    pub fn free() -> Self {
        Self {
            brokerage_per_order: 0.0,
            securities_tax_rate: 0.0,
            transaction_charge_rate: 0.0,
            services_tax_rate: 0.0,
            regulatory_fee_rate: 0.0,
            stamp_duty_rate: 0.0,
        }
    }

    /// Itemised costs for one round trip given the entry side and both
    /// leg notionals.
    pub fn round_trip(&self, entry_side: Side, entry_value: f64, exit_value: f64) -> CostBreakdown {
        let (buy_value, sell_value) = match entry_side {
            Side::Buy => (entry_value, exit_value),
            Side::Sell => (exit_value, entry_value),
        };
        let turnover = buy_value + sell_value;

        let brokerage = self.brokerage_per_order * 2.0;
        let securities_tax = sell_value * self.securities_tax_rate;
        let transaction_charges = turnover * self.transaction_charge_rate;
        let services_tax = (brokerage + transaction_charges) * self.services_tax_rate;
        let regulatory_fee = turnover * self.regulatory_fee_rate;
        let stamp_duty = buy_value * self.stamp_duty_rate;

        CostBreakdown {
            brokerage,
            securities_tax,
            transaction_charges,
            services_tax,
            regulatory_fee,
            stamp_duty,
        }
    }
}
