//! Risk-gated trade execution state machine.
//!
//! The engine exclusively owns every [`Trade`] transition:
//! `Open -> Closed | StoppedOut | TakeProfit | TrailingSl`, all terminal.
//! Paper and live trading share this code path in full; only the injected
//! [`OrderGateway`] differs. Reservations guard the open path so at most
//! one open trade can ever exist per instrument, no matter how signals
//! interleave; an in-flight close marker does the same for the exit path.

use crate::costs::CostModel;
use crate::gateway::{GatewayError, OrderGateway, OrderRequest};
use crate::risk::{RiskDenied, RiskEngine};
use chrono::Utc;
use fnv::FnvHashSet;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use strike_core::{
    DailySummary, InstrumentKey, MarketStore, NotificationEvent, Notifier, Side, Signal,
    SignalMetadata, Trade, TradeId, TradeStatus,
};
use strike_feed::{PriceCache, PriceVerdict};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Execution parameters; stop distances are fractions of entry price.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub trailing_stop_pct: f64,
    pub monitor_interval: Duration,
    pub paper_mode: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: 0.05,
            take_profit_pct: 0.04,
            trailing_stop_pct: 0.02,
            monitor_interval: Duration::from_secs(1),
            paper_mode: true,
        }
    }
}

/// Why an open attempt produced no trade.
#[derive(Debug, Error)]
pub enum OpenError {
    /// Expected during normal operation; logged at low severity.
    #[error(transparent)]
    Risk(#[from] RiskDenied),

    /// The order never reached the venue; the attempt is abandoned.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Default)]
struct Ledger {
    trades: Vec<Trade>,
    next_id: u64,
    /// Instruments with an open attempt in flight.
    reserved: FnvHashSet<InstrumentKey>,
    /// Trades with a close order in flight.
    closing: FnvHashSet<TradeId>,
}

/// Drives trade lifecycles from validated signals through monitored
/// exits.
pub struct ExecutionEngine {
    config: ExecutionConfig,
    risk: RiskEngine,
    costs: CostModel,
    gateway: Arc<dyn OrderGateway>,
    store: Arc<dyn MarketStore>,
    notifier: Arc<dyn Notifier>,
    cache: Arc<PriceCache>,
    ledger: Mutex<Ledger>,
}

impl ExecutionEngine {
    pub fn new(
        config: ExecutionConfig,
        risk: RiskEngine,
        costs: CostModel,
        gateway: Arc<dyn OrderGateway>,
        store: Arc<dyn MarketStore>,
        notifier: Arc<dyn Notifier>,
        cache: Arc<PriceCache>,
    ) -> Self {
        Self {
            config,
            risk,
            costs,
            gateway,
            store,
            notifier,
            cache,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Snapshot of every trade on record.
    pub fn trades(&self) -> Vec<Trade> {
        self.ledger.lock().trades.clone()
    }

    pub fn open_positions(&self) -> usize {
        self.ledger.lock().trades.iter().filter(|t| t.is_open()).count()
    }

    /// Validate, size and open a trade from a signal. Risk denials and
    /// gateway failures surface as typed errors; neither leaves residue
    /// in the ledger.
    pub async fn handle_signal(&self, signal: &Signal) -> Result<TradeId, OpenError> {
        let side = side_for(signal);
        let price = signal.price;
        let now = signal.time;

        // Reserve the instrument under the lock so no concurrent signal
        // can pass validation for the same key.
        let quantity = {
            let mut ledger = self.ledger.lock();

            if ledger.reserved.contains(&signal.key) {
                return Err(RiskDenied::AlreadyOpen {
                    key: signal.key.clone(),
                }
                .into());
            }
            self.risk.validate_open(&signal.key, &ledger.trades, now)?;

            let open = ledger.trades.iter().filter(|t| t.is_open()).count();
            if open + ledger.reserved.len() >= self.risk.config().max_concurrent_positions {
                return Err(RiskDenied::MaxPositions {
                    open: open + ledger.reserved.len(),
                    max: self.risk.config().max_concurrent_positions,
                }
                .into());
            }

            let quantity = self.risk.position_size(&ledger.trades, price)?;
            ledger.reserved.insert(signal.key.clone());
            quantity
        };

        let request = OrderRequest::market(signal.key.clone(), side, quantity);
        let order_id = match self.gateway.place_order(&request).await {
            Ok(order_id) => order_id,
            Err(error) => {
                self.ledger.lock().reserved.remove(&signal.key);
                warn!(key = %signal.key, %error, "open order failed, attempt abandoned");
                return Err(error.into());
            }
        };

        let (stop_loss, take_profit) = match side {
            Side::Buy => (
                price * (1.0 - self.config.stop_loss_pct),
                price * (1.0 + self.config.take_profit_pct),
            ),
            Side::Sell => (
                price * (1.0 + self.config.stop_loss_pct),
                price * (1.0 - self.config.take_profit_pct),
            ),
        };

        let trade = {
            let mut ledger = self.ledger.lock();
            let id = TradeId(ledger.next_id);
            ledger.next_id += 1;

            let trade = Trade {
                id,
                key: signal.key.clone(),
                side,
                quantity,
                entry_price: price,
                stop_loss,
                take_profit,
                trailing_stop: stop_loss,
                status: TradeStatus::Open,
                entry_order_id: order_id,
                exit_order_id: None,
                entry_time: now,
                exit_time: None,
                exit_price: None,
                pnl: None,
                costs: None,
            };
            ledger.trades.push(trade.clone());
            ledger.reserved.remove(&signal.key);
            trade
        };

        info!(
            id = %trade.id,
            key = %trade.key,
            side = %trade.side,
            quantity = trade.quantity,
            entry = trade.entry_price,
            sl = trade.stop_loss,
            tp = trade.take_profit,
            signal = %signal.kind,
            "trade opened"
        );
        self.persist(&trade);
        self.notifier.notify(NotificationEvent::TradeOpened {
            key: trade.key.clone(),
            side: trade.side,
            quantity: trade.quantity,
            entry_price: trade.entry_price,
            stop_loss: trade.stop_loss,
            take_profit: trade.take_profit,
        });

        Ok(trade.id)
    }

    /// One monitor pass: check every open trade against the latest
    /// usable price, closing on TP/SL hits and ratcheting trailing stops
    /// otherwise. Order failures are non-fatal; the trade stays open for
    /// the next tick.
    pub async fn monitor_once(&self) {
        let open: Vec<Trade> = {
            let ledger = self.ledger.lock();
            ledger
                .trades
                .iter()
                .filter(|t| t.is_open() && !ledger.closing.contains(&t.id))
                .cloned()
                .collect()
        };

        for trade in open {
            let price = match self.cache.latest(&trade.key) {
                PriceVerdict::Fresh(price) => price,
                PriceVerdict::Stale { age, .. } => {
                    debug!(key = %trade.key, ?age, "price stale, skipping monitor pass");
                    continue;
                }
                PriceVerdict::Missing => {
                    debug!(key = %trade.key, "no cached price yet");
                    continue;
                }
            };

            let (tp_hit, stop_hit) = match trade.side {
                Side::Buy => (price >= trade.take_profit, price <= trade.trailing_stop),
                Side::Sell => (price <= trade.take_profit, price >= trade.trailing_stop),
            };

            if tp_hit {
                let _ = self
                    .close_trade(trade.id, price, TradeStatus::TakeProfit)
                    .await;
            } else if stop_hit {
                let ratcheted = match trade.side {
                    Side::Buy => trade.trailing_stop > trade.stop_loss,
                    Side::Sell => trade.trailing_stop < trade.stop_loss,
                };
                let status = if ratcheted {
                    TradeStatus::TrailingSl
                } else {
                    TradeStatus::StoppedOut
                };
                let _ = self.close_trade(trade.id, price, status).await;
            } else {
                self.ratchet_trailing_stop(trade.id, price);
            }
        }
    }

    /// Close one open trade through an opposing-side order. On gateway
    /// failure the trade remains open and the next monitor tick retries.
    pub async fn close_trade(
        &self,
        id: TradeId,
        exit_price: f64,
        status: TradeStatus,
    ) -> Result<(), GatewayError> {
        debug_assert!(status.is_terminal());

        // Claim the close so concurrent passes cannot double-order.
        let claim = {
            let mut ledger = self.ledger.lock();
            let details = ledger
                .trades
                .iter()
                .find(|t| t.id == id && t.is_open())
                .map(|t| (t.key.clone(), t.side, t.quantity));
            if details.is_some() && !ledger.closing.insert(id) {
                // Another close for this trade is already in flight.
                None
            } else {
                details
            }
        };
        let Some((key, side, quantity)) = claim else {
            return Ok(());
        };

        let request = OrderRequest::market(key.clone(), side.opposing(), quantity);
        let exit_order_id = match self.gateway.place_order(&request).await {
            Ok(order_id) => order_id,
            Err(error) => {
                self.ledger.lock().closing.remove(&id);
                warn!(
                    %id,
                    %key,
                    %error,
                    "close order failed, trade remains open for next tick"
                );
                return Err(error);
            }
        };

        let closed = {
            let mut ledger = self.ledger.lock();
            ledger.closing.remove(&id);
            let Some(trade) = ledger.trades.iter_mut().find(|t| t.id == id) else {
                return Ok(());
            };

            let gross = trade.gross_pnl(exit_price);
            let costs = self.costs.round_trip(
                trade.side,
                trade.notional(),
                exit_price * trade.quantity as f64,
            );
            trade.status = status;
            trade.exit_price = Some(exit_price);
            trade.exit_time = Some(Utc::now());
            trade.exit_order_id = Some(exit_order_id);
            trade.pnl = Some(gross - costs.total());
            trade.costs = Some(costs);
            trade.clone()
        };

        let net_pnl = closed.pnl.unwrap_or_default();
        info!(
            %id,
            %key,
            %status,
            exit = exit_price,
            net_pnl,
            "trade closed"
        );
        self.persist(&closed);
        self.notifier.notify(NotificationEvent::TradeClosed {
            key,
            status,
            exit_price,
            net_pnl,
        });
        Ok(())
    }

    /// Force-close every open trade, eg. at the pre-close square-off. A
    /// stale or missing cache price must not block a forced exit, so the
    /// freshest known price is used, falling back to entry.
    pub async fn square_off_all(&self) {
        let open: Vec<(TradeId, InstrumentKey, f64)> = {
            let ledger = self.ledger.lock();
            ledger
                .trades
                .iter()
                .filter(|t| t.is_open())
                .map(|t| (t.id, t.key.clone(), t.entry_price))
                .collect()
        };

        if open.is_empty() {
            debug!("square-off: no open positions");
            return;
        }

        info!(positions = open.len(), "squaring off all open positions");
        for (id, key, entry_price) in open {
            let verdict = self.cache.latest(&key);
            let price = verdict.any_price().unwrap_or(entry_price);
            if matches!(verdict, PriceVerdict::Stale { .. } | PriceVerdict::Missing) {
                warn!(%key, "square-off using non-fresh price");
            }
            let _ = self.close_trade(id, price, TradeStatus::Closed).await;
        }
    }

    /// Periodic position monitor; only the receive loop blocks on I/O,
    /// this loop sleeps between passes.
    pub async fn run_monitor(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.config.monitor_interval, "position monitor started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.monitor_interval) => {
                    self.monitor_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("position monitor stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Performance summary over trades closed on the current trading
    /// day.
    pub fn daily_summary(&self, now: chrono::DateTime<Utc>) -> DailySummary {
        let trades = self.trades();
        let closed_today: Vec<&Trade> = trades
            .iter()
            .filter(|t| !t.is_open())
            .filter(|t| {
                t.exit_time.is_some_and(|exit| {
                    let offset = self.risk.config().market_offset;
                    exit.with_timezone(&offset).date_naive()
                        == now.with_timezone(&offset).date_naive()
                })
            })
            .collect();

        let wins = closed_today
            .iter()
            .filter(|t| t.pnl.unwrap_or_default() > 0.0)
            .count() as u64;
        let losses = closed_today.len() as u64 - wins;
        let net_pnl: f64 = closed_today.iter().filter_map(|t| t.pnl).sum();
        let total_costs: f64 = closed_today
            .iter()
            .filter_map(|t| t.costs.as_ref())
            .map(|costs| costs.total())
            .sum();

        DailySummary {
            total_trades: closed_today.len() as u64,
            wins,
            losses,
            win_rate_pct: if closed_today.is_empty() {
                0.0
            } else {
                wins as f64 / closed_today.len() as f64 * 100.0
            },
            gross_pnl: net_pnl + total_costs,
            net_pnl,
            total_costs,
        }
    }

    fn ratchet_trailing_stop(&self, id: TradeId, price: f64) {
        let updated = {
            let mut ledger = self.ledger.lock();
            let Some(trade) = ledger.trades.iter_mut().find(|t| t.id == id && t.is_open())
            else {
                return;
            };

            let candidate = match trade.side {
                Side::Buy => price * (1.0 - self.config.trailing_stop_pct),
                Side::Sell => price * (1.0 + self.config.trailing_stop_pct),
            };
            let improves = match trade.side {
                Side::Buy => candidate > trade.trailing_stop,
                Side::Sell => candidate < trade.trailing_stop,
            };
            if !improves {
                return;
            }
            trade.trailing_stop = candidate;
            trade.clone()
        };

        debug!(
            id = %updated.id,
            key = %updated.key,
            trailing_stop = updated.trailing_stop,
            "trailing stop ratcheted"
        );
        self.persist(&updated);
    }

    fn persist(&self, trade: &Trade) {
        if let Err(error) = self.store.upsert_trade(trade) {
            // Fire-and-forget: never rolled back into in-memory state.
            warn!(%error, id = %trade.id, "trade persist failed");
        }
    }
}

/// Momentum against the trend opens a short; everything else is a long.
fn side_for(signal: &Signal) -> Side {
    match &signal.metadata {
        SignalMetadata::Momentum { roc_pct, .. } if *roc_pct < 0.0 => Side::Sell,
        _ => Side::Buy,
    }
}
