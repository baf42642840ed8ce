//! Operator notification collaborator interface.
//!
//! Fire-and-forget text alerts; delivery transports (chat, email) live
//! outside this workspace. Implementations must not block the caller.

use crate::{InstrumentKey, Side, TradeStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// End-of-session performance summary.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct DailySummary {
    pub total_trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate_pct: f64,
    pub gross_pnl: f64,
    pub net_pnl: f64,
    pub total_costs: f64,
}

/// Everything the pipeline tells the operator about.
#[derive(Clone, Debug, PartialEq)]
pub enum NotificationEvent {
    FeedConnected,
    FeedDisconnected { reason: String },
    /// Reconnect attempts exhausted; pipeline stays down until restarted.
    FeedDown { attempts: u32, local_network_ok: bool },
    AuthExpired,
    TradeOpened {
        key: InstrumentKey,
        side: Side,
        quantity: u64,
        entry_price: f64,
        stop_loss: f64,
        take_profit: f64,
    },
    TradeClosed {
        key: InstrumentKey,
        status: TradeStatus,
        exit_price: f64,
        net_pnl: f64,
    },
    CredentialExpiring { hours_left: i64 },
    CredentialExpired,
    SessionStarted { paper_mode: bool },
    SessionStopped,
    EndOfSession(DailySummary),
    Fatal { context: String },
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationEvent::FeedConnected => write!(f, "feed connected"),
            NotificationEvent::FeedDisconnected { reason } => {
                write!(f, "feed disconnected: {reason}")
            }
            NotificationEvent::FeedDown {
                attempts,
                local_network_ok,
            } => write!(
                f,
                "feed down after {attempts} attempts (local network ok: {local_network_ok})"
            ),
            NotificationEvent::AuthExpired => {
                write!(f, "credential expired: operator action required")
            }
            NotificationEvent::TradeOpened {
                key,
                side,
                quantity,
                entry_price,
                stop_loss,
                take_profit,
            } => write!(
                f,
                "trade opened {side} {quantity} {key} @ {entry_price:.2} (sl {stop_loss:.2}, tp {take_profit:.2})"
            ),
            NotificationEvent::TradeClosed {
                key,
                status,
                exit_price,
                net_pnl,
            } => write!(
                f,
                "trade closed {key} {status} @ {exit_price:.2}, net pnl {net_pnl:.2}"
            ),
            NotificationEvent::CredentialExpiring { hours_left } => {
                write!(f, "credential expires in {hours_left}h")
            }
            NotificationEvent::CredentialExpired => write!(f, "credential already expired"),
            NotificationEvent::SessionStarted { paper_mode } => write!(
                f,
                "trading session started ({})",
                if *paper_mode { "paper" } else { "live" }
            ),
            NotificationEvent::SessionStopped => write!(f, "trading session stopped"),
            NotificationEvent::EndOfSession(summary) => write!(
                f,
                "end of session: {} trades (W {} / L {}), win rate {:.1}%, net pnl {:.2}",
                summary.total_trades,
                summary.wins,
                summary.losses,
                summary.win_rate_pct,
                summary.net_pnl
            ),
            NotificationEvent::Fatal { context } => write!(f, "fatal: {context}"),
        }
    }
}

/// Operator alert sink.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: NotificationEvent);
}

/// Notifier that drops every event; useful in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _: NotificationEvent) {}
}
