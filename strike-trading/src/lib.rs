//! Trading layer of the Strike pipeline.
//!
//! Consumes the typed tick stream produced by `strike-feed` and carries
//! it through to order flow:
//!
//! - [`candle`]: tick-to-candle aggregation with clamped volume deltas
//!   and synchronous close fan-out.
//! - [`detect`]: incremental rolling-window anomaly detection (spike,
//!   volume surge, momentum) with per-(instrument, kind) cooldowns.
//! - [`risk`]: account-level gates and position sizing off equity
//!   recomputed from trade history.
//! - [`costs`]: the transaction-cost model shared by paper and live
//!   fills.
//! - [`gateway`]: the injected order-routing seam: paper simulation or
//!   live venue REST.
//! - [`execution`]: the trade lifecycle state machine and position
//!   monitor.
//! - [`session`]: the market-hours scheduler, square-off, end-of-session
//!   reporting and credential-expiry alerts.

pub mod candle;
pub mod costs;
pub mod detect;
pub mod execution;
pub mod gateway;
pub mod risk;
pub mod session;

pub use candle::CandleAggregator;
pub use costs::CostModel;
pub use detect::{DetectorConfig, SignalDetector};
pub use execution::{ExecutionConfig, ExecutionEngine, OpenError};
pub use gateway::{
    GatewayError, LiveGateway, OrderGateway, OrderRequest, OrderType, PaperGateway, RateLimiter,
};
pub use risk::{RiskConfig, RiskDenied, RiskEngine};
pub use session::{
    CredentialMonitor, MarketHours, SessionConfig, SessionHooks, SessionScheduler, token_expiry,
};
