//! Order routing abstraction.
//!
//! The execution engine is injected with an [`OrderGateway`] and never
//! branches on trading mode internally: [`PaperGateway`] fills
//! synchronously, [`LiveGateway`] places real venue orders over REST.
//! Both present identical semantics to the state machine.

use crate::session::MarketHours;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use strike_core::{InstrumentKey, OrderId, Side};
use thiserror::Error;
use tracing::{info, warn};

/// Errors surfaced by an [`OrderGateway`]. An open attempt that hits one
/// of these is abandoned; a close attempt leaves the trade open for the
/// next monitor tick.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("order rejected by venue: {0}")]
    Rejected(String),

    #[error("venue call failed: {0}")]
    Http(String),

    #[error("order call timed out")]
    Timeout,

    #[error("order rate limit reached")]
    RateLimited,

    #[error("market is closed for order placement")]
    MarketClosed,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
}

/// One order instruction handed to a gateway.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderRequest {
    pub key: InstrumentKey,
    pub side: Side,
    pub quantity: u64,
    pub order_type: OrderType,
    /// Limit price; `None` for market orders.
    pub price: Option<f64>,
}

impl OrderRequest {
    pub fn market(key: InstrumentKey, side: Side, quantity: u64) -> Self {
        Self {
            key,
            side,
            quantity,
            order_type: OrderType::Market,
            price: None,
        }
    }
}

/// External order-routing collaborator.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderId, GatewayError>;
    async fn cancel_order(&self, order_id: &OrderId) -> Result<(), GatewayError>;
}

/// Simulated gateway: every order fills synchronously with a generated
/// id. Placed requests are retained for inspection.
#[derive(Debug, Default)]
pub struct PaperGateway {
    sequence: AtomicU64,
    placed: Mutex<Vec<OrderRequest>>,
}

impl PaperGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders placed so far, in order.
    pub fn placed(&self) -> Vec<OrderRequest> {
        self.placed.lock().clone()
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderId, GatewayError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.placed.lock().push(request.clone());
        info!(
            key = %request.key,
            side = %request.side,
            quantity = request.quantity,
            "paper order filled"
        );
        Ok(OrderId::new(format!("paper-{sequence}")))
    }

    async fn cancel_order(&self, _order_id: &OrderId) -> Result<(), GatewayError> {
        Ok(())
    }
}

/// Sliding-window order rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    max_in_window: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_in_window: usize, window: Duration) -> Self {
        Self {
            max_in_window,
            window,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Default venue limit: orders per minute.
    pub fn per_minute(max: usize) -> Self {
        Self::new(max, Duration::from_secs(60))
    }

    /// Record and admit an order, or refuse because the window is full.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock();
        while timestamps
            .front()
            .is_some_and(|at| now.duration_since(*at) >= self.window)
        {
            timestamps.pop_front();
        }
        if timestamps.len() >= self.max_in_window {
            return false;
        }
        timestamps.push_back(now);
        true
    }
}

#[derive(Debug, Serialize)]
struct PlaceOrderPayload<'a> {
    quantity: u64,
    product: &'static str,
    validity: &'static str,
    price: f64,
    tag: &'static str,
    instrument_token: &'a str,
    order_type: OrderType,
    transaction_type: &'a str,
    disclosed_quantity: u64,
    trigger_price: f64,
    is_amo: bool,
}

#[derive(Debug, Deserialize)]
struct PlaceOrderResponse {
    status: String,
    #[serde(default)]
    data: Option<PlaceOrderData>,
}

#[derive(Debug, Deserialize)]
struct PlaceOrderData {
    order_id: String,
}

/// Live venue gateway over authenticated REST. Order placement is gated
/// on market hours and the venue's order rate limit; the HTTP calls are
/// bounded so a hung venue never wedges the monitor loop.
pub struct LiveGateway {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    hours: MarketHours,
    rate_limiter: RateLimiter,
}

impl LiveGateway {
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        hours: MarketHours,
        orders_per_minute: usize,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|error| GatewayError::Http(error.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            access_token: access_token.into(),
            hours,
            rate_limiter: RateLimiter::per_minute(orders_per_minute),
        })
    }
}

#[async_trait]
impl OrderGateway for LiveGateway {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderId, GatewayError> {
        if !self.hours.is_open(Utc::now()) {
            return Err(GatewayError::MarketClosed);
        }
        if !self.rate_limiter.try_acquire() {
            return Err(GatewayError::RateLimited);
        }

        let payload = PlaceOrderPayload {
            quantity: request.quantity,
            product: "I",
            validity: "DAY",
            price: request.price.unwrap_or(0.0),
            tag: "strike-bot",
            instrument_token: request.key.as_str(),
            order_type: request.order_type,
            transaction_type: match request.side {
                Side::Buy => "BUY",
                Side::Sell => "SELL",
            },
            disclosed_quantity: 0,
            trigger_price: 0.0,
            is_amo: false,
        };

        let response = self
            .http
            .post(format!("{}/order/place", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Http(error.to_string())
                }
            })?;

        let status = response.status();
        let body: PlaceOrderResponse = response
            .json()
            .await
            .map_err(|error| GatewayError::Http(error.to_string()))?;

        match body.data {
            Some(data) if status.is_success() && body.status == "success" => {
                info!(order_id = %data.order_id, key = %request.key, "order placed");
                Ok(OrderId::new(data.order_id))
            }
            _ => {
                warn!(%status, venue_status = %body.status, "order placement rejected");
                Err(GatewayError::Rejected(format!(
                    "http {status}, venue status {}",
                    body.status
                )))
            }
        }
    }

    async fn cancel_order(&self, order_id: &OrderId) -> Result<(), GatewayError> {
        let response = self
            .http
            .delete(format!("{}/order/cancel", self.base_url))
            .query(&[("order_id", order_id.to_string())])
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Http(error.to_string())
                }
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(GatewayError::Rejected(format!(
                "cancel returned {}",
                response.status()
            )))
        }
    }
}
