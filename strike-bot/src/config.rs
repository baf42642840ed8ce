//! Environment-driven configuration with sensible defaults.
//!
//! Every knob is a `STRIKE_*` environment variable; unset or unparseable
//! values fall back to the documented default so a bare `strike-bot`
//! starts in paper mode against the default venue endpoints.

use std::str::FromStr;
use std::time::Duration;
use strike_core::InstrumentKey;
use strike_feed::{FeedConfig, SubscriptionMode};
use strike_trading::{ExecutionConfig, RiskConfig, SessionConfig};

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Fully resolved process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub access_token: String,
    pub authorize_url: String,
    pub order_api_url: String,
    pub api_host: String,
    pub instrument_keys: Vec<InstrumentKey>,
    pub subscription_mode: SubscriptionMode,
    pub paper_mode: bool,
    pub event_buffer: usize,
    pub price_staleness: Duration,
    pub orders_per_minute: usize,
    pub account_size: f64,
    pub allocation_pct: f64,
    pub max_position_value: f64,
    pub daily_loss_limit_pct: f64,
    pub daily_profit_target_pct: f64,
    pub max_concurrent_positions: usize,
    pub daily_trade_cap: usize,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub trailing_stop_pct: f64,
}

impl Config {
    pub fn from_env() -> Self {
        let instrument_keys = env_string("STRIKE_INSTRUMENT_KEYS", "")
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(InstrumentKey::new)
            .collect();

        let subscription_mode = match env_string("STRIKE_SUBSCRIPTION_MODE", "full").as_str() {
            "ltpc" => SubscriptionMode::Ltpc,
            "option_greeks" => SubscriptionMode::OptionGreeks,
            _ => SubscriptionMode::Full,
        };

        Self {
            access_token: env_string("STRIKE_ACCESS_TOKEN", ""),
            authorize_url: env_string(
                "STRIKE_AUTHORIZE_URL",
                "https://api.example-venue.com/v3/feed/market-data-feed/authorize",
            ),
            order_api_url: env_string("STRIKE_ORDER_API_URL", "https://api.example-venue.com/v2"),
            api_host: env_string("STRIKE_API_HOST", "api.example-venue.com:443"),
            instrument_keys,
            subscription_mode,
            paper_mode: env_or("STRIKE_PAPER_MODE", true),
            event_buffer: env_or("STRIKE_EVENT_BUFFER", 10_000),
            price_staleness: Duration::from_secs(env_or("STRIKE_PRICE_STALENESS_SECS", 30)),
            orders_per_minute: env_or("STRIKE_ORDERS_PER_MINUTE", 10),
            account_size: env_or("STRIKE_ACCOUNT_SIZE", 100_000.0),
            allocation_pct: env_or("STRIKE_ALLOCATION_PCT", 0.30),
            max_position_value: env_or("STRIKE_MAX_POSITION_VALUE", 30_000.0),
            daily_loss_limit_pct: env_or("STRIKE_DAILY_LOSS_LIMIT_PCT", 0.02),
            daily_profit_target_pct: env_or("STRIKE_DAILY_PROFIT_TARGET_PCT", 0.04),
            max_concurrent_positions: env_or("STRIKE_MAX_CONCURRENT_POSITIONS", 3),
            daily_trade_cap: env_or("STRIKE_DAILY_TRADE_CAP", 20),
            stop_loss_pct: env_or("STRIKE_STOP_LOSS_PCT", 0.05),
            take_profit_pct: env_or("STRIKE_TAKE_PROFIT_PCT", 0.04),
            trailing_stop_pct: env_or("STRIKE_TRAILING_STOP_PCT", 0.02),
        }
    }

    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig::new(&self.authorize_url, &self.access_token)
            .with_api_host(&self.api_host)
    }

    pub fn risk_config(&self) -> RiskConfig {
        RiskConfig {
            principal: self.account_size,
            allocation_pct: self.allocation_pct,
            absolute_position_cap: self.max_position_value,
            daily_loss_limit_pct: self.daily_loss_limit_pct,
            daily_profit_target_pct: self.daily_profit_target_pct,
            max_concurrent_positions: self.max_concurrent_positions,
            daily_trade_cap: self.daily_trade_cap,
            ..RiskConfig::default()
        }
    }

    pub fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            stop_loss_pct: self.stop_loss_pct,
            take_profit_pct: self.take_profit_pct,
            trailing_stop_pct: self.trailing_stop_pct,
            paper_mode: self.paper_mode,
            ..ExecutionConfig::default()
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            paper_mode: self.paper_mode,
            ..SessionConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_paper_mode() {
        // Avoid env mutation: defaults only hold when the variables are
        // unset, which is the normal test environment.
        let config = Config::from_env();
        assert!(config.paper_mode);
        assert_eq!(config.max_concurrent_positions, 3);
        assert_eq!(config.subscription_mode, SubscriptionMode::Full);
        assert!(config.instrument_keys.is_empty());
    }
}
