//! Market-session scheduler.
//!
//! A fixed-interval control loop that keys the whole pipeline off the
//! exchange calendar: start inside market hours, force square-off at the
//! pre-close margin while staying active, stop and report after close.
//! On process start with the market already closed it generates the
//! missing end-of-session report (crash recovery). Credential expiry is
//! watched alongside, with escalating alerts as the deadline approaches.

use crate::execution::ExecutionEngine;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use strike_core::{NotificationEvent, Notifier};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Exchange trading hours in the venue's local offset.
#[derive(Debug, Clone)]
pub struct MarketHours {
    pub offset: FixedOffset,
    pub open: NaiveTime,
    pub close: NaiveTime,
    /// Open positions are squared off this long before close.
    pub square_off_margin: chrono::Duration,
}

impl Default for MarketHours {
    fn default() -> Self {
        Self {
            offset: FixedOffset::east_opt(5 * 3600 + 1800).expect("static offset is valid"),
            open: NaiveTime::from_hms_opt(9, 15, 0).expect("static time is valid"),
            close: NaiveTime::from_hms_opt(15, 30, 0).expect("static time is valid"),
            square_off_margin: chrono::Duration::minutes(15),
        }
    }
}

impl MarketHours {
    fn local(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.offset)
    }

    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        self.local(now).date_naive()
    }

    pub fn is_trading_day(&self, now: DateTime<Utc>) -> bool {
        !matches!(self.local(now).weekday(), Weekday::Sat | Weekday::Sun)
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        if !self.is_trading_day(now) {
            return false;
        }
        let time = self.local(now).time();
        self.open <= time && time < self.close
    }

    /// Inside the final margin before close, while the market is still
    /// open.
    pub fn in_square_off_window(&self, now: DateTime<Utc>) -> bool {
        self.is_open(now) && self.local(now).time() >= self.close - self.square_off_margin
    }

    pub fn is_past_close(&self, now: DateTime<Utc>) -> bool {
        self.is_trading_day(now) && self.local(now).time() >= self.close
    }
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    exp: Option<i64>,
}

/// Decode the expiry claim from a JWT access token. No signature
/// verification: we own the token, we only need to know when it dies.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: JwtClaims = serde_json::from_slice(&decoded).ok()?;
    Utc.timestamp_opt(claims.exp?, 0).single()
}

/// Raises escalating alerts as the credential approaches expiry: at 12
/// and 6 hours out, hourly under 3 hours, and immediately once expired.
/// Each threshold alerts at most once.
#[derive(Debug, Clone)]
pub struct CredentialMonitor {
    expiry: Option<DateTime<Utc>>,
    last_alert_hours: Option<i64>,
}

impl CredentialMonitor {
    pub fn from_token(token: &str) -> Self {
        Self {
            expiry: token_expiry(token),
            last_alert_hours: None,
        }
    }

    pub fn with_expiry(expiry: Option<DateTime<Utc>>) -> Self {
        Self {
            expiry,
            last_alert_hours: None,
        }
    }

    pub fn check(&mut self, now: DateTime<Utc>) -> Option<NotificationEvent> {
        let expiry = self.expiry?;
        let hours_left = expiry.signed_duration_since(now).num_hours();

        if expiry <= now {
            if self.last_alert_hours != Some(-1) {
                self.last_alert_hours = Some(-1);
                return Some(NotificationEvent::CredentialExpired);
            }
            return None;
        }

        let should_alert = match hours_left {
            0..=3 => self.last_alert_hours != Some(hours_left),
            6 | 12 => self.last_alert_hours != Some(hours_left),
            _ => false,
        };

        if should_alert {
            self.last_alert_hours = Some(hours_left);
            return Some(NotificationEvent::CredentialExpiring { hours_left });
        }
        None
    }
}

/// Pipeline lifecycle controls the scheduler drives; implemented by the
/// binary's wiring over the feed client and subscription manager.
#[async_trait]
pub trait SessionHooks: Send + Sync {
    /// Bring the feed pipeline up. Returns false when startup failed;
    /// the scheduler retries on its next poll.
    async fn start_pipeline(&self) -> bool;

    async fn stop_pipeline(&self);
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub hours: MarketHours,
    pub poll_interval: Duration,
    /// Slower cadence outside trading days.
    pub weekend_poll_interval: Duration,
    pub paper_mode: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hours: MarketHours::default(),
            poll_interval: Duration::from_secs(60),
            weekend_poll_interval: Duration::from_secs(3600),
            paper_mode: true,
        }
    }
}

/// `Inactive <-> Active` control loop over the trading pipeline.
pub struct SessionScheduler {
    config: SessionConfig,
    hooks: Arc<dyn SessionHooks>,
    execution: Arc<ExecutionEngine>,
    notifier: Arc<dyn Notifier>,
    credential: CredentialMonitor,
    active: bool,
    squared_off_on: Option<NaiveDate>,
    report_done_on: Option<NaiveDate>,
}

impl SessionScheduler {
    pub fn new(
        config: SessionConfig,
        hooks: Arc<dyn SessionHooks>,
        execution: Arc<ExecutionEngine>,
        notifier: Arc<dyn Notifier>,
        credential: CredentialMonitor,
    ) -> Self {
        Self {
            config,
            hooks,
            execution,
            notifier,
            credential,
            active: false,
            squared_off_on: None,
            report_done_on: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Run until shutdown. Poll cadence is fixed; all sleeps are
    /// cancellable.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            open = %self.config.hours.open,
            close = %self.config.hours.close,
            "session scheduler started"
        );

        // Crash recovery: the process may have been down when the
        // session ended.
        let now = Utc::now();
        if self.config.hours.is_past_close(now)
            && self.report_done_on != Some(self.config.hours.local_date(now))
        {
            info!("market already closed with no report for today, generating catch-up report");
            self.generate_report(now);
        }

        loop {
            let now = Utc::now();
            self.tick(now).await;

            let sleep_for = if self.config.hours.is_trading_day(now) {
                self.config.poll_interval
            } else {
                self.config.weekend_poll_interval
            };
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = shutdown.changed() => break,
            }
        }

        if self.active {
            info!("shutting down active session");
            self.hooks.stop_pipeline().await;
            self.active = false;
            self.notifier.notify(NotificationEvent::SessionStopped);
        }
        info!("session scheduler stopped");
    }

    /// One scheduling decision at `now`.
    async fn tick(&mut self, now: DateTime<Utc>) {
        let today = self.config.hours.local_date(now);

        if self.config.hours.is_open(now) {
            if !self.active {
                info!("market open, starting trading session");
                if self.hooks.start_pipeline().await {
                    self.active = true;
                    self.notifier.notify(NotificationEvent::SessionStarted {
                        paper_mode: self.config.paper_mode,
                    });
                } else {
                    error!("pipeline failed to start, will retry next poll");
                }
            }

            if self.active
                && self.config.hours.in_square_off_window(now)
                && self.squared_off_on != Some(today)
            {
                info!("pre-close margin reached, squaring off all open positions");
                self.execution.square_off_all().await;
                self.squared_off_on = Some(today);
                // The session stays active until close for monitoring.
            }
        } else {
            if self.active {
                info!("market closed, stopping trading session");
                self.hooks.stop_pipeline().await;
                self.active = false;
                self.notifier.notify(NotificationEvent::SessionStopped);
                self.generate_report(now);
            } else if self.config.hours.is_past_close(now)
                && self.report_done_on != Some(today)
            {
                self.generate_report(now);
            }
        }

        if let Some(event) = self.credential.check(now) {
            warn!(%event, "credential alert");
            self.notifier.notify(event);
        }
    }

    fn generate_report(&mut self, now: DateTime<Utc>) {
        let summary = self.execution.daily_summary(now);
        info!(
            trades = summary.total_trades,
            win_rate_pct = summary.win_rate_pct,
            net_pnl = summary.net_pnl,
            "end of session report"
        );
        self.notifier
            .notify(NotificationEvent::EndOfSession(summary));
        self.report_done_on = Some(self.config.hours.local_date(now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::costs::CostModel;
    use crate::execution::ExecutionConfig;
    use crate::gateway::{OrderGateway, PaperGateway};
    use crate::risk::{RiskConfig, RiskEngine};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use strike_core::{NoopStore, notify::NoopNotifier};
    use strike_feed::PriceCache;

    /// 2024-09-09 is a Monday; build instants from IST wall-clock time.
    fn ist(hour: u32, minute: u32) -> DateTime<Utc> {
        let offset = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        offset
            .with_ymd_and_hms(2024, 9, 9, hour, minute, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn saturday(hour: u32) -> DateTime<Utc> {
        let offset = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        offset
            .with_ymd_and_hms(2024, 9, 7, hour, 0, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_market_hours_windows() {
        let hours = MarketHours::default();

        assert!(!hours.is_open(ist(9, 14)));
        assert!(hours.is_open(ist(9, 15)));
        assert!(hours.is_open(ist(12, 0)));
        assert!(hours.is_open(ist(15, 29)));
        assert!(!hours.is_open(ist(15, 30)));

        assert!(!hours.in_square_off_window(ist(15, 14)));
        assert!(hours.in_square_off_window(ist(15, 15)));
        assert!(hours.in_square_off_window(ist(15, 29)));
        assert!(!hours.in_square_off_window(ist(15, 30)));

        assert!(hours.is_past_close(ist(15, 30)));
        assert!(!hours.is_past_close(ist(15, 29)));

        assert!(!hours.is_open(saturday(12)));
        assert!(!hours.is_past_close(saturday(18)));
    }

    #[test]
    fn test_token_expiry_decodes_exp_claim() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"client-1","exp":1757404800}"#);
        let token = format!("eyJhbGciOiJIUzI1NiJ9.{payload}.signature");

        let expiry = token_expiry(&token).unwrap();
        assert_eq!(expiry.timestamp(), 1_757_404_800);

        assert!(token_expiry("not-a-jwt").is_none());
        let no_exp = URL_SAFE_NO_PAD.encode(br#"{"sub":"client-1"}"#);
        assert!(token_expiry(&format!("h.{no_exp}.s")).is_none());
    }

    #[test]
    fn test_credential_alert_escalation() {
        let expiry = ist(23, 0);
        let mut monitor = CredentialMonitor::with_expiry(Some(expiry));

        // 13h out: quiet.
        assert!(monitor.check(expiry - chrono::Duration::hours(13)).is_none());

        // 12h out: first alert.
        let event = monitor.check(expiry - chrono::Duration::hours(12)).unwrap();
        assert_eq!(event, NotificationEvent::CredentialExpiring { hours_left: 12 });
        // Same threshold again: quiet.
        assert!(monitor.check(expiry - chrono::Duration::hours(12)).is_none());

        // 8h out: quiet; 6h out: alert.
        assert!(monitor.check(expiry - chrono::Duration::hours(8)).is_none());
        assert!(monitor.check(expiry - chrono::Duration::hours(6)).is_some());

        // Under 3 hours: hourly.
        assert!(monitor.check(expiry - chrono::Duration::hours(3)).is_some());
        assert!(monitor.check(expiry - chrono::Duration::hours(3)).is_none());
        assert!(monitor.check(expiry - chrono::Duration::hours(2)).is_some());

        // Expired: exactly one critical alert.
        let expired = monitor.check(expiry + chrono::Duration::minutes(1)).unwrap();
        assert_eq!(expired, NotificationEvent::CredentialExpired);
        assert!(monitor.check(expiry + chrono::Duration::hours(1)).is_none());
    }

    #[derive(Default)]
    struct CountingHooks {
        starts: AtomicUsize,
        stops: AtomicUsize,
        fail_start: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl SessionHooks for CountingHooks {
        async fn start_pipeline(&self) -> bool {
            self.starts.fetch_add(1, Ordering::SeqCst);
            !self.fail_start.load(Ordering::SeqCst)
        }

        async fn stop_pipeline(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<NotificationEvent>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, event: NotificationEvent) {
            self.events.lock().push(event);
        }
    }

    fn execution() -> Arc<ExecutionEngine> {
        Arc::new(ExecutionEngine::new(
            ExecutionConfig::default(),
            RiskEngine::new(RiskConfig::default()),
            CostModel::default(),
            Arc::new(PaperGateway::new()) as Arc<dyn OrderGateway>,
            Arc::new(NoopStore),
            Arc::new(NoopNotifier),
            Arc::new(PriceCache::default()),
        ))
    }

    fn scheduler(
        hooks: Arc<CountingHooks>,
        notifier: Arc<RecordingNotifier>,
    ) -> SessionScheduler {
        SessionScheduler::new(
            SessionConfig::default(),
            hooks,
            execution(),
            notifier,
            CredentialMonitor::with_expiry(None),
        )
    }

    #[tokio::test]
    async fn test_session_starts_and_stops_with_market() {
        let hooks = Arc::new(CountingHooks::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let mut scheduler = scheduler(hooks.clone(), notifier.clone());

        // Before open: nothing happens.
        scheduler.tick(ist(9, 0)).await;
        assert!(!scheduler.is_active());
        assert_eq!(hooks.starts.load(Ordering::SeqCst), 0);

        // Open: started once, stays started.
        scheduler.tick(ist(9, 15)).await;
        assert!(scheduler.is_active());
        scheduler.tick(ist(10, 0)).await;
        assert_eq!(hooks.starts.load(Ordering::SeqCst), 1);

        // After close: stopped and reported.
        scheduler.tick(ist(15, 31)).await;
        assert!(!scheduler.is_active());
        assert_eq!(hooks.stops.load(Ordering::SeqCst), 1);

        let events = notifier.events.lock();
        assert!(events.iter().any(|e| matches!(e, NotificationEvent::SessionStarted { .. })));
        assert!(events.iter().any(|e| *e == NotificationEvent::SessionStopped));
        assert!(events.iter().any(|e| matches!(e, NotificationEvent::EndOfSession(_))));
    }

    #[tokio::test]
    async fn test_square_off_fires_once_and_session_stays_active() {
        let hooks = Arc::new(CountingHooks::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let mut scheduler = scheduler(hooks.clone(), notifier.clone());

        scheduler.tick(ist(9, 15)).await;
        assert!(scheduler.is_active());

        scheduler.tick(ist(15, 16)).await;
        assert!(scheduler.is_active());
        assert_eq!(scheduler.squared_off_on, Some(ist(15, 16).with_timezone(&scheduler.config.hours.offset).date_naive()));

        // Second pass inside the window does not square off again.
        scheduler.tick(ist(15, 20)).await;
        assert!(scheduler.is_active());
        assert_eq!(hooks.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_pipeline_start_retries_next_poll() {
        let hooks = Arc::new(CountingHooks::default());
        hooks.fail_start.store(true, Ordering::SeqCst);
        let notifier = Arc::new(RecordingNotifier::default());
        let mut scheduler = scheduler(hooks.clone(), notifier.clone());

        scheduler.tick(ist(9, 15)).await;
        assert!(!scheduler.is_active());

        hooks.fail_start.store(false, Ordering::SeqCst);
        scheduler.tick(ist(9, 16)).await;
        assert!(scheduler.is_active());
        assert_eq!(hooks.starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_catch_up_report_after_close_without_session() {
        let hooks = Arc::new(CountingHooks::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let mut scheduler = scheduler(hooks.clone(), notifier.clone());

        // Never active today, first tick arrives after close: the
        // report is still generated, exactly once.
        scheduler.tick(ist(16, 0)).await;
        scheduler.tick(ist(16, 1)).await;

        let events = notifier.events.lock();
        let reports = events
            .iter()
            .filter(|e| matches!(e, NotificationEvent::EndOfSession(_)))
            .count();
        assert_eq!(reports, 1);
        assert_eq!(hooks.stops.load(Ordering::SeqCst), 0);
    }
}
