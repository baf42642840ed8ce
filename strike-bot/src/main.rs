//! strike-bot: wires the feed and trading layers into a running process.
//!
//! Topology (a small fixed set of long-lived loops; everything else is
//! spawned per event):
//! feed receive loop -> bounded event channel -> pipeline consumer
//! (candles + detection) -> per-signal tasks into the execution engine.
//! A 1 s position monitor and the 60 s session scheduler run alongside;
//! the scheduler owns feed lifecycle through [`PipelineHandle`].

mod config;
mod notify;

use async_trait::async_trait;
use config::Config;
use notify::TracingNotifier;
use std::sync::Arc;
use strike_core::{MarketStore, NoopStore, Notifier, Timeframe};
use strike_feed::{
    ControlTransport, FeedClient, FeedEvent, PriceCache, SubscriptionManager,
};
use strike_trading::{
    CandleAggregator, CostModel, CredentialMonitor, DetectorConfig, ExecutionEngine, LiveGateway,
    MarketHours, OpenError, OrderGateway, PaperGateway, RiskEngine, SessionHooks,
    SessionScheduler, SignalDetector,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Feed lifecycle handle the session scheduler drives: each session
/// spawns a fresh feed task, each stop tears it down.
struct PipelineHandle {
    client: Arc<FeedClient>,
    subscriptions: Arc<SubscriptionManager>,
    events_tx: mpsc::Sender<FeedEvent>,
    feed: tokio::sync::Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

#[async_trait]
impl SessionHooks for PipelineHandle {
    async fn start_pipeline(&self) -> bool {
        let mut feed = self.feed.lock().await;
        if let Some((_, handle)) = feed.as_ref() {
            if !handle.is_finished() {
                debug!("feed task already running");
                return true;
            }
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&self.client).run(
            Arc::clone(&self.subscriptions),
            self.events_tx.clone(),
            stop_rx,
        ));
        *feed = Some((stop_tx, handle));
        true
    }

    async fn stop_pipeline(&self) {
        if let Some((stop_tx, handle)) = self.feed.lock().await.take() {
            let _ = stop_tx.send(true);
            if let Err(error) = handle.await {
                warn!(%error, "feed task join failed");
            }
        }
    }
}

/// CPU-bound half of the tick path, kept off the I/O loop: candle
/// aggregation and signal detection over the bounded event channel.
async fn run_pipeline_consumer(
    mut events: mpsc::Receiver<FeedEvent>,
    store: Arc<dyn MarketStore>,
    execution: Arc<ExecutionEngine>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut aggregator = CandleAggregator::new(Timeframe::M1, Arc::clone(&store));
    aggregator.register_close_callback(|candle| {
        debug!(
            key = %candle.key,
            bucket = %candle.bucket_start,
            close = candle.close,
            volume = candle.volume,
            "candle closed"
        );
    });
    let mut detector = SignalDetector::new(DetectorConfig::default());

    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
            event = events.recv() => event,
        };

        match event {
            None => break,
            Some(FeedEvent::MarketStatus(status)) => {
                info!(
                    open_segments = status
                        .segments
                        .iter()
                        .filter(|(segment, _)| status.is_open(segment))
                        .count(),
                    "market status"
                );
            }
            Some(FeedEvent::Tick(tick)) => {
                if let Err(error) = store.record_tick(&tick) {
                    // Fire-and-forget; the pipeline never stalls on
                    // persistence.
                    warn!(%error, key = %tick.key, "tick persist failed");
                }

                aggregator.update(&tick);

                for signal in detector.process_tick(&tick) {
                    info!(
                        key = %signal.key,
                        kind = %signal.kind,
                        strength = signal.strength,
                        "signal detected"
                    );
                    let execution = Arc::clone(&execution);
                    tokio::spawn(async move {
                        match execution.handle_signal(&signal).await {
                            Ok(id) => debug!(trade = %id, "signal executed"),
                            Err(OpenError::Risk(denied)) => {
                                debug!(key = %signal.key, %denied, "risk denied")
                            }
                            Err(OpenError::Gateway(error)) => {
                                warn!(key = %signal.key, %error, "open order failed")
                            }
                        }
                    });
                }
            }
        }
    }
    info!("pipeline consumer stopped");
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();
    info!("starting strike-bot");

    let config = Config::from_env();
    if config.instrument_keys.is_empty() {
        warn!("no instrument universe configured (STRIKE_INSTRUMENT_KEYS); feed will idle");
    }

    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
    let store: Arc<dyn MarketStore> = Arc::new(NoopStore);
    let cache = Arc::new(PriceCache::new(config.price_staleness));

    let client = match FeedClient::new(config.feed_config(), Arc::clone(&cache), Arc::clone(&notifier)) {
        Ok(client) => Arc::new(client),
        Err(error) => {
            error!(%error, "failed to build feed client");
            return;
        }
    };

    let subscriptions = Arc::new(SubscriptionManager::new(
        Arc::clone(&client) as Arc<dyn ControlTransport>,
        config.subscription_mode,
    ));
    if let Err(error) = subscriptions.set_desired(config.instrument_keys.iter().cloned()) {
        error!(%error, "instrument universe rejected");
        return;
    }

    let gateway: Arc<dyn OrderGateway> = if config.paper_mode {
        info!("paper trading mode: orders are simulated");
        Arc::new(PaperGateway::new())
    } else {
        match LiveGateway::new(
            &config.order_api_url,
            &config.access_token,
            MarketHours::default(),
            config.orders_per_minute,
        ) {
            Ok(gateway) => {
                info!("live trading mode: orders go to the venue");
                Arc::new(gateway)
            }
            Err(error) => {
                error!(%error, "failed to build live order gateway");
                return;
            }
        }
    };

    let execution = Arc::new(ExecutionEngine::new(
        config.execution_config(),
        RiskEngine::new(config.risk_config()),
        CostModel::default(),
        gateway,
        Arc::clone(&store),
        Arc::clone(&notifier),
        Arc::clone(&cache),
    ));

    let (events_tx, events_rx) = mpsc::channel(config.event_buffer);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer = tokio::spawn(run_pipeline_consumer(
        events_rx,
        Arc::clone(&store),
        Arc::clone(&execution),
        shutdown_rx.clone(),
    ));
    let monitor = tokio::spawn(Arc::clone(&execution).run_monitor(shutdown_rx.clone()));

    let hooks = Arc::new(PipelineHandle {
        client,
        subscriptions,
        events_tx,
        feed: tokio::sync::Mutex::new(None),
    });
    let scheduler = SessionScheduler::new(
        config.session_config(),
        Arc::clone(&hooks) as Arc<dyn SessionHooks>,
        Arc::clone(&execution),
        Arc::clone(&notifier),
        CredentialMonitor::from_token(&config.access_token),
    );
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    info!(
        paper_mode = config.paper_mode,
        instruments = config.instrument_keys.len(),
        "strike-bot running, ctrl-c to stop"
    );
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for shutdown signal");
    }

    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    if let Err(error) = scheduler_task.await {
        warn!(%error, "scheduler join failed");
    }
    hooks.stop_pipeline().await;
    let _ = monitor.await;
    let _ = consumer.await;
    info!("strike-bot stopped");
}
