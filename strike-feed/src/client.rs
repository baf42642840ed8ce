//! Venue feed client: handshake, transport ownership, receive loop and
//! reconnection policy.
//!
//! The client exclusively owns the connection and the raw frame stream.
//! Decoded ticks update the shared [`PriceCache`] in wire order, then fan
//! out over a bounded channel so CPU-bound consumers (aggregation,
//! statistics) never run on the I/O loop.

use crate::backoff::Backoff;
use crate::cache::PriceCache;
use crate::error::FeedError;
use crate::net::{DEFAULT_FALLBACK_RESOLVERS, probe_dns};
use crate::protocol::{self, FeedMessage, MarketStatus};
use crate::subscription::{ControlTransport, SubscriptionManager, SubscriptionMode};
use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use strike_core::{InstrumentKey, NotificationEvent, Notifier, Tick};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Default bound on the handshake and socket-open calls so a hung network
/// never blocks the pipeline indefinitely.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default read timeout; no data for this long is treated as a silent
/// disconnect and triggers reconnection.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Feed client configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Authenticated REST endpoint returning the session-bound socket URI.
    pub authorize_url: String,
    pub access_token: String,
    /// `host:port` used by the DNS health probe.
    pub api_host: String,
    pub handshake_timeout: Duration,
    pub read_timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_fraction: f64,
    /// Hard cap on consecutive reconnect attempts before escalating.
    pub max_reconnect_attempts: u32,
    /// Run the DNS health probe on every k-th attempt; 0 disables it.
    pub dns_probe_every: u32,
    pub fallback_resolvers: Vec<SocketAddr>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            authorize_url: "https://api.example-venue.com/v3/feed/market-data-feed/authorize"
                .to_string(),
            access_token: String::new(),
            api_host: "api.example-venue.com:443".to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter_fraction: 0.25,
            max_reconnect_attempts: 10,
            dns_probe_every: 3,
            fallback_resolvers: DEFAULT_FALLBACK_RESOLVERS
                .iter()
                .filter_map(|addr| addr.parse().ok())
                .collect(),
        }
    }
}

impl FeedConfig {
    pub fn new(authorize_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            authorize_url: authorize_url.into(),
            access_token: access_token.into(),
            ..Default::default()
        }
    }

    pub fn with_api_host(mut self, api_host: impl Into<String>) -> Self {
        self.api_host = api_host.into();
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

/// Connection status updates published over a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Decoded events fanned out to the pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedEvent {
    Tick(Tick),
    MarketStatus(MarketStatus),
}

/// Why the receive loop ended.
enum DisconnectReason {
    Shutdown,
    ConsumersGone,
    Transport(String),
}

/// Handshake response: the session URI is bound to the credential that
/// requested it.
#[derive(Debug, Deserialize)]
struct AuthorizeResponse {
    data: AuthorizeData,
}

#[derive(Debug, Deserialize)]
struct AuthorizeData {
    #[serde(alias = "authorizedRedirectUri")]
    authorized_redirect_uri: String,
}

/// Out-of-band control frame; the venue requires these as discrete
/// binary messages even though the body is JSON.
#[derive(Debug, Serialize)]
struct ControlFrame<'a> {
    guid: &'a str,
    method: &'static str,
    data: ControlFrameData<'a>,
}

#[derive(Debug, Serialize)]
struct ControlFrameData<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<&'static str>,
    #[serde(rename = "instrumentKeys")]
    instrument_keys: Vec<&'a str>,
}

/// Owns one persistent duplex connection to the venue feed.
pub struct FeedClient {
    config: FeedConfig,
    http: reqwest::Client,
    cache: Arc<PriceCache>,
    notifier: Arc<dyn Notifier>,
    writer: tokio::sync::Mutex<Option<WsSink>>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl FeedClient {
    pub fn new(
        config: FeedConfig,
        cache: Arc<PriceCache>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, FeedError> {
        let http = reqwest::Client::builder()
            .timeout(config.handshake_timeout)
            .build()
            .map_err(|error| FeedError::Handshake(error.to_string()))?;
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);

        Ok(Self {
            config,
            http,
            cache,
            notifier,
            writer: tokio::sync::Mutex::new(None),
            status_tx,
        })
    }

    /// Subscribe to connection status transitions.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.status_tx.borrow() == ConnectionStatus::Connected
    }

    /// Shared last-price cache this client keeps fresh.
    pub fn cache(&self) -> Arc<PriceCache> {
        Arc::clone(&self.cache)
    }

    /// REST handshake returning the session-bound socket URI. A 401 is
    /// `AuthExpired`: terminal for this attempt, never blindly retried.
    async fn handshake(&self) -> Result<Url, FeedError> {
        let response = self
            .http
            .get(&self.config.authorize_url)
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    FeedError::Timeout(self.config.handshake_timeout)
                } else {
                    FeedError::Handshake(error.to_string())
                }
            })?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(FeedError::AuthExpired);
        }
        if !response.status().is_success() {
            return Err(FeedError::Handshake(format!(
                "authorize endpoint returned {}",
                response.status()
            )));
        }

        let body: AuthorizeResponse = response
            .json()
            .await
            .map_err(|error| FeedError::Handshake(error.to_string()))?;
        Ok(Url::parse(&body.data.authorized_redirect_uri)?)
    }

    /// Handshake then open the transport, installing the write half.
    /// Returns the read half for the receive loop.
    async fn connect(&self) -> Result<WsSource, FeedError> {
        let session_uri = self.handshake().await?;
        debug!(uri = %session_uri, "handshake complete, opening transport");

        let (stream, _) = tokio::time::timeout(
            self.config.handshake_timeout,
            connect_async(session_uri.as_str()),
        )
        .await
        .map_err(|_| FeedError::Timeout(self.config.handshake_timeout))??;

        let (sink, source) = stream.split();
        *self.writer.lock().await = Some(sink);
        Ok(source)
    }

    async fn send_control_frame(&self, frame: &ControlFrame<'_>) -> Result<(), FeedError> {
        let payload =
            serde_json::to_vec(frame).map_err(|error| FeedError::Transport(error.to_string()))?;

        let mut writer = self.writer.lock().await;
        let sink = writer
            .as_mut()
            .ok_or_else(|| FeedError::Transport("not connected".to_string()))?;
        sink.send(Message::Binary(payload.into())).await?;
        Ok(())
    }

    /// Drive the connection until shutdown, `AuthExpired`, or the
    /// reconnect-attempt cap. On every successful reconnect the full
    /// desired instrument set is re-subscribed.
    pub async fn run(
        self: Arc<Self>,
        subscriptions: Arc<SubscriptionManager>,
        events: mpsc::Sender<FeedEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut backoff = Backoff::new(
            self.config.base_delay,
            self.config.max_delay,
            self.config.jitter_fraction,
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            let _ = self.status_tx.send(ConnectionStatus::Reconnecting);

            match self.connect().await {
                Ok(mut source) => {
                    backoff.reset();
                    let _ = self.status_tx.send(ConnectionStatus::Connected);
                    info!("feed connected");
                    self.notifier.notify(NotificationEvent::FeedConnected);

                    subscriptions.mark_all_unconfirmed();
                    let status = subscriptions.sync_all().await;
                    info!(
                        confirmed = status.confirmed,
                        failed = status.failed,
                        "instrument set re-subscribed"
                    );

                    let reason = self
                        .read_frames(&mut source, &subscriptions, &events, &mut shutdown)
                        .await;
                    *self.writer.lock().await = None;
                    let _ = self.status_tx.send(ConnectionStatus::Disconnected);

                    match reason {
                        DisconnectReason::Shutdown => break,
                        DisconnectReason::ConsumersGone => {
                            warn!("event consumers dropped, stopping feed client");
                            break;
                        }
                        DisconnectReason::Transport(reason) => {
                            warn!(%reason, "feed disconnected");
                            self.notifier
                                .notify(NotificationEvent::FeedDisconnected { reason });
                        }
                    }
                }
                Err(FeedError::AuthExpired) => {
                    // Terminal: retrying with the same credential cannot
                    // succeed. Alert once and stay down.
                    error!("credential rejected by the venue, stopping feed client");
                    self.notifier.notify(NotificationEvent::AuthExpired);
                    let _ = self.status_tx.send(ConnectionStatus::Disconnected);
                    return;
                }
                Err(error) => {
                    warn!(%error, "feed connect failed");
                    let _ = self.status_tx.send(ConnectionStatus::Disconnected);
                }
            }

            let attempt = backoff.attempt();
            if attempt >= self.config.max_reconnect_attempts {
                let verdict = probe_dns(
                    &self.config.api_host,
                    &self.config.fallback_resolvers,
                    Duration::from_secs(5),
                )
                .await;
                error!(
                    attempts = attempt,
                    ?verdict,
                    "reconnect attempts exhausted, feed stays down"
                );
                self.notifier.notify(NotificationEvent::FeedDown {
                    attempts: attempt,
                    local_network_ok: verdict.local_network_ok(),
                });
                return;
            }

            if self.config.dns_probe_every > 0
                && attempt > 0
                && attempt % self.config.dns_probe_every == 0
            {
                let verdict = probe_dns(
                    &self.config.api_host,
                    &self.config.fallback_resolvers,
                    Duration::from_secs(5),
                )
                .await;
                info!(attempt, ?verdict, "dns health probe");
            }

            let delay = backoff.next_delay();
            debug!(?delay, attempt, "backing off before reconnect");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        let _ = self.status_tx.send(ConnectionStatus::Disconnected);
    }

    /// Blocking read of one frame at a time until the transport dies or
    /// shutdown is requested.
    async fn read_frames(
        &self,
        source: &mut WsSource,
        subscriptions: &SubscriptionManager,
        events: &mpsc::Sender<FeedEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> DisconnectReason {
        loop {
            let message = tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return DisconnectReason::Shutdown;
                    }
                    continue;
                }
                message = tokio::time::timeout(self.config.read_timeout, source.next()) => message,
            };

            match message {
                Err(_) => {
                    return DisconnectReason::Transport(format!(
                        "read timeout: no data for {:?}",
                        self.config.read_timeout
                    ));
                }
                Ok(None) => return DisconnectReason::Transport("stream ended".to_string()),
                Ok(Some(Err(error))) => return DisconnectReason::Transport(error.to_string()),
                Ok(Some(Ok(Message::Close(_)))) => {
                    return DisconnectReason::Transport("closed by venue".to_string());
                }
                Ok(Some(Ok(Message::Binary(payload)))) => {
                    if self.dispatch(&payload, subscriptions, events).await.is_err() {
                        return DisconnectReason::ConsumersGone;
                    }
                }
                Ok(Some(Ok(Message::Text(payload)))) => {
                    if self
                        .dispatch(payload.as_bytes(), subscriptions, events)
                        .await
                        .is_err()
                    {
                        return DisconnectReason::ConsumersGone;
                    }
                }
                // Heartbeats are answered by the transport layer.
                Ok(Some(Ok(_))) => {}
            }
        }
    }

    /// Decode one frame and route it. A decode failure drops the single
    /// frame and keeps the loop alive; `Err` here means the downstream
    /// consumers are gone.
    async fn dispatch(
        &self,
        payload: &[u8],
        subscriptions: &SubscriptionManager,
        events: &mpsc::Sender<FeedEvent>,
    ) -> Result<(), ()> {
        match protocol::decode_frame(payload) {
            Ok(FeedMessage::ControlAck(ack)) => {
                debug!(correlation_id = %ack.correlation_id, success = ack.success, "control ack");
                subscriptions.handle_ack(&ack);
                Ok(())
            }
            Ok(FeedMessage::MarketStatus(status)) => {
                info!(segments = status.segments.len(), "market status update");
                events
                    .send(FeedEvent::MarketStatus(status))
                    .await
                    .map_err(|_| ())
            }
            Ok(FeedMessage::TickBatch(ticks)) => {
                for tick in ticks {
                    self.cache.update(&tick.key, tick.last_price);
                    events.send(FeedEvent::Tick(tick)).await.map_err(|_| ())?;
                }
                Ok(())
            }
            Err(error) => {
                // Drop the frame, keep the connection.
                warn!(%error, bytes = payload.len(), "undecodable frame dropped");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ControlTransport for FeedClient {
    async fn send_subscribe(
        &self,
        correlation_id: &str,
        keys: &[InstrumentKey],
        mode: SubscriptionMode,
    ) -> Result<(), FeedError> {
        let frame = ControlFrame {
            guid: correlation_id,
            method: "sub",
            data: ControlFrameData {
                mode: Some(mode.wire_name()),
                instrument_keys: keys.iter().map(InstrumentKey::as_str).collect(),
            },
        };
        self.send_control_frame(&frame).await
    }

    async fn send_unsubscribe(
        &self,
        correlation_id: &str,
        keys: &[InstrumentKey],
    ) -> Result<(), FeedError> {
        let frame = ControlFrame {
            guid: correlation_id,
            method: "unsub",
            data: ControlFrameData {
                mode: None,
                instrument_keys: keys.iter().map(InstrumentKey::as_str).collect(),
            },
        };
        self.send_control_frame(&frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_frame_wire_shape() {
        let frame = ControlFrame {
            guid: "sub-2-0",
            method: "sub",
            data: ControlFrameData {
                mode: Some("full"),
                instrument_keys: vec!["NSE_FO|60965", "NSE_FO|60966"],
            },
        };

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["guid"], "sub-2-0");
        assert_eq!(json["method"], "sub");
        assert_eq!(json["data"]["mode"], "full");
        assert_eq!(json["data"]["instrumentKeys"][1], "NSE_FO|60966");
    }

    #[test]
    fn test_unsubscribe_frame_omits_mode() {
        let frame = ControlFrame {
            guid: "unsub-1-4",
            method: "unsub",
            data: ControlFrameData {
                mode: None,
                instrument_keys: vec!["NSE_FO|60965"],
            },
        };

        let json = serde_json::to_value(&frame).unwrap();
        assert!(json["data"].get("mode").is_none());
    }

    #[derive(Default)]
    struct CountingNotifier {
        auth_expired: std::sync::atomic::AtomicUsize,
    }

    impl Notifier for CountingNotifier {
        fn notify(&self, event: NotificationEvent) {
            if matches!(event, NotificationEvent::AuthExpired) {
                self.auth_expired
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn test_auth_expired_makes_zero_reconnect_attempts_and_alerts_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Minimal handshake endpoint that always answers 401.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let connections_server = Arc::clone(&connections);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                connections_server.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 401 Unauthorized\r\ncontent-length: 0\r\n\r\n")
                    .await;
            }
        });

        let config = FeedConfig::new(format!("http://{addr}/authorize"), "expired-token")
            .with_max_reconnect_attempts(5);
        let cache = Arc::new(PriceCache::default());
        let notifier = Arc::new(CountingNotifier::default());
        let client = Arc::new(
            FeedClient::new(config, cache, Arc::clone(&notifier) as Arc<dyn Notifier>).unwrap(),
        );
        let subscriptions = Arc::new(SubscriptionManager::new(
            Arc::clone(&client) as Arc<dyn ControlTransport>,
            SubscriptionMode::Full,
        ));

        let (events_tx, _events_rx) = mpsc::channel(16);
        let (_stop_tx, stop_rx) = watch::channel(false);

        // Returns without entering the backoff loop.
        client.run(subscriptions, events_tx, stop_rx).await;

        assert_eq!(connections.load(Ordering::SeqCst), 1, "no retry may happen");
        assert_eq!(notifier.auth_expired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_authorize_response_field_aliases() {
        let camel: AuthorizeResponse = serde_json::from_str(
            r#"{"data":{"authorizedRedirectUri":"wss://feed.example-venue.com/session/abc"}}"#,
        )
        .unwrap();
        assert_eq!(
            camel.data.authorized_redirect_uri,
            "wss://feed.example-venue.com/session/abc"
        );

        let snake: AuthorizeResponse = serde_json::from_str(
            r#"{"data":{"authorized_redirect_uri":"wss://feed.example-venue.com/session/def"}}"#,
        )
        .unwrap();
        assert_eq!(
            snake.data.authorized_redirect_uri,
            "wss://feed.example-venue.com/session/def"
        );
    }
}
