//! # Predictor WSS Ingestor
//!
//! Long-running WebSocket client for the predictor feed. It owns the single
//! upstream session, drives the [`Handshake`] machine with transport events
//! and decoded frames, writes accepted deliveries into the shared
//! [`HistoryStore`], and publishes its [`ConnectorState`] on a `watch`
//! channel for the status query.
//!
//! ## Lifecycle
//! - One `run` task owns both the session and the reconnect timer, so there is
//!   never more than one live session or one pending reconnect.
//! - A lost session (close, read error, close frame, inactivity watchdog) is
//!   logged and followed by a reconnect after the policy delay. Attempts are
//!   unbounded; the counter resets once a session reaches `Active`.
//! - Cancelling the shutdown token closes the socket and ends the task.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval, interval_at, sleep, timeout, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::core::history_store::{HistoryStore, UpdateOutcome};
use crate::core::houses::House;
use crate::core::query::ConnectorState;
use crate::ingestors::frame_codec::{self, DataEvent, OutboundFrame};
use crate::ingestors::handshake::{Handshake, Reaction};

/// Default upstream endpoint of the predictor feed.
pub const DEFAULT_FEED_URL: &str =
    "wss://predictor-uqfp.onrender.com/socket.io/?EIO=3&transport=websocket";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Errors raised while building an ingestor configuration.
#[derive(Debug, Error)]
pub enum IngestorError {
    /// The feed URL could not be parsed.
    #[error("invalid feed url '{url}': {source}")]
    InvalidFeedUrl {
        /// The rejected value.
        url: String,
        /// Why it was rejected.
        #[source]
        source: url::ParseError,
    },
    /// The feed URL is not a WebSocket URL.
    #[error("feed url must use ws:// or wss://, got '{0}'")]
    UnsupportedScheme(String),
}

/// Delay between reconnect attempts: `base * 2^attempt`, capped at `max`.
///
/// With `base == max` (the default) the delay is constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound for any retry delay.
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(3),
            max: Duration::from_secs(3),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base
            .saturating_mul(factor)
            .min(self.max.max(self.base))
    }
}

/// Configuration for the predictor stream.
#[derive(Debug, Clone)]
pub struct PredictorConfig {
    /// WebSocket endpoint, including the Engine.IO query string.
    pub feed_url: String,
    /// Reconnect delays.
    pub reconnect: ReconnectPolicy,
    /// Deadline for the TCP, TLS and WebSocket upgrade of one dial.
    pub connect_timeout: Duration,
    /// How long to wait for the probe echo before confirming the upgrade anyway.
    pub upgrade_fallback: Duration,
    /// Silence after which the session is considered dead.
    pub inactivity_timeout: Duration,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            upgrade_fallback: Duration::from_millis(100),
            inactivity_timeout: Duration::from_secs(60),
        }
    }
}

impl PredictorConfig {
    /// Default configuration pointed at `feed_url`, which must be a `ws://`
    /// or `wss://` URL.
    pub fn with_feed_url(feed_url: &str) -> Result<Self, IngestorError> {
        let parsed = Url::parse(feed_url).map_err(|source| IngestorError::InvalidFeedUrl {
            url: feed_url.to_string(),
            source,
        })?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(IngestorError::UnsupportedScheme(feed_url.to_string()));
        }
        Ok(Self {
            feed_url: parsed.to_string(),
            ..Self::default()
        })
    }
}

enum SessionEnd {
    Lost { reached_active: bool },
    Shutdown,
}

/// The reconnecting feed client.
pub struct PredictorWssIngestor {
    config: PredictorConfig,
    store: Arc<HistoryStore>,
    machine: Handshake,
    state_tx: watch::Sender<ConnectorState>,
}

impl PredictorWssIngestor {
    /// Creates an ingestor writing into `store`. Nothing happens until
    /// [`run`](Self::run) is awaited.
    pub fn new(config: PredictorConfig, store: Arc<HistoryStore>) -> Self {
        let (state_tx, _) = watch::channel(ConnectorState::Disconnected);
        Self {
            config,
            store,
            machine: Handshake::new(),
            state_tx,
        }
    }

    /// A receiver following the connector state.
    pub fn state(&self) -> watch::Receiver<ConnectorState> {
        self.state_tx.subscribe()
    }

    /// Main loop: connect, drive the session, wait, repeat, until `shutdown`
    /// is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut attempt: u32 = 0;

        loop {
            self.machine.connecting();
            self.publish();
            info!(url = %self.config.feed_url, "Connecting to predictor feed");

            let connected = tokio::select! {
                _ = shutdown.cancelled() => None,
                res = timeout(self.config.connect_timeout, connect_async(self.config.feed_url.as_str())) => Some(res),
            };
            let Some(connected) = connected else {
                break;
            };

            match connected {
                Ok(Ok((ws_stream, _))) => {
                    info!("Predictor feed connection open");
                    match self.drive_session(ws_stream, &shutdown).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost { reached_active } => {
                            if reached_active {
                                attempt = 0;
                            }
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Failed to connect to predictor feed");
                }
                Err(_) => {
                    warn!(
                        timeout_ms = u64::try_from(self.config.connect_timeout.as_millis()).unwrap_or(u64::MAX),
                        "Predictor feed did not complete the upgrade in time"
                    );
                }
            }

            self.machine.transport_lost();
            self.publish();

            let delay = self.config.reconnect.delay_for(attempt);
            attempt = attempt.saturating_add(1);
            info!(
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt,
                "Reconnecting to predictor feed"
            );

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        self.machine.transport_lost();
        self.publish();
        info!("Predictor ingestor stopped");
    }

    async fn drive_session(&mut self, ws_stream: WsStream, shutdown: &CancellationToken) -> SessionEnd {
        let (mut write, mut read) = ws_stream.split();

        let probe = self.machine.transport_opened();
        self.publish();
        if let Err(e) = send(&mut write, probe).await {
            warn!(error = %e, "Failed to send probe");
            return SessionEnd::Lost { reached_active: false };
        }

        let upgrade_deadline = sleep(self.config.upgrade_fallback);
        tokio::pin!(upgrade_deadline);

        let mut keepalive: Option<Interval> = None;
        let mut watchdog = interval(Duration::from_secs(1));
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_activity = Instant::now();
        let mut reached_active = false;

        loop {
            if self.machine.state() == ConnectorState::Active {
                reached_active = true;
                if keepalive.is_none() {
                    if let Some(every) = self.machine.ping_every() {
                        debug!(every_ms = u64::try_from(every.as_millis()).unwrap_or(u64::MAX), "Keep-alive armed");
                        keepalive = Some(interval_at(Instant::now() + every, every));
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.machine.closing();
                    self.publish();
                    info!("Closing predictor feed connection");
                    let _ = write.send(Message::Close(None)).await;
                    let _ = write.close().await;
                    return SessionEnd::Shutdown;
                }
                _ = &mut upgrade_deadline, if self.machine.state() == ConnectorState::HandshakeProbe => {
                    if let Some(upgrade) = self.machine.upgrade_deadline() {
                        debug!("No probe echo yet, confirming upgrade");
                        self.publish();
                        if let Err(e) = send(&mut write, upgrade).await {
                            warn!(error = %e, "Failed to send upgrade");
                            return SessionEnd::Lost { reached_active };
                        }
                    }
                }
                _ = tick(&mut keepalive) => {
                    if let Err(e) = send(&mut write, OutboundFrame::Ping).await {
                        warn!(error = %e, "Failed to send keep-alive");
                        return SessionEnd::Lost { reached_active };
                    }
                }
                _ = watchdog.tick() => {
                    if last_activity.elapsed() > self.config.inactivity_timeout {
                        warn!(
                            timeout_s = self.config.inactivity_timeout.as_secs(),
                            "No traffic from predictor feed, dropping session"
                        );
                        return SessionEnd::Lost { reached_active };
                    }
                }
                msg = read.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                        Some(Ok(Message::Binary(bin))) => match std::str::from_utf8(&bin) {
                            Ok(text) => text.to_owned(),
                            Err(_) => {
                                trace!(len = bin.len(), "Ignoring non UTF-8 binary frame");
                                last_activity = Instant::now();
                                continue;
                            }
                        },
                        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                            last_activity = Instant::now();
                            continue;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            warn!(?frame, "Predictor feed closed the connection");
                            return SessionEnd::Lost { reached_active };
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Predictor feed read error");
                            return SessionEnd::Lost { reached_active };
                        }
                        None => {
                            warn!("Predictor feed stream ended");
                            return SessionEnd::Lost { reached_active };
                        }
                    };
                    last_activity = Instant::now();

                    let before = self.machine.state();
                    let reaction = self.machine.on_frame(frame_codec::parse(&text));
                    if self.machine.state() != before {
                        self.publish();
                    }

                    match reaction {
                        Reaction::None => {}
                        Reaction::Reply(frame) => {
                            if let Err(e) = send(&mut write, frame).await {
                                warn!(error = %e, "Failed to reply to predictor feed");
                                return SessionEnd::Lost { reached_active };
                            }
                        }
                        Reaction::Data(event) => self.apply(event),
                        Reaction::Closed => {
                            warn!("Predictor feed sent a close packet");
                            return SessionEnd::Lost { reached_active };
                        }
                    }
                }
            }
        }
    }

    fn apply(&self, event: DataEvent) {
        let Some(house) = House::from_feed_id(&event.source) else {
            trace!(source = %event.source, "Ignoring unknown source");
            return;
        };

        match self.store.update(house, &event.values) {
            UpdateOutcome::Accepted { last, retained } => {
                info!(
                    house = %house,
                    retained,
                    "[{}] updated | last: {:.2}x",
                    house.as_str().to_uppercase(),
                    last
                );
            }
            UpdateOutcome::Duplicate => trace!(house = %house, "Duplicate delivery"),
            UpdateOutcome::Ignored => debug!(house = %house, "Empty delivery ignored"),
        }
    }

    fn publish(&self) {
        let next = self.machine.state();
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(from = ?current, to = ?next, "Connector state");
            *current = next;
            true
        });
    }
}

async fn send(write: &mut WsSink, frame: OutboundFrame) -> Result<(), tungstenite::Error> {
    trace!(frame = frame.as_str(), "Sending to predictor feed");
    write.send(Message::Text(frame.as_str().to_string().into())).await
}

async fn tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
