//! End-to-end runs of the predictor ingestor against a local fake feed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use lib_common::core::{ConnectorState, House, HistoryQuery, HistoryStore};
use lib_common::ingestors::{PredictorConfig, PredictorWssIngestor, ReconnectPolicy};
use project_tests::{eventually, FakeFeed, OPEN_SILENT, STEP};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

const RECONNECT: Duration = Duration::from_millis(100);
/// Upper bound for a redial after a lost session.
const REDIAL_WITHIN: Duration = Duration::from_secs(1);

struct Relay {
    store: Arc<HistoryStore>,
    query: HistoryQuery,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl Relay {
    fn start(feed: &FakeFeed, tweak: impl FnOnce(&mut PredictorConfig)) -> Self {
        let mut config = PredictorConfig {
            feed_url: feed.url(),
            reconnect: ReconnectPolicy {
                base: RECONNECT,
                max: RECONNECT,
            },
            connect_timeout: Duration::from_secs(5),
            // Long enough that the probe echo always wins.
            upgrade_fallback: Duration::from_secs(30),
            inactivity_timeout: Duration::from_secs(60),
        };
        tweak(&mut config);

        let store = Arc::new(HistoryStore::new());
        let ingestor = PredictorWssIngestor::new(config, Arc::clone(&store));
        let query = HistoryQuery::new(Arc::clone(&store), ingestor.state());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(ingestor.run(shutdown.clone()));
        Self {
            store,
            query,
            shutdown,
            task,
        }
    }

    fn state(&self) -> ConnectorState {
        self.query.connector_state()
    }

    async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        timeout(STEP, self.task).await??;
        assert_eq!(self.query.connector_state(), ConnectorState::Disconnected);
        Ok(())
    }
}

#[tokio::test]
async fn history_survives_a_reconnect() -> Result<()> {
    let feed = FakeFeed::bind().await?;
    let relay = Relay::start(&feed, |_| {});

    let mut first = feed.accept().await?;
    first.handshake(OPEN_SILENT).await?;
    eventually("active session", || relay.state() == ConnectorState::Active).await?;
    assert!(relay.query.get_status().connected);

    first.send(r#"42["bet888",[1.1,1.2,1.3]]"#).await?;
    eventually("first delivery", || relay.store.last_marker(House::Bet888) == Some(1.3)).await?;

    let closed_at = Instant::now();
    first.close().await?;
    eventually("disconnect", || relay.state() != ConnectorState::Active).await?;
    assert!(!relay.query.get_status().connected);

    let mut second = feed.accept().await?;
    let waited = closed_at.elapsed();
    assert!(waited >= RECONNECT / 2, "reconnected after only {waited:?}");
    assert!(waited < REDIAL_WITHIN, "reconnect took {waited:?}");

    second.handshake(OPEN_SILENT).await?;
    second.send(r#"42["bet888",[1.2,1.3,1.4]]"#).await?;
    eventually("second delivery", || relay.store.last_marker(House::Bet888) == Some(1.4)).await?;

    let body = serde_json::to_value(relay.query.get_one("bet888")?)?;
    assert_eq!(
        body,
        json!({"house": "bet888", "total": 3, "last": 1.4, "history": [1.2, 1.3, 1.4]})
    );
    let status = relay.query.get_status();
    assert!(status.connected);
    assert_eq!(status.last_updates[&House::Bet888], Some(1.4));
    assert_eq!(status.last_updates[&House::Placard], None);

    relay.stop().await?;
    second.closed_by_client().await
}

#[tokio::test]
async fn repeated_terminal_value_is_ignored() -> Result<()> {
    let feed = FakeFeed::bind().await?;
    let relay = Relay::start(&feed, |_| {});

    let mut session = feed.accept().await?;
    session.handshake(OPEN_SILENT).await?;
    session.send(r#"42["placard",[2.0,3.0]]"#).await?;
    eventually("delivery", || relay.store.last_marker(House::Placard) == Some(3.0)).await?;

    let before = relay.store.entry(House::Placard);
    session.send(r#"42["placard",[9.0,9.5,3.0]]"#).await?;
    // A later, distinct delivery proves the duplicate was already processed.
    session.send(r#"42["betway",[1.0]]"#).await?;
    eventually("marker delivery", || relay.store.last_marker(House::Betway) == Some(1.0)).await?;

    let after = relay.store.entry(House::Placard);
    assert!(Arc::ptr_eq(&before.buffer, &after.buffer));
    assert_eq!(relay.store.snapshot(House::Placard).history, vec![2.0, 3.0]);

    relay.stop().await
}

#[tokio::test]
async fn noise_does_not_disturb_the_session() -> Result<()> {
    let feed = FakeFeed::bind().await?;
    let relay = Relay::start(&feed, |_| {});

    let mut session = feed.accept().await?;
    session.handshake(OPEN_SILENT).await?;

    for noise in [
        r#"42["unknownhouse",[5.0]]"#,
        r#"42["BET888",[5.0]]"#,
        r#"42["bet888",[1.0,"x"]]"#,
        r#"42{"house":"bet888"}"#,
        "6",
        "hello",
    ] {
        session.send(noise).await?;
    }
    session.send(r#"42["betway",[7.25]]"#).await?;
    eventually("valid delivery", || relay.store.last_marker(House::Betway) == Some(7.25)).await?;

    assert_eq!(relay.store.last_marker(House::Bet888), None);
    assert_eq!(relay.state(), ConnectorState::Active);

    relay.stop().await
}

#[tokio::test]
async fn server_ping_gets_a_pong() -> Result<()> {
    let feed = FakeFeed::bind().await?;
    let relay = Relay::start(&feed, |_| {});

    let mut session = feed.accept().await?;
    session.handshake(OPEN_SILENT).await?;
    session.send("2").await?;
    session.expect("3").await?;

    relay.stop().await
}

#[tokio::test]
async fn upgrade_is_confirmed_without_probe_echo() -> Result<()> {
    let feed = FakeFeed::bind().await?;
    let relay = Relay::start(&feed, |config| {
        config.upgrade_fallback = Duration::from_millis(50);
    });

    let mut session = feed.accept().await?;
    session.send(OPEN_SILENT).await?;
    session.expect("2probe").await?;
    session.expect("5").await?;
    eventually("active session", || relay.state() == ConnectorState::Active).await?;

    // A late echo is still confirmed.
    session.send("3probe").await?;
    session.expect("5").await?;

    relay.stop().await
}

#[tokio::test]
async fn client_keeps_the_session_alive() -> Result<()> {
    let feed = FakeFeed::bind().await?;
    let relay = Relay::start(&feed, |_| {});

    let mut session = feed.accept().await?;
    session
        .handshake(r#"0{"sid":"ka","upgrades":[],"pingInterval":100,"pingTimeout":5000}"#)
        .await?;
    session.expect("2").await?;
    session.expect("2").await?;

    relay.stop().await
}

#[tokio::test]
async fn close_packet_triggers_a_reconnect() -> Result<()> {
    let feed = FakeFeed::bind().await?;
    let relay = Relay::start(&feed, |_| {});

    let mut first = feed.accept().await?;
    first.handshake(OPEN_SILENT).await?;
    first.send("41").await?;

    let mut second = feed.accept().await?;
    second.handshake(OPEN_SILENT).await?;
    eventually("active again", || relay.state() == ConnectorState::Active).await?;

    relay.stop().await
}

#[tokio::test]
async fn silent_feed_is_dropped_and_redialed() -> Result<()> {
    let feed = FakeFeed::bind().await?;
    let relay = Relay::start(&feed, |config| {
        config.inactivity_timeout = Duration::from_millis(300);
    });

    let mut first = feed.accept().await?;
    first.handshake(OPEN_SILENT).await?;
    first.closed_by_client().await?;

    let mut second = feed.accept().await?;
    second.handshake(OPEN_SILENT).await?;

    relay.stop().await
}

#[tokio::test]
async fn failed_handshakes_keep_retrying_until_shutdown() -> Result<()> {
    // Accepts TCP and hangs up before the WebSocket upgrade.
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("ws://{}/socket.io/?EIO=3&transport=websocket", listener.local_addr()?);

    let mut config = PredictorConfig::with_feed_url(&url)?;
    config.reconnect = ReconnectPolicy {
        base: Duration::from_millis(20),
        max: Duration::from_millis(20),
    };
    let ingestor = PredictorWssIngestor::new(config, Arc::new(HistoryStore::new()));
    let state = ingestor.state();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(ingestor.run(shutdown.clone()));

    for _ in 0..3 {
        let (stream, _) = timeout(STEP, listener.accept()).await??;
        drop(stream);
    }
    assert_ne!(*state.borrow(), ConnectorState::Active);

    shutdown.cancel();
    timeout(STEP, task).await??;
    assert_eq!(*state.borrow(), ConnectorState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn stalled_upgrade_is_abandoned_and_redialed() -> Result<()> {
    // Accepts TCP but never answers the WebSocket upgrade.
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("ws://{}/socket.io/?EIO=3&transport=websocket", listener.local_addr()?);

    let mut config = PredictorConfig::with_feed_url(&url)?;
    config.reconnect = ReconnectPolicy {
        base: Duration::from_millis(50),
        max: Duration::from_millis(50),
    };
    config.connect_timeout = Duration::from_millis(300);
    let ingestor = PredictorWssIngestor::new(config, Arc::new(HistoryStore::new()));
    let state = ingestor.state();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(ingestor.run(shutdown.clone()));

    let (held, _) = timeout(STEP, listener.accept()).await??;
    let first_dial = Instant::now();
    let (_second, _) = timeout(STEP, listener.accept()).await??;
    let waited = first_dial.elapsed();
    assert!(waited < REDIAL_WITHIN + Duration::from_millis(300), "redial took {waited:?}");
    drop(held);

    assert_ne!(*state.borrow(), ConnectorState::Active);
    shutdown.cancel();
    timeout(STEP, task).await??;
    assert_eq!(*state.borrow(), ConnectorState::Disconnected);
    Ok(())
}
