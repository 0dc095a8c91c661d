//! Test support: a local WebSocket server that plays the predictor feed, so
//! the ingestor can be exercised end to end without the network.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

/// Open packet without a ping interval, so the client never sends keep-alives.
pub const OPEN_SILENT: &str = r#"0{"sid":"test-sid","upgrades":[],"pingTimeout":60000}"#;

/// How long any single step of a scenario may take.
pub const STEP: Duration = Duration::from_secs(5);

/// A listening fake feed.
pub struct FakeFeed {
    listener: TcpListener,
    addr: SocketAddr,
}

impl FakeFeed {
    /// Binds on an ephemeral loopback port.
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        Ok(Self { listener, addr })
    }

    /// Feed URL in the shape the real feed uses.
    pub fn url(&self) -> String {
        format!("ws://{}/socket.io/?EIO=3&transport=websocket", self.addr)
    }

    /// Waits for the next client session.
    pub async fn accept(&self) -> Result<FeedSession> {
        let (stream, _) = timeout(STEP, self.listener.accept())
            .await
            .context("no client connected")??;
        let ws = accept_async(stream).await?;
        Ok(FeedSession { ws })
    }
}

/// One accepted client session.
pub struct FeedSession {
    ws: WebSocketStream<TcpStream>,
}

impl FeedSession {
    /// Sends one text frame.
    pub async fn send(&mut self, text: &str) -> Result<()> {
        self.ws.send(Message::text(text.to_string())).await?;
        Ok(())
    }

    /// Next text frame from the client, skipping control frames.
    pub async fn recv(&mut self) -> Result<String> {
        loop {
            let msg = timeout(STEP, self.ws.next())
                .await
                .context("client sent nothing")?;
            match msg {
                Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_owned()),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(other)) => bail!("unexpected frame from client: {other:?}"),
                Some(Err(e)) => return Err(e.into()),
                None => bail!("client went away"),
            }
        }
    }

    /// Waits for `expected`, failing on any other text frame.
    pub async fn expect(&mut self, expected: &str) -> Result<()> {
        let got = self.recv().await?;
        if got != expected {
            bail!("expected {expected:?} from client, got {got:?}");
        }
        Ok(())
    }

    /// Open, probe echo and namespace ack, the way the real feed greets.
    pub async fn handshake(&mut self, open: &str) -> Result<()> {
        self.send(open).await?;
        self.expect("2probe").await?;
        self.send("3probe").await?;
        self.expect("5").await?;
        self.send("40").await
    }

    /// Sends a close frame and drops the connection.
    pub async fn close(mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }

    /// Waits until the client closes the session.
    pub async fn closed_by_client(&mut self) -> Result<()> {
        loop {
            match timeout(STEP, self.ws.next()).await.context("client kept the session open")? {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return Ok(()),
                Some(Ok(_)) => continue,
            }
        }
    }
}

/// Polls `condition` every 10ms until it holds or [`STEP`] elapses.
pub async fn eventually<F>(what: &str, mut condition: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + STEP;
    while Instant::now() < deadline {
        if condition() {
            return Ok(());
        }
        sleep(Duration::from_millis(10)).await;
    }
    Err(anyhow!("timed out waiting for {what}"))
}
