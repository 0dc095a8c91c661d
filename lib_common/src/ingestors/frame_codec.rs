//! # Frame Codec
//!
//! The predictor feed speaks Engine.IO v3 with Socket.IO packets on top, sent
//! as WebSocket text messages. Each message starts with a packet type digit
//! (and, for Socket.IO, a second one) followed by an optional JSON payload:
//!
//! | Inbound text            | Frame                 |
//! |-------------------------|-----------------------|
//! | `0{"sid":..}`           | [`Frame::Open`]       |
//! | `40`, `40{..}`          | [`Frame::NamespaceOpen`] |
//! | `3probe`                | [`Frame::Probe`]      |
//! | `2`                     | [`Frame::Ping`]       |
//! | `3`                     | [`Frame::Pong`]       |
//! | `1`, `41`               | [`Frame::Close`]      |
//! | `42["house",[1.5,..]]`  | [`Frame::Data`]       |
//!
//! Anything else, including a data frame whose payload is not exactly
//! `[string, [number, ...]]`, parses to [`Frame::Unknown`]. The feed is known
//! to interleave frames we do not care about, so decoding never fails.

use std::time::Duration;

use serde::Deserialize;

/// Prefix of a Socket.IO event packet (`4` message + `2` event).
const EVENT_PREFIX: &str = "42";

/// Handshake payload carried by the Engine.IO open packet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    /// Session id assigned by the server.
    #[serde(default)]
    pub sid: String,
    /// Transports the server is willing to upgrade to.
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Interval, in milliseconds, at which the client is expected to ping.
    #[serde(default)]
    pub ping_interval: Option<u64>,
    /// Milliseconds the server waits for a ping before dropping the session.
    #[serde(default)]
    pub ping_timeout: Option<u64>,
}

impl OpenHandshake {
    /// Ping interval as a `Duration`, when the server announced a usable one.
    pub fn ping_every(&self) -> Option<Duration> {
        self.ping_interval
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// A decoded `[source, values]` event.
#[derive(Debug, Clone, PartialEq)]
pub struct DataEvent {
    /// Source identifier exactly as sent by the feed.
    pub source: String,
    /// The delivered window, in feed order.
    pub values: Vec<f64>,
}

/// One inbound message, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Engine.IO open packet with its handshake.
    Open(OpenHandshake),
    /// Socket.IO namespace connect acknowledgement. Informational.
    NamespaceOpen,
    /// Answer to our `2probe`; must be confirmed with [`OutboundFrame::Upgrade`].
    Probe,
    /// Server ping; answered with [`OutboundFrame::Pong`].
    Ping,
    /// Server pong to one of our pings.
    Pong,
    /// Engine.IO close or Socket.IO namespace disconnect.
    Close,
    /// A data event.
    Data(DataEvent),
    /// Anything else; discarded.
    Unknown,
}

/// Frames the connector sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundFrame {
    /// `2probe`, sent right after the transport opens.
    Probe,
    /// `5`, confirms the upgrade after the probe echo.
    Upgrade,
    /// `2`, client keep-alive.
    Ping,
    /// `3`, answer to a server ping.
    Pong,
}

impl OutboundFrame {
    /// Wire text of the frame.
    pub const fn as_str(self) -> &'static str {
        match self {
            OutboundFrame::Probe => "2probe",
            OutboundFrame::Upgrade => "5",
            OutboundFrame::Ping => "2",
            OutboundFrame::Pong => "3",
        }
    }
}

/// Classifies one inbound text message.
pub fn parse(text: &str) -> Frame {
    match text {
        "3probe" => return Frame::Probe,
        "2" => return Frame::Ping,
        "3" => return Frame::Pong,
        "1" | "41" => return Frame::Close,
        _ => {}
    }

    if let Some(payload) = text.strip_prefix(EVENT_PREFIX) {
        return parse_event(payload).map_or(Frame::Unknown, Frame::Data);
    }
    if text.starts_with("40") {
        return Frame::NamespaceOpen;
    }
    if let Some(payload) = text.strip_prefix('0') {
        if payload.starts_with('{') {
            return serde_json::from_str::<OpenHandshake>(payload).map_or(Frame::Unknown, Frame::Open);
        }
    }

    Frame::Unknown
}

fn parse_event(payload: &str) -> Option<DataEvent> {
    // A two-element tuple rejects any other arity, and `f64` rejects
    // non-numeric entries, so one deserialize covers the whole shape check.
    let (source, values) = serde_json::from_str::<(String, Vec<f64>)>(payload).ok()?;
    Some(DataEvent { source, values })
}
