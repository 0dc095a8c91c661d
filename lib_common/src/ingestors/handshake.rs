//! # Handshake State Machine
//!
//! Transport-free model of the connector lifecycle. The ingestor feeds it
//! transport events (opened, lost, timers) and decoded frames, and performs
//! whatever I/O the machine asks for. Keeping it free of sockets lets the
//! whole handshake be exercised with literal frames.
//!
//! ```text
//! Disconnected --connecting--> Connecting --transport_opened--> HandshakeProbe
//! HandshakeProbe --Probe frame / upgrade deadline--> Active
//! Connecting|HandshakeProbe|Active --transport_lost--> Disconnected
//! any --closing--> Closing --transport_lost--> Disconnected
//! ```

use std::time::Duration;

use crate::core::query::ConnectorState;
use crate::ingestors::frame_codec::{DataEvent, Frame, OpenHandshake, OutboundFrame};

/// What the ingestor must do after a frame went through the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Reaction {
    /// Nothing.
    None,
    /// Send this frame back upstream.
    Reply(OutboundFrame),
    /// Hand this event to the history store.
    Data(DataEvent),
    /// The server ended the session.
    Closed,
}

/// Connector lifecycle for one ingestor.
#[derive(Debug, Clone)]
pub struct Handshake {
    state: ConnectorState,
    open: Option<OpenHandshake>,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    /// A machine in [`ConnectorState::Disconnected`].
    pub fn new() -> Self {
        Self {
            state: ConnectorState::Disconnected,
            open: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectorState {
        self.state
    }

    /// Handshake announced by the server for the current session, if any.
    pub fn open_handshake(&self) -> Option<&OpenHandshake> {
        self.open.as_ref()
    }

    /// Keep-alive interval for the current session.
    pub fn ping_every(&self) -> Option<Duration> {
        self.open.as_ref().and_then(OpenHandshake::ping_every)
    }

    /// A new transport session is being opened.
    pub fn connecting(&mut self) {
        self.open = None;
        self.state = ConnectorState::Connecting;
    }

    /// The transport is open; returns the probe to send.
    pub fn transport_opened(&mut self) -> OutboundFrame {
        self.state = ConnectorState::HandshakeProbe;
        OutboundFrame::Probe
    }

    /// The upgrade fallback timer fired. If the probe echo never came, the
    /// upgrade is confirmed anyway and the session becomes active.
    pub fn upgrade_deadline(&mut self) -> Option<OutboundFrame> {
        if self.state == ConnectorState::HandshakeProbe {
            self.state = ConnectorState::Active;
            Some(OutboundFrame::Upgrade)
        } else {
            None
        }
    }

    /// Routes one decoded frame.
    ///
    /// Frames are only meaningful while a session is open; anything that
    /// arrives in another state is dropped.
    pub fn on_frame(&mut self, frame: Frame) -> Reaction {
        if !matches!(
            self.state,
            ConnectorState::HandshakeProbe | ConnectorState::Active
        ) {
            return Reaction::None;
        }

        match frame {
            Frame::Open(handshake) => {
                self.open = Some(handshake);
                Reaction::None
            }
            Frame::Probe => {
                self.state = ConnectorState::Active;
                Reaction::Reply(OutboundFrame::Upgrade)
            }
            Frame::Ping => Reaction::Reply(OutboundFrame::Pong),
            Frame::Close => Reaction::Closed,
            Frame::Data(event) => Reaction::Data(event),
            Frame::NamespaceOpen | Frame::Pong | Frame::Unknown => Reaction::None,
        }
    }

    /// A shutdown was requested; the session is being torn down for good.
    pub fn closing(&mut self) {
        self.state = ConnectorState::Closing;
    }

    /// The transport is gone, for whatever reason.
    pub fn transport_lost(&mut self) {
        self.open = None;
        self.state = ConnectorState::Disconnected;
    }
}
