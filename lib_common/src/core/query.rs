//! # Query Service
//!
//! Read-only facade used by the HTTP layer. It never mutates the store and
//! never waits on the ingestor: connector liveness is read from a `watch`
//! channel the ingestor publishes into.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

use crate::core::history_store::{HistoryStore, Snapshot};
use crate::core::houses::{House, UnknownHouse};

/// Lifecycle of the single upstream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorState {
    /// No session and either waiting for the reconnect delay or stopped.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open, probe sent, waiting for the upgrade to complete.
    HandshakeProbe,
    /// Session established; data frames are flowing.
    Active,
    /// Shutting down on request; no reconnect will follow.
    Closing,
}

/// Errors surfaced to API callers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    /// The requested house is not one of the known sources.
    #[error("unknown house '{0}'. Use: placard, bet888 or betway")]
    InvalidSource(String),
}

impl From<UnknownHouse> for QueryError {
    fn from(err: UnknownHouse) -> Self {
        QueryError::InvalidSource(err.0)
    }
}

/// Response of [`HistoryQuery::get_one`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HouseHistory {
    /// The resolved house, always lowercase.
    pub house: House,
    /// The exposed history.
    #[serde(flatten)]
    pub snapshot: Snapshot,
}

/// Response of [`HistoryQuery::get_status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    /// `true` only while the upstream session is [`ConnectorState::Active`].
    pub connected: bool,
    /// Last accepted terminal value per house.
    pub last_updates: BTreeMap<House, Option<f64>>,
    /// Time of the report, ISO-8601 UTC with millisecond precision.
    pub timestamp: String,
}

/// Shared, cloneable read access to the history and the connector state.
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    store: Arc<HistoryStore>,
    connector: watch::Receiver<ConnectorState>,
}

impl HistoryQuery {
    /// Builds the service over a store and the ingestor's state channel.
    pub fn new(store: Arc<HistoryStore>, connector: watch::Receiver<ConnectorState>) -> Self {
        Self { store, connector }
    }

    /// History of one house, matched case-insensitively.
    pub fn get_one(&self, source: &str) -> Result<HouseHistory, QueryError> {
        let house: House = source.parse()?;
        Ok(HouseHistory {
            house,
            snapshot: self.store.snapshot(house),
        })
    }

    /// History of every known house, keyed by house.
    pub fn get_all(&self) -> BTreeMap<House, Snapshot> {
        House::ALL
            .into_iter()
            .map(|house| (house, self.store.snapshot(house)))
            .collect()
    }

    /// Connector liveness and the last accepted values.
    pub fn get_status(&self) -> StatusReport {
        let state = *self.connector.borrow();
        StatusReport {
            connected: state == ConnectorState::Active,
            last_updates: House::ALL
                .into_iter()
                .map(|house| (house, self.store.last_marker(house)))
                .collect(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Current connector state.
    pub fn connector_state(&self) -> ConnectorState {
        *self.connector.borrow()
    }
}
