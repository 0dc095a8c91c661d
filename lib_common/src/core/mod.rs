//! # Core Module
//!
//! The state side of the relay. Nothing in here performs I/O:
//!
//! - **`houses`**: the fixed set of feed sources.
//! - **`history_store`**: the bounded, deduplicating per-house history shared
//!   by the ingestor (writer) and the query service (readers).
//! - **`query`**: read-only snapshot and status queries, plus the connector
//!   state type the ingestor publishes.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The fixed set of feed sources.
pub mod houses;
/// Bounded per-house history with terminal-value dedup.
pub mod history_store;
/// Read-only queries over the history store.
pub mod query;

// --- Public API Re-exports ---
pub use houses::{House, UnknownHouse};
pub use history_store::{HistoryEntry, HistoryStore, Snapshot, UpdateOutcome, EXPOSE_MAX, RETAIN_MAX};
pub use query::{ConnectorState, HistoryQuery, HouseHistory, QueryError, StatusReport};
