//! # Data Ingestors Module
//!
//! Everything between the upstream predictor socket and the history store.
//!
//! ## Contained Modules:
//! - **`frame_codec`**: classifies Engine.IO / Socket.IO text messages into a
//!   closed set of frames and renders the few frames the client sends.
//! - **`handshake`**: the transport-free connector state machine.
//! - **`predictor_wss`**: the reconnecting WebSocket client that ties the two
//!   together and writes into the store.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Engine.IO / Socket.IO frame classification.
pub mod frame_codec;
/// Connector lifecycle state machine.
pub mod handshake;
/// The reconnecting WebSocket client for the predictor feed.
pub mod predictor_wss;

// --- Public API Re-exports ---
pub use frame_codec::{DataEvent, Frame, OpenHandshake, OutboundFrame};
pub use handshake::{Handshake, Reaction};
pub use predictor_wss::{
    IngestorError, PredictorConfig, PredictorWssIngestor, ReconnectPolicy, DEFAULT_FEED_URL,
};
