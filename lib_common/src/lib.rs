//! # lib_common
//!
//! Shared building blocks for the predictor history relay. Each folder is a
//! feature-gated module so binaries only compile what they use:
//!
//! - **`core`**: the fixed set of houses, the bounded per-house history store
//!   and the read-only query service answering snapshot and status requests.
//! - **`ingestors`**: the Engine.IO frame codec, the handshake state machine
//!   and the reconnecting WebSocket ingestor that feeds the history store.
//! - **`loggers`**: `tracing` subscriber setup with optional log files.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Houses, bounded history store and query service.
#[cfg(feature = "core")]
pub mod core;

/// Upstream feed clients.
#[cfg(feature = "ingestors")]
pub mod ingestors;

/// Process-wide logging setup.
#[cfg(feature = "loggers")]
pub mod loggers;
