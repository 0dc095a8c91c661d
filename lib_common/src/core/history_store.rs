//! # History Store
//!
//! The single piece of mutable state shared between the ingestor and the read
//! API. Every house owns one entry made of the most recent window delivered by
//! the feed and the terminal value of that window, the "marker" used to tell a
//! resend from a genuine update.
//!
//! ## Rules
//!
//! - **Wholesale replacement**: an update either swaps the whole buffer or is
//!   rejected. Buffers are `Arc<[f64]>`, so a rejected update keeps the very
//!   same allocation.
//! - **Dedup on the terminal value**: an update whose last element equals the
//!   current marker is a resend. Two genuine consecutive outcomes with the same
//!   value are indistinguishable from a resend; this granularity is kept on
//!   purpose.
//! - **Bounded**: at most [`RETAIN_MAX`] values are kept, at most
//!   [`EXPOSE_MAX`] are handed out by [`HistoryStore::snapshot`].
//!
//! Each entry sits behind its own `RwLock`, so the `(buffer, marker)` pair is
//! always observed together and houses never contend with each other. Locks
//! are held for a pointer swap or a short copy, never across I/O.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use serde::Serialize;

use crate::core::houses::House;

/// Maximum number of values retained per house.
pub const RETAIN_MAX: usize = 120;

/// Maximum number of values exposed per house by a snapshot.
pub const EXPOSE_MAX: usize = 60;

/// The stored state of one house.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Values in the order the feed delivered them, at most [`RETAIN_MAX`].
    pub buffer: Arc<[f64]>,
    /// Terminal value of the last accepted update. `None` until the first one.
    pub last_marker: Option<f64>,
}

impl Default for HistoryEntry {
    fn default() -> Self {
        Self {
            buffer: Arc::from(Vec::new()),
            last_marker: None,
        }
    }
}

/// What [`HistoryStore::update`] did with a delivery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateOutcome {
    /// The buffer was replaced; carries the new marker.
    Accepted {
        /// Terminal value of the accepted delivery.
        last: f64,
        /// Number of values now retained.
        retained: usize,
    },
    /// The terminal value matched the current marker; nothing changed.
    Duplicate,
    /// The delivery carried no values; nothing changed.
    Ignored,
}

/// Read-only copy of the exposed part of one house's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Number of exposed values.
    pub total: usize,
    /// Last exposed value, `null` when nothing has been received yet.
    pub last: Option<f64>,
    /// The exposed values, oldest-first as delivered.
    pub history: Vec<f64>,
}

/// Per-house bounded history with terminal-value dedup.
#[derive(Debug)]
pub struct HistoryStore {
    entries: [RwLock<HistoryEntry>; House::COUNT],
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryStore {
    /// Creates a store with an empty entry for every known house.
    pub fn new() -> Self {
        Self {
            entries: std::array::from_fn(|_| RwLock::new(HistoryEntry::default())),
        }
    }

    /// Applies one delivery from the feed.
    ///
    /// The candidate buffer is built before the write lock is taken, so the
    /// critical section is a comparison and a pointer swap.
    pub fn update(&self, house: House, values: &[f64]) -> UpdateOutcome {
        let Some(&candidate) = values.last() else {
            return UpdateOutcome::Ignored;
        };

        let slot = &self.entries[house.index()];

        // Cheap early exit for resends, which are the common case on this feed.
        if Self::read_entry(slot).last_marker == Some(candidate) {
            return UpdateOutcome::Duplicate;
        }

        let retained = values.len().min(RETAIN_MAX);
        let buffer: Arc<[f64]> = Arc::from(&values[..retained]);

        let mut entry = slot.write().unwrap_or_else(PoisonError::into_inner);
        if entry.last_marker == Some(candidate) {
            return UpdateOutcome::Duplicate;
        }
        entry.buffer = buffer;
        entry.last_marker = Some(candidate);

        UpdateOutcome::Accepted {
            last: candidate,
            retained,
        }
    }

    /// Copies the exposed window of a house.
    pub fn snapshot(&self, house: House) -> Snapshot {
        let buffer = Arc::clone(&Self::read_entry(&self.entries[house.index()]).buffer);

        // The lock is already released; the Arc keeps this version alive.
        let history: Vec<f64> = buffer.iter().take(EXPOSE_MAX).copied().collect();
        Snapshot {
            total: history.len(),
            last: history.last().copied(),
            history,
        }
    }

    /// Terminal value of the last accepted delivery for a house.
    pub fn last_marker(&self, house: House) -> Option<f64> {
        Self::read_entry(&self.entries[house.index()]).last_marker
    }

    /// A cheap clone of the stored entry (the buffer is shared, not copied).
    pub fn entry(&self, house: House) -> HistoryEntry {
        Self::read_entry(&self.entries[house.index()]).clone()
    }

    fn read_entry(slot: &RwLock<HistoryEntry>) -> RwLockReadGuard<'_, HistoryEntry> {
        // A writer cannot panic halfway through a swap, so a poisoned entry is
        // still consistent.
        slot.read().unwrap_or_else(PoisonError::into_inner)
    }
}
