//! # Replay Protection
//!
//! Strictly monotonic sequence admission.
//!
//! ## Rule
//!
//! A sequence number is admitted iff it is strictly greater than the last
//! admitted one. The comparison and the cursor update are a single atomic
//! step, so two callers racing on the same cursor can never both admit the
//! same number.
//!
//! Frames of one session arrive over one stream connection and cannot be
//! reordered in transit, so there is no reorder window: anything at or
//! below the cursor is a replay.

use std::sync::atomic::{AtomicU64, Ordering};

/// Last accepted sequence number of a session.
#[derive(Debug, Default)]
pub struct SequenceCursor {
    last_accepted: AtomicU64,
}

impl SequenceCursor {
    /// Creates a cursor that has accepted nothing yet.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_accepted: AtomicU64::new(0),
        }
    }

    /// Last accepted sequence number (0 before the first acceptance).
    #[must_use]
    pub fn last_accepted(&self) -> u64 {
        self.last_accepted.load(Ordering::Acquire)
    }

    /// Advances the cursor to `sequence` if it is strictly greater.
    ///
    /// On rejection returns the cursor value the sequence was compared to.
    fn try_advance(&self, sequence: u64) -> Result<u64, u64> {
        self.last_accepted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                (sequence > last).then_some(sequence)
            })
    }
}

/// Result of a sequence admission check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Sequence accepted; cursor now equals it.
    Accepted,
    /// Sequence at or below the cursor.
    Replayed {
        /// Rejected sequence number.
        sequence: u64,
        /// Cursor value at the time of the check.
        last_accepted: u64,
    },
}

impl Admission {
    /// Returns true if the sequence was accepted.
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Monotonic per-session sequence tracker.
#[derive(Debug, Default)]
pub struct ReplayGuard {
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl ReplayGuard {
    /// Creates a guard with zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Admits `sequence` against `cursor`.
    ///
    /// Rejections are reported through a diagnostic only; the caller must
    /// not act on the frame.
    pub fn admit(&self, cursor: &SequenceCursor, sequence: u64) -> Admission {
        match cursor.try_advance(sequence) {
            Ok(_) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                Admission::Accepted
            }
            Err(last_accepted) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    sequence,
                    last_accepted,
                    "replay detected: sequence not above cursor"
                );
                Admission::Replayed {
                    sequence,
                    last_accepted,
                }
            }
        }
    }

    /// Number of admitted sequences.
    #[must_use]
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Number of rejected sequences.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}
