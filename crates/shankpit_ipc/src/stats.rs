//! Node-wide counters, shared by every connection task.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for the control socket.
#[derive(Debug, Default)]
pub struct NodeStats {
    /// Connections accepted.
    pub connections: AtomicU64,
    /// Sessions established.
    pub handshakes_accepted: AtomicU64,
    /// Handshakes rejected (malformed or session already active).
    pub handshakes_rejected: AtomicU64,
    /// Frames read after the handshake.
    pub frames_received: AtomicU64,
    /// Frames dropped as malformed.
    pub frames_malformed: AtomicU64,
    /// Frames with a bad HMAC tag.
    pub auth_failures: AtomicU64,
    /// Heartbeats rejected as replays.
    pub replays_rejected: AtomicU64,
    /// Heartbeats scored as anomalous.
    pub anomalies_flagged: AtomicU64,
    /// Bonuses issued for verified events.
    pub bonuses_applied: AtomicU64,
    /// Kill-switch firings (one per closed connection).
    pub kill_switches: AtomicU64,
}

/// Point-in-time copy of [`NodeStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Connections accepted.
    pub connections: u64,
    /// Sessions established.
    pub handshakes_accepted: u64,
    /// Handshakes rejected.
    pub handshakes_rejected: u64,
    /// Frames read after the handshake.
    pub frames_received: u64,
    /// Frames dropped as malformed.
    pub frames_malformed: u64,
    /// Frames with a bad HMAC tag.
    pub auth_failures: u64,
    /// Heartbeats rejected as replays.
    pub replays_rejected: u64,
    /// Heartbeats scored as anomalous.
    pub anomalies_flagged: u64,
    /// Bonuses issued.
    pub bonuses_applied: u64,
    /// Kill-switch firings.
    pub kill_switches: u64,
}

impl NodeStats {
    /// Increments a counter.
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies every counter.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            connections: load(&self.connections),
            handshakes_accepted: load(&self.handshakes_accepted),
            handshakes_rejected: load(&self.handshakes_rejected),
            frames_received: load(&self.frames_received),
            frames_malformed: load(&self.frames_malformed),
            auth_failures: load(&self.auth_failures),
            replays_rejected: load(&self.replays_rejected),
            anomalies_flagged: load(&self.anomalies_flagged),
            bonuses_applied: load(&self.bonuses_applied),
            kill_switches: load(&self.kill_switches),
        }
    }
}
