//! # Frame Dispatch
//!
//! Routes each post-handshake frame of one connection and issues the
//! resulting controller commands.
//!
//! ## Heartbeat Pipeline
//!
//! ```text
//! payload ─► split tag ─► verify HMAC ──✗──► set_intensity(0.0)
//!                              │
//!                              ▼
//!                     sequence > cursor? ──✗──► (no command)
//!                              │
//!                              ▼
//!                  AnomalyDetector::assess(entropy, variance)
//!                              │
//!                              ▼
//!              IntensityPolicy::decide(score, fps_min)
//!                              │
//!                              ▼
//!                      set_intensity(level)
//! ```
//!
//! Every frame that carries a full header is acknowledged, whatever
//! happened to it. Failures stay inside the dispatcher and are only logged.

use std::sync::Arc;

use shankpit_security::{Admission, AnomalyDetector, MessageAuthenticator, ReplayGuard};

use crate::config::NodeConfig;
use crate::controller::{ResourceController, MIN_INTENSITY};
use crate::error::FrameError;
use crate::policy::IntensityPolicy;
use crate::protocol::{
    split_tag, Frame, GameEvent, Opcode, Telemetry, EVENT_PAYLOAD_LEN, HEADER_SIZE,
    HEARTBEAT_PAYLOAD_LEN,
};
use crate::session::SessionLease;
use crate::stats::NodeStats;

/// What the connection should do after a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Write an Acknowledgment frame.
    Acknowledge,
    /// Write nothing.
    Drop,
    /// Close the connection.
    Disconnect,
}

/// Per-connection frame handler.
///
/// Owns the session lease, so dropping the dispatcher ends the session.
pub struct Dispatcher {
    lease: SessionLease,
    authenticator: MessageAuthenticator,
    replay: ReplayGuard,
    detector: AnomalyDetector,
    policy: IntensityPolicy,
    controller: Arc<dyn ResourceController>,
    stats: Arc<NodeStats>,
    max_auth_failures: u32,
    consecutive_auth_failures: u32,
}

impl Dispatcher {
    /// Creates a dispatcher for an established session.
    #[must_use]
    pub fn new(
        lease: SessionLease,
        config: &NodeConfig,
        controller: Arc<dyn ResourceController>,
        stats: Arc<NodeStats>,
    ) -> Self {
        Self {
            lease,
            authenticator: MessageAuthenticator::new(),
            replay: ReplayGuard::new(),
            detector: AnomalyDetector::new(config.detector.clone()),
            policy: IntensityPolicy::new(config.policy.clone()),
            controller,
            stats,
            max_auth_failures: config.max_auth_failures,
            consecutive_auth_failures: 0,
        }
    }

    /// The session this dispatcher serves.
    #[must_use]
    pub fn session(&self) -> &SessionLease {
        &self.lease
    }

    /// The connection's anomaly detector.
    #[must_use]
    pub const fn detector(&self) -> &AnomalyDetector {
        &self.detector
    }

    /// Handles one raw frame.
    pub fn dispatch(&mut self, raw: &[u8]) -> Outcome {
        if raw.len() < HEADER_SIZE {
            NodeStats::bump(&self.stats.frames_malformed);
            tracing::debug!(len = raw.len(), "runt frame dropped");
            return Outcome::Drop;
        }
        NodeStats::bump(&self.stats.frames_received);

        let frame = match Frame::parse(raw) {
            Ok(frame) => frame,
            Err(err) => {
                NodeStats::bump(&self.stats.frames_malformed);
                tracing::warn!(pid = self.lease.pid(), %err, "malformed frame dropped");
                return Outcome::Acknowledge;
            }
        };

        let result = match frame.header.opcode() {
            Some(Opcode::Heartbeat) => self.handle_heartbeat(frame.payload),
            Some(Opcode::Event) => self.handle_event(frame.payload),
            _ => {
                tracing::debug!(opcode = frame.header.opcode, "opcode ignored");
                Ok(())
            }
        };

        match result {
            Ok(()) => Outcome::Acknowledge,
            Err(FrameError::AuthenticationFailed { opcode }) => self.on_auth_failure(opcode),
            Err(FrameError::ReplayRejected { .. }) => {
                NodeStats::bump(&self.stats.replays_rejected);
                Outcome::Acknowledge
            }
            Err(err) => {
                NodeStats::bump(&self.stats.frames_malformed);
                tracing::warn!(pid = self.lease.pid(), %err, "frame dropped");
                Outcome::Acknowledge
            }
        }
    }

    fn handle_heartbeat(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        let (signed, tag) = split_tag(payload, HEARTBEAT_PAYLOAD_LEN)?;
        self.authenticate(Opcode::Heartbeat, signed, tag)?;

        let telemetry = Telemetry::decode(signed)?;
        if let Admission::Replayed {
            sequence,
            last_accepted,
        } = self.replay.admit(self.lease.cursor(), telemetry.sequence)
        {
            return Err(FrameError::ReplayRejected {
                sequence,
                last_accepted,
            });
        }

        let verdict = self
            .detector
            .assess(telemetry.input_entropy, telemetry.frame_time_var);
        if verdict.is_anomalous() {
            NodeStats::bump(&self.stats.anomalies_flagged);
            tracing::warn!(
                pid = self.lease.pid(),
                sequence = telemetry.sequence,
                ?verdict,
                "implausible telemetry"
            );
        }

        let level = self.policy.decide(verdict.score(), telemetry.fps_min);
        tracing::debug!(
            sequence = telemetry.sequence,
            fps_min = telemetry.fps_min,
            score = verdict.score(),
            level,
            "heartbeat"
        );
        self.controller.set_intensity(level);
        Ok(())
    }

    /// Events carry no sequence number and skip the replay guard: a captured
    /// Event with a valid tag earns a bonus every time it is resent.
    fn handle_event(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        let (signed, tag) = split_tag(payload, EVENT_PAYLOAD_LEN)?;
        self.authenticate(Opcode::Event, signed, tag)?;

        let event = GameEvent::decode(signed)?;
        let multiplier = self.policy.bonus_multiplier();
        tracing::info!(
            pid = self.lease.pid(),
            match_id = event.match_id,
            kill_timestamp = event.kill_timestamp,
            victim = event.victim_id,
            weapon = event.weapon_id,
            server_signature = ?&event.server_signature[..8],
            multiplier,
            "proof of action, applying bonus"
        );
        NodeStats::bump(&self.stats.bonuses_applied);
        self.controller.apply_bonus(multiplier);
        Ok(())
    }

    fn authenticate(&mut self, opcode: Opcode, signed: &[u8], tag: &[u8]) -> Result<(), FrameError> {
        if self.authenticator.verify(signed, tag, self.lease.key()) {
            self.consecutive_auth_failures = 0;
            Ok(())
        } else {
            Err(FrameError::AuthenticationFailed { opcode })
        }
    }

    fn on_auth_failure(&mut self, opcode: Opcode) -> Outcome {
        NodeStats::bump(&self.stats.auth_failures);
        self.consecutive_auth_failures = self.consecutive_auth_failures.saturating_add(1);
        tracing::error!(
            pid = self.lease.pid(),
            ?opcode,
            consecutive = self.consecutive_auth_failures,
            "forged frame, forcing minimum intensity"
        );
        self.controller.set_intensity(MIN_INTENSITY);

        if self.max_auth_failures > 0 && self.consecutive_auth_failures >= self.max_auth_failures {
            Outcome::Disconnect
        } else {
            Outcome::Acknowledge
        }
    }

    /// Consecutive authentication failures since the last verified frame.
    #[must_use]
    pub const fn consecutive_auth_failures(&self) -> u32 {
        self.consecutive_auth_failures
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pid", &self.lease.pid())
            .field("last_sequence", &self.lease.cursor().last_accepted())
            .field("consecutive_auth_failures", &self.consecutive_auth_failures)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ChannelController, ControlCommand};
    use crate::protocol::{FrameSerializer, Hello, SERVER_SIGNATURE_SIZE};
    use crate::session::SessionManager;
    use crossbeam_channel::Receiver;
    use shankpit_security::SessionKey;

    struct Harness {
        dispatcher: Dispatcher,
        commands: Receiver<ControlCommand>,
        stats: Arc<NodeStats>,
        key: SessionKey,
    }

    fn harness(config: &NodeConfig) -> Harness {
        let manager = SessionManager::new();
        let mut serializer = FrameSerializer::new();
        assert!(serializer.serialize_hello(&Hello {
            pid: 4242,
            build_hash: 7,
            nonce: 0xC0FFEE,
            timestamp: 0,
        }));
        let lease = manager.handshake(serializer.as_slice()).unwrap();
        let key = lease.key().clone();

        let (controller, commands) = ChannelController::new(64);
        let stats = Arc::new(NodeStats::default());
        let dispatcher = Dispatcher::new(lease, config, Arc::new(controller), Arc::clone(&stats));
        Harness {
            dispatcher,
            commands,
            stats,
            key,
        }
    }

    fn telemetry(sequence: u64, fps_min: u8, entropy: f32) -> Telemetry {
        Telemetry {
            sequence,
            sample_count: 60,
            frame_time_avg: 16.6,
            frame_time_var: 0.8,
            fps_min,
            input_entropy: entropy,
            input_hash: 0xDEAD_BEEF,
            timestamp: 1_700_000_000_000,
        }
    }

    fn heartbeat(key: &SessionKey, telemetry: &Telemetry) -> Vec<u8> {
        let mut serializer = FrameSerializer::new();
        assert!(serializer.serialize_heartbeat(telemetry, key));
        serializer.as_slice().to_vec()
    }

    fn event(key: &SessionKey) -> Vec<u8> {
        let mut serializer = FrameSerializer::new();
        assert!(serializer.serialize_event(
            &GameEvent {
                match_id: 99,
                kill_timestamp: 12_345,
                victim_id: 3,
                weapon_id: 1,
                server_signature: [0xAB; SERVER_SIGNATURE_SIZE],
            },
            key,
        ));
        serializer.as_slice().to_vec()
    }

    fn drain(commands: &Receiver<ControlCommand>) -> Vec<ControlCommand> {
        commands.try_iter().collect()
    }

    #[test]
    fn test_heartbeat_full_intensity() {
        let mut h = harness(&NodeConfig::default());
        let frame = heartbeat(&h.key, &telemetry(1, 30, 0.7));

        assert_eq!(h.dispatcher.dispatch(&frame), Outcome::Acknowledge);
        assert_eq!(drain(&h.commands), vec![ControlCommand::SetIntensity(1.0)]);
        assert_eq!(h.dispatcher.session().cursor().last_accepted(), 1);
    }

    #[test]
    fn test_low_fps_throttles() {
        let mut h = harness(&NodeConfig::default());
        let frame = heartbeat(&h.key, &telemetry(1, 10, 0.9));

        h.dispatcher.dispatch(&frame);
        assert_eq!(drain(&h.commands), vec![ControlCommand::SetIntensity(0.2)]);
    }

    #[test]
    fn test_static_input_idles() {
        let mut h = harness(&NodeConfig::default());
        let frame = heartbeat(&h.key, &telemetry(1, 60, 0.0));

        h.dispatcher.dispatch(&frame);
        assert_eq!(drain(&h.commands), vec![ControlCommand::SetIntensity(0.0)]);
        assert_eq!(h.stats.snapshot().anomalies_flagged, 1);
    }

    #[test]
    fn test_replay_issues_no_command() {
        let mut h = harness(&NodeConfig::default());
        let frame = heartbeat(&h.key, &telemetry(1, 30, 0.7));

        h.dispatcher.dispatch(&frame);
        drain(&h.commands);

        assert_eq!(h.dispatcher.dispatch(&frame), Outcome::Acknowledge);
        assert!(drain(&h.commands).is_empty());
        assert_eq!(h.stats.snapshot().replays_rejected, 1);
        assert_eq!(h.dispatcher.detector().history().len(), 1);
    }

    #[test]
    fn test_tampered_bits_force_minimum() {
        let mut h = harness(&NodeConfig::default());
        let frame = heartbeat(&h.key, &telemetry(1, 30, 0.7));

        for byte in HEADER_SIZE..frame.len() {
            for bit in 0..8 {
                let mut forged = frame.clone();
                forged[byte] ^= 1 << bit;

                assert_eq!(h.dispatcher.dispatch(&forged), Outcome::Acknowledge);
                assert_eq!(
                    drain(&h.commands),
                    vec![ControlCommand::SetIntensity(MIN_INTENSITY)]
                );
            }
        }
        assert_eq!(h.dispatcher.session().cursor().last_accepted(), 0);
    }

    #[test]
    fn test_forged_before_replay_check() {
        let mut h = harness(&NodeConfig::default());
        let wrong_key = SessionKey::from_bytes([0x55; 32]);
        let frame = heartbeat(&wrong_key, &telemetry(50, 30, 0.7));

        h.dispatcher.dispatch(&frame);

        assert_eq!(h.dispatcher.session().cursor().last_accepted(), 0);
        assert_eq!(h.stats.snapshot().auth_failures, 1);
    }

    #[test]
    fn test_verified_event_applies_bonus() {
        let mut h = harness(&NodeConfig::default());

        assert_eq!(h.dispatcher.dispatch(&event(&h.key)), Outcome::Acknowledge);
        assert_eq!(drain(&h.commands), vec![ControlCommand::ApplyBonus(1.2)]);
        assert_eq!(h.stats.snapshot().bonuses_applied, 1);
    }

    #[test]
    fn test_resent_event_not_replay_checked() {
        let mut h = harness(&NodeConfig::default());
        let frame = event(&h.key);

        h.dispatcher.dispatch(&frame);
        h.dispatcher.dispatch(&frame);
        assert_eq!(
            drain(&h.commands),
            vec![ControlCommand::ApplyBonus(1.2), ControlCommand::ApplyBonus(1.2)]
        );
        assert_eq!(h.stats.snapshot().replays_rejected, 0);
    }

    #[test]
    fn test_forged_event_no_bonus() {
        let mut h = harness(&NodeConfig::default());
        let mut frame = event(&h.key);
        frame[HEADER_SIZE] ^= 0x01;

        h.dispatcher.dispatch(&frame);
        assert_eq!(
            drain(&h.commands),
            vec![ControlCommand::SetIntensity(MIN_INTENSITY)]
        );
    }

    #[test]
    fn test_runt_frame_dropped() {
        let mut h = harness(&NodeConfig::default());

        assert_eq!(h.dispatcher.dispatch(&[0x54, 0x41, 0x4B]), Outcome::Drop);
        assert!(drain(&h.commands).is_empty());
    }

    #[test]
    fn test_bad_magic_still_acknowledged() {
        let mut h = harness(&NodeConfig::default());
        let mut frame = heartbeat(&h.key, &telemetry(1, 30, 0.7));
        frame[0] = 0;

        assert_eq!(h.dispatcher.dispatch(&frame), Outcome::Acknowledge);
        assert!(drain(&h.commands).is_empty());
        assert_eq!(h.stats.snapshot().frames_malformed, 1);
    }

    #[test]
    fn test_unknown_and_reserved_opcodes_acknowledged() {
        let mut h = harness(&NodeConfig::default());

        for opcode in [0x02, 0x03, 0x42, 0xFF] {
            let mut serializer = FrameSerializer::new();
            assert!(serializer.serialize_raw(opcode, &[1, 2, 3]));
            assert_eq!(h.dispatcher.dispatch(serializer.as_slice()), Outcome::Acknowledge);
        }
        assert!(drain(&h.commands).is_empty());
    }

    #[test]
    fn test_truncated_heartbeat_acknowledged() {
        let mut h = harness(&NodeConfig::default());
        let mut serializer = FrameSerializer::new();
        assert!(serializer.serialize_raw(Opcode::Heartbeat as u8, &[0u8; 39]));

        assert_eq!(h.dispatcher.dispatch(serializer.as_slice()), Outcome::Acknowledge);
        assert!(drain(&h.commands).is_empty());
    }

    #[test]
    fn test_escalation_disconnects_after_limit() {
        let mut h = harness(&NodeConfig::default().with_max_auth_failures(3));
        let wrong_key = SessionKey::from_bytes([0x77; 32]);

        let forged = |seq| heartbeat(&wrong_key, &telemetry(seq, 30, 0.7));
        assert_eq!(h.dispatcher.dispatch(&forged(1)), Outcome::Acknowledge);
        assert_eq!(h.dispatcher.dispatch(&forged(2)), Outcome::Acknowledge);

        let valid = heartbeat(&h.key, &telemetry(1, 30, 0.7));
        assert_eq!(h.dispatcher.dispatch(&valid), Outcome::Acknowledge);
        assert_eq!(h.dispatcher.consecutive_auth_failures(), 0);

        assert_eq!(h.dispatcher.dispatch(&forged(3)), Outcome::Acknowledge);
        assert_eq!(h.dispatcher.dispatch(&forged(4)), Outcome::Acknowledge);
        assert_eq!(h.dispatcher.dispatch(&forged(5)), Outcome::Disconnect);
    }

    #[test]
    fn test_no_escalation_by_default() {
        let mut h = harness(&NodeConfig::default());
        let wrong_key = SessionKey::from_bytes([0x77; 32]);

        for seq in 1..=50 {
            let frame = heartbeat(&wrong_key, &telemetry(seq, 30, 0.7));
            assert_eq!(h.dispatcher.dispatch(&frame), Outcome::Acknowledge);
        }
        assert_eq!(h.stats.snapshot().auth_failures, 50);
    }
}
