//! # Resource Controller Seam
//!
//! The node never drives the controlled resource itself. It issues
//! fire-and-forget commands through [`ResourceController`]; whoever owns the
//! resource implements the trait.
//!
//! [`ChannelController`] publishes commands on a bounded channel so the
//! resource side can consume them on its own thread without ever blocking a
//! connection task. When the channel is full, ordinary commands are dropped
//! but a minimum-intensity command evicts the oldest queued one, so the
//! fail-safe always reaches the resource side last.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// Intensity commanded on every connection teardown.
pub const MIN_INTENSITY: f32 = 0.0;

/// Operations the protocol layer issues to the resource controller.
pub trait ResourceController: Send + Sync {
    /// Sets the continuous intensity level, in `[0, 1]`.
    fn set_intensity(&self, level: f32);

    /// Applies a one-shot multiplicative boost, `multiplier > 1`.
    fn apply_bonus(&self, multiplier: f32);
}

/// A command as seen by the resource side.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlCommand {
    /// Set intensity to the given level.
    SetIntensity(f32),
    /// Apply a bonus multiplier.
    ApplyBonus(f32),
}

/// Controller that forwards commands over a bounded channel.
#[derive(Debug)]
pub struct ChannelController {
    sender: Sender<ControlCommand>,
    evictor: Receiver<ControlCommand>,
    dropped: AtomicU64,
}

impl ChannelController {
    /// Creates a controller and the receiver the resource side drains.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, Receiver<ControlCommand>) {
        let (sender, receiver) = bounded(capacity.max(1));
        let controller = Self {
            sender,
            evictor: receiver.clone(),
            dropped: AtomicU64::new(0),
        };
        (controller, receiver)
    }

    /// Commands dropped or evicted because the channel was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn publish(&self, command: ControlCommand) {
        match self.sender.try_send(command) {
            Ok(()) => tracing::debug!(?command, "controller command"),
            Err(TrySendError::Full(command)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(?command, "controller channel full, command dropped");
            }
            Err(TrySendError::Disconnected(command)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(?command, "controller gone, command dropped");
            }
        }
    }

    /// Publishes `command`, evicting the oldest queued commands until it fits.
    fn publish_evicting(&self, mut command: ControlCommand) {
        loop {
            match self.sender.try_send(command) {
                Ok(()) => {
                    tracing::debug!(?command, "controller command");
                    return;
                }
                Err(TrySendError::Full(returned)) => {
                    command = returned;
                    if let Ok(evicted) = self.evictor.try_recv() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(?evicted, "controller channel full, evicted for minimum intensity");
                    }
                }
                Err(TrySendError::Disconnected(command)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(?command, "controller gone, command dropped");
                    return;
                }
            }
        }
    }
}

impl ResourceController for ChannelController {
    fn set_intensity(&self, level: f32) {
        let level = level.clamp(MIN_INTENSITY, 1.0);
        let command = ControlCommand::SetIntensity(level);
        if level <= MIN_INTENSITY {
            self.publish_evicting(command);
        } else {
            self.publish(command);
        }
    }

    fn apply_bonus(&self, multiplier: f32) {
        self.publish(ControlCommand::ApplyBonus(multiplier));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_arrive_in_order() {
        let (controller, commands) = ChannelController::new(8);

        controller.set_intensity(1.0);
        controller.apply_bonus(1.2);
        controller.set_intensity(MIN_INTENSITY);

        let received: Vec<_> = commands.try_iter().collect();
        assert_eq!(
            received,
            vec![
                ControlCommand::SetIntensity(1.0),
                ControlCommand::ApplyBonus(1.2),
                ControlCommand::SetIntensity(0.0),
            ]
        );
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let (controller, commands) = ChannelController::new(1);

        controller.set_intensity(1.0);
        controller.set_intensity(0.2);

        assert_eq!(controller.dropped(), 1);
        assert_eq!(commands.len(), 1);
    }

    #[test]
    fn test_minimum_intensity_evicts_when_full() {
        let (controller, commands) = ChannelController::new(4);

        for _ in 0..10 {
            controller.set_intensity(1.0);
        }
        controller.set_intensity(MIN_INTENSITY);

        let received: Vec<_> = commands.try_iter().collect();
        assert_eq!(received.len(), 4);
        assert_eq!(received.last(), Some(&ControlCommand::SetIntensity(0.0)));
        assert_eq!(controller.dropped(), 7);
    }

    #[test]
    fn test_intensity_clamped() {
        let (controller, commands) = ChannelController::new(2);

        controller.set_intensity(3.0);

        assert_eq!(commands.try_recv().unwrap(), ControlCommand::SetIntensity(1.0));
    }
}
