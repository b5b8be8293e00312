//! # Intensity Policy
//!
//! Maps validated telemetry to an intensity command.
//!
//! | Condition                      | Intensity |
//! |--------------------------------|-----------|
//! | `fps < min_fps`                | 0.2       |
//! | `score > entropy_threshold`    | 1.0       |
//! | otherwise                      | 0.0       |
//!
//! A low frame rate throttles regardless of how good the entropy looks.
//! Event frames never pass through here; they trigger a fixed bonus.

use serde::Deserialize;

/// Policy constants.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Frame rate below which the resource is throttled.
    pub min_fps: u8,
    /// Intensity commanded under the FPS floor.
    pub throttle_intensity: f32,
    /// Intensity commanded for plausible human input.
    pub full_intensity: f32,
    /// Intensity commanded otherwise.
    pub idle_intensity: f32,
    /// Validated score above which input counts as human.
    pub entropy_threshold: f32,
    /// Multiplier applied for a verified Event frame.
    pub bonus_multiplier: f32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_fps: 24,
            throttle_intensity: 0.2,
            full_intensity: 1.0,
            idle_intensity: 0.0,
            entropy_threshold: 0.5,
            bonus_multiplier: 1.2,
        }
    }
}

/// Pure decision function over validated telemetry.
#[derive(Clone, Debug, Default)]
pub struct IntensityPolicy {
    config: PolicyConfig,
}

impl IntensityPolicy {
    /// Creates a policy with the given constants.
    #[must_use]
    pub const fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    /// Intensity for a heartbeat.
    #[must_use]
    pub fn decide(&self, validated_score: f32, reported_fps: u8) -> f32 {
        if reported_fps < self.config.min_fps {
            self.config.throttle_intensity
        } else if validated_score > self.config.entropy_threshold {
            self.config.full_intensity
        } else {
            self.config.idle_intensity
        }
    }

    /// Multiplier for a verified Event frame.
    #[must_use]
    pub const fn bonus_multiplier(&self) -> f32 {
        self.config.bonus_multiplier
    }
}
