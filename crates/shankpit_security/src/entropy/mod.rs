//! # Telemetry Anomaly Detection
//!
//! Scores the client's self-reported input entropy.
//!
//! ## Detection Methods
//!
//! - **Static input**: entropy near zero (AFK, no input at all)
//! - **Uniform frame timing**: frame-time variance near zero (virtual
//!   display, frame limiter, emulated client)
//! - **Looped reporting**: the entropy stream repeats with a short period
//!   (macro loops, replayed capture files)
//!
//! The raw input stream never reaches the node, so only gross
//! implausibility can be caught here. The periodicity scan is a bounded
//! pairwise comparison (at most ~600 comparisons at the default capacity).

use std::collections::VecDeque;

use serde::Deserialize;

/// Detector thresholds.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Entropy below this is treated as no input.
    pub static_entropy_floor: f32,
    /// Frame-time variance below this is treated as an artificial source.
    pub min_frame_variance: f32,
    /// Number of entropy samples kept for the periodicity scan.
    pub history_capacity: usize,
    /// Samples required before the periodicity scan runs.
    pub min_samples: usize,
    /// Smallest candidate period (inclusive).
    pub min_period: usize,
    /// Largest candidate period (exclusive).
    pub max_period: usize,
    /// Two samples closer than this count as a repeat.
    pub match_tolerance: f32,
    /// Fraction of matching pairs above which a period is flagged.
    pub periodic_ratio: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            static_entropy_floor: 0.01,
            min_frame_variance: 0.0001,
            history_capacity: 60,
            min_samples: 10,
            min_period: 2,
            max_period: 10,
            match_tolerance: 0.001,
            periodic_ratio: 0.8,
        }
    }
}

/// Outcome of scoring one telemetry report.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Verdict {
    /// Report looks human; the claimed entropy stands.
    Plausible(f32),
    /// Entropy below the static-input floor.
    StaticInput,
    /// Frame-time variance below the uniform-timing floor.
    UniformFrameTiming,
    /// Entropy history repeats with the given period.
    Periodic {
        /// Detected period, in samples.
        period: usize,
    },
}

impl Verdict {
    /// Score forwarded to the intensity policy.
    #[must_use]
    pub const fn score(self) -> f32 {
        match self {
            Self::Plausible(score) => score,
            Self::StaticInput | Self::UniformFrameTiming | Self::Periodic { .. } => 0.0,
        }
    }

    /// Returns true if the report was rejected as implausible.
    #[must_use]
    pub const fn is_anomalous(self) -> bool {
        !matches!(self, Self::Plausible(_))
    }
}

/// Sliding window of recently reported entropy scores.
///
/// Insertion ordered; the oldest sample is evicted once capacity is reached.
#[derive(Clone, Debug)]
pub struct TelemetryHistory {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl TelemetryHistory {
    /// Creates an empty history holding at most `capacity` samples.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a sample, evicting the oldest one on overflow.
    pub fn push(&mut self, sample: f32) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Number of samples currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if no samples are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of samples.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterates samples oldest first.
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        self.samples.iter().copied()
    }

    /// Drops all samples.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    fn get(&self, index: usize) -> f32 {
        self.samples[index]
    }
}

/// Bounded-history classifier for telemetry entropy reports.
///
/// One detector per session; the history it owns is never shared between
/// connections.
#[derive(Clone, Debug)]
pub struct AnomalyDetector {
    config: DetectorConfig,
    history: TelemetryHistory,
}

impl AnomalyDetector {
    /// Creates a detector with the given thresholds.
    #[must_use]
    pub fn new(config: DetectorConfig) -> Self {
        let history = TelemetryHistory::new(config.history_capacity);
        Self { config, history }
    }

    /// Returns the validated score for a report: the claimed entropy when
    /// plausible, zero otherwise.
    pub fn validate(&mut self, claimed_entropy: f32, frame_variance: f32) -> f32 {
        self.assess(claimed_entropy, frame_variance).score()
    }

    /// Classifies a report. First matching rule wins.
    ///
    /// Rejections on the two floors leave the history untouched; every other
    /// report is appended before the periodicity scan. Non-finite values fail
    /// their floor.
    pub fn assess(&mut self, claimed_entropy: f32, frame_variance: f32) -> Verdict {
        if !claimed_entropy.is_finite() || claimed_entropy < self.config.static_entropy_floor {
            return Verdict::StaticInput;
        }

        if !frame_variance.is_finite() || frame_variance < self.config.min_frame_variance {
            return Verdict::UniformFrameTiming;
        }

        self.history.push(claimed_entropy);

        if let Some(period) = self.detect_periodicity() {
            return Verdict::Periodic { period };
        }

        Verdict::Plausible(claimed_entropy)
    }

    /// Read-only view of the entropy window.
    #[must_use]
    pub const fn history(&self) -> &TelemetryHistory {
        &self.history
    }

    /// Active thresholds.
    #[must_use]
    pub const fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Forgets all history.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Returns the first candidate period whose matching-pair ratio exceeds
    /// the configured threshold.
    fn detect_periodicity(&self) -> Option<usize> {
        let len = self.history.len();
        if len < self.config.min_samples {
            return None;
        }

        for period in self.config.min_period..self.config.max_period {
            if period == 0 || period >= len {
                continue;
            }

            let compared = len - period;
            let matches = (0..compared)
                .filter(|&i| {
                    (self.history.get(i) - self.history.get(i + period)).abs()
                        < self.config.match_tolerance
                })
                .count();

            #[allow(clippy::cast_precision_loss)]
            let ratio = matches as f32 / compared as f32;
            if ratio > self.config.periodic_ratio {
                return Some(period);
            }
        }

        None
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_static_input_always_zero() {
        let mut detector = AnomalyDetector::default();

        for entropy in [0.0, 0.005, 0.0099] {
            for variance in [0.0, 0.5, 100.0] {
                assert_eq!(detector.validate(entropy, variance), 0.0);
            }
        }

        // Floors never touch the history
        assert!(detector.history().is_empty());
    }

    #[test]
    fn test_uniform_frame_timing_zero() {
        let mut detector = AnomalyDetector::default();

        for entropy in [0.01, 0.5, 0.99] {
            assert_eq!(
                detector.assess(entropy, 0.000_05),
                Verdict::UniformFrameTiming
            );
        }
        assert!(detector.history().is_empty());
    }

    #[test]
    fn test_non_finite_reports_fail_floors() {
        let mut detector = AnomalyDetector::default();

        assert_eq!(detector.assess(f32::NAN, 0.5), Verdict::StaticInput);
        assert_eq!(detector.assess(f32::INFINITY, 0.5), Verdict::StaticInput);
        assert_eq!(detector.assess(0.7, f32::NAN), Verdict::UniformFrameTiming);
        assert_eq!(detector.assess(0.7, f32::INFINITY), Verdict::UniformFrameTiming);
        assert!(detector.history().is_empty());
    }

    #[test]
    fn test_alternating_values_flagged_periodic() {
        let mut detector = AnomalyDetector::default();

        // Below the sample floor the scan does not run
        for i in 0..9 {
            let entropy = if i % 2 == 0 { 0.5 } else { 0.6 };
            assert_eq!(detector.validate(entropy, 0.01), entropy);
        }

        let verdict = detector.assess(0.6, 0.01);
        assert_eq!(verdict, Verdict::Periodic { period: 2 });
        assert_eq!(verdict.score(), 0.0);
    }

    #[test]
    fn test_uniform_random_not_periodic() {
        let mut rng = ChaCha8Rng::seed_from_u64(0x5EED);
        let mut detector = AnomalyDetector::default();

        let mut flagged = 0;
        for _ in 0..200 {
            let entropy: f32 = rng.gen_range(0.05..1.0);
            if detector.assess(entropy, 0.01).is_anomalous() {
                flagged += 1;
            }
        }

        assert_eq!(flagged, 0);
        assert_eq!(detector.history().len(), 60);
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = TelemetryHistory::new(3);
        for sample in [0.1, 0.2, 0.3, 0.4] {
            history.push(sample);
        }

        assert_eq!(history.len(), 3);
        assert_eq!(history.iter().collect::<Vec<_>>(), vec![0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_longer_period_detected() {
        let mut detector = AnomalyDetector::default();
        let pattern = [0.3, 0.7, 0.9];

        let mut last = Verdict::StaticInput;
        for i in 0..12 {
            last = detector.assess(pattern[i % 3], 0.02);
        }

        assert_eq!(last, Verdict::Periodic { period: 3 });
    }

    #[test]
    fn test_reset_clears_history() {
        let mut detector = AnomalyDetector::default();
        detector.validate(0.4, 0.01);
        detector.validate(0.8, 0.01);

        detector.reset();

        assert!(detector.history().is_empty());
    }
}
