//! Hit classification under combined temporal and spatial tolerance.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::config::JudgementConfig;
use crate::motion::MotionSample;
use crate::Target;

/// Categorical outcome of testing one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Judgement {
    Perfect,
    Good,
    Miss,
}

impl Judgement {
    /// Score awarded before the combo multiplier.
    pub fn base_score(self) -> u64 {
        match self {
            Judgement::Perfect => 100,
            Judgement::Good => 50,
            Judgement::Miss => 0,
        }
    }

    /// Weight used by the accuracy formula, out of 100.
    pub fn accuracy_weight(self) -> u64 {
        match self {
            Judgement::Perfect => 100,
            Judgement::Good => 60,
            Judgement::Miss => 0,
        }
    }

    pub fn is_hit(self) -> bool {
        !matches!(self, Judgement::Miss)
    }
}

/// Stateless judge. Knows the windows and radii but nothing about which
/// targets were already resolved; the session owns that.
#[derive(Debug, Clone, Copy, Default)]
pub struct JudgementEngine {
    config: JudgementConfig,
}

impl JudgementEngine {
    pub fn new(config: JudgementConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &JudgementConfig {
        &self.config
    }

    /// Classifies a timing offset and a hand distance. `None` means the
    /// target stays open this frame.
    pub fn classify(&self, delta_ms: f64, distance: f32) -> Option<Judgement> {
        let delta_ms = delta_ms.abs();
        let JudgementConfig {
            perfect_window_ms,
            good_window_ms,
            perfect_radius,
            good_radius,
            ..
        } = self.config;

        if distance <= perfect_radius && delta_ms <= perfect_window_ms {
            Some(Judgement::Perfect)
        } else if distance <= good_radius && delta_ms <= good_window_ms {
            Some(Judgement::Good)
        } else {
            None
        }
    }

    /// Hit test of one target against the current hand sample. Absent or
    /// low-confidence hands never hit.
    pub fn hit_test(&self, now_ms: f64, target: &Target, sample: &MotionSample) -> Option<Judgement> {
        let delta_ms = now_ms - target.time_ms as f64;
        if delta_ms.abs() > self.config.good_window_ms {
            return None;
        }
        let hand = self.usable_position(sample)?;
        self.classify(delta_ms, hand.distance(target.position))
    }

    /// True once the target can no longer be hit.
    pub fn has_expired(&self, now_ms: f64, target: &Target) -> bool {
        now_ms > target.time_ms as f64 + self.config.good_window_ms
    }

    fn usable_position(&self, sample: &MotionSample) -> Option<Vec3> {
        sample
            .position
            .filter(|_| sample.confidence >= self.config.min_confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> JudgementEngine {
        JudgementEngine::new(JudgementConfig::default())
    }

    #[test]
    fn classification_thresholds() {
        let engine = engine();
        assert_eq!(engine.classify(0.0, 0.0), Some(Judgement::Perfect));
        assert_eq!(engine.classify(50.0, 0.3), Some(Judgement::Perfect));
        assert_eq!(engine.classify(-50.0, 0.3), Some(Judgement::Perfect));
        assert_eq!(engine.classify(51.0, 0.1), Some(Judgement::Good));
        assert_eq!(engine.classify(10.0, 0.31), Some(Judgement::Good));
        assert_eq!(engine.classify(100.0, 0.6), Some(Judgement::Good));
        assert_eq!(engine.classify(101.0, 0.0), None);
        assert_eq!(engine.classify(0.0, 0.61), None);
    }

    #[test]
    fn grid_matches_rules() {
        let engine = engine();
        for dt in (0..=150).step_by(5) {
            for step in 0..=10 {
                let distance = step as f32 * 0.1;
                let dt = dt as f64;
                let expected = if dt <= 50.0 && distance <= 0.3 {
                    Some(Judgement::Perfect)
                } else if dt <= 100.0 && distance <= 0.6 {
                    Some(Judgement::Good)
                } else {
                    None
                };
                assert_eq!(engine.classify(dt, distance), expected, "dt={dt} d={distance}");
            }
        }
    }

    #[test]
    fn missing_or_unconfident_hand_never_hits() {
        let target = Target::new(1000, Vec3::ZERO);
        let strict = JudgementEngine::new(JudgementConfig {
            min_confidence: 0.5,
            ..Default::default()
        });

        assert_eq!(engine().hit_test(1000.0, &target, &MotionSample::none()), None);
        assert_eq!(
            strict.hit_test(1000.0, &target, &MotionSample::at(Vec3::ZERO, 0.2)),
            None
        );
        assert_eq!(
            strict.hit_test(1000.0, &target, &MotionSample::at(Vec3::ZERO, 0.8)),
            Some(Judgement::Perfect)
        );
    }

    #[test]
    fn expiry_starts_after_good_window() {
        let target = Target::new(1000, Vec3::ZERO);
        assert!(!engine().has_expired(1100.0, &target));
        assert!(engine().has_expired(1100.5, &target));
    }
}
